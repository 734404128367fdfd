// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use serde::{Deserialize, Serialize};
use std::fmt;
use time::Date;
use time::macros::format_description;

pub const DATE_LAYOUT: &str = "YYYY-MM-DD";

time::serde::format_description!(iso_date, Date, "[year]-[month]-[day]");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "v", rename_all = "snake_case")]
pub enum CellValue {
    Empty,
    Bool(bool),
    Int(i64),
    Decimal(f64),
    Text(String),
    Date(#[serde(with = "iso_date")] Date),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    Text,
    Int,
    Decimal,
    Date,
    Bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueError {
    InvalidInt,
    InvalidDecimal,
    InvalidDate,
    InvalidBool,
}

impl fmt::Display for ValueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidInt => f.write_str("invalid integer value"),
            Self::InvalidDecimal => f.write_str("invalid decimal value"),
            Self::InvalidDate => write!(f, "invalid date value; use {DATE_LAYOUT}"),
            Self::InvalidBool => f.write_str("invalid boolean value; use true or false"),
        }
    }
}

impl std::error::Error for ValueError {}

impl CellValue {
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::Text(value) => value.is_empty(),
            _ => false,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value),
            _ => None,
        }
    }

    /// Parses raw cell input for a column of the given kind. Blank input is
    /// `Empty` for every kind.
    pub fn parse_as(kind: ValueKind, input: &str) -> Result<Self, ValueError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Ok(Self::Empty);
        }

        match kind {
            ValueKind::Text => Ok(Self::Text(input.to_owned())),
            ValueKind::Int => trimmed
                .replace(',', "")
                .parse::<i64>()
                .map(Self::Int)
                .map_err(|_| ValueError::InvalidInt),
            ValueKind::Decimal => {
                let value = trimmed
                    .replace(',', "")
                    .parse::<f64>()
                    .map_err(|_| ValueError::InvalidDecimal)?;
                if !value.is_finite() {
                    return Err(ValueError::InvalidDecimal);
                }
                Ok(Self::Decimal(value))
            }
            ValueKind::Date => parse_date(trimmed).map(Self::Date),
            ValueKind::Bool => match trimmed.to_ascii_lowercase().as_str() {
                "true" | "yes" | "y" | "1" => Ok(Self::Bool(true)),
                "false" | "no" | "n" | "0" => Ok(Self::Bool(false)),
                _ => Err(ValueError::InvalidBool),
            },
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => Ok(()),
            Self::Bool(value) => write!(f, "{value}"),
            Self::Int(value) => write!(f, "{value}"),
            Self::Decimal(value) => write!(f, "{value}"),
            Self::Text(value) => f.write_str(value),
            Self::Date(value) => f.write_str(&format_date(*value)),
        }
    }
}

impl From<i64> for CellValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<bool> for CellValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<String> for CellValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Date> for CellValue {
    fn from(value: Date) -> Self {
        Self::Date(value)
    }
}

pub fn parse_date(input: &str) -> Result<Date, ValueError> {
    Date::parse(input.trim(), &format_description!("[year]-[month]-[day]"))
        .map_err(|_| ValueError::InvalidDate)
}

pub fn format_date(value: Date) -> String {
    value
        .format(&format_description!("[year]-[month]-[day]"))
        .unwrap_or_default()
}
