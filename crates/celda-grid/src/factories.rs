// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use crate::{ColumnDef, ColumnFlags, ColumnId, ColumnRole, ColumnSize, Key};

pub const SELECTION_COLUMN_ID: &str = "__select__";
pub const DELETION_COLUMN_ID: &str = "__delete__";
pub const CONTROL_COLUMN_SIZE: u16 = 56;

/// Arguments for the control column factories. A bare `&str` is the title
/// with every other field defaulted.
#[derive(Debug, Clone, Default)]
pub struct ControlColumnArgs {
    pub title: String,
    pub id: Option<ColumnId>,
    pub editable: bool,
    pub fixed_first: Option<bool>,
    pub fixed_last: Option<bool>,
    pub enable_sorting: bool,
    pub enable_hiding: bool,
    pub enable_resizing: bool,
    pub size: Option<ColumnSize>,
}

impl ControlColumnArgs {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }
}

impl From<&str> for ControlColumnArgs {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ControlColumnArgs {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

fn control_column(
    args: ControlColumnArgs,
    default_id: &str,
    role: ColumnRole,
    fixed_first: bool,
    fixed_last: bool,
) -> ColumnDef {
    ColumnDef {
        id: args.id.unwrap_or_else(|| ColumnId::from(default_id)),
        title: args.title,
        role,
        flags: ColumnFlags {
            editable: args.editable,
            create_only: false,
            fixed_first: args.fixed_first.unwrap_or(fixed_first),
            fixed_last: args.fixed_last.unwrap_or(fixed_last),
        },
        size: args
            .size
            .unwrap_or_else(|| ColumnSize::fixed(CONTROL_COLUMN_SIZE)),
        enable_sorting: args.enable_sorting,
        enable_hiding: args.enable_hiding,
        enable_resizing: args.enable_resizing,
        filter: None,
    }
}

/// Row checkbox column, pinned first unless the caller says otherwise.
pub fn selection_column(args: impl Into<ControlColumnArgs>) -> ColumnDef {
    control_column(
        args.into(),
        SELECTION_COLUMN_ID,
        ColumnRole::Selection,
        true,
        false,
    )
}

/// Per-row delete button column, pinned last unless the caller says otherwise.
/// The button renders only for editable rows.
pub fn deletion_column(args: impl Into<ControlColumnArgs>) -> ColumnDef {
    control_column(
        args.into(),
        DELETION_COLUMN_ID,
        ColumnRole::Deletion,
        false,
        true,
    )
}

pub fn activates_control(key: &Key) -> bool {
    matches!(key, Key::Enter | Key::Space)
}
