// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use crate::{ColumnFilters, ColumnId, FilterValue, ValueKind};
use std::fmt;
use std::sync::Arc;

pub const DEFAULT_COLUMN_SIZE: u16 = 150;
pub const DEFAULT_MIN_COLUMN_SIZE: u16 = 20;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ColumnFlags {
    pub editable: bool,
    /// Only settable when the row is created; inline edits are refused.
    pub create_only: bool,
    pub fixed_first: bool,
    pub fixed_last: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnSize {
    pub size: u16,
    pub min: u16,
    pub max: u16,
}

impl Default for ColumnSize {
    fn default() -> Self {
        Self {
            size: DEFAULT_COLUMN_SIZE,
            min: DEFAULT_MIN_COLUMN_SIZE,
            max: u16::MAX,
        }
    }
}

impl ColumnSize {
    pub fn fixed(size: u16) -> Self {
        Self {
            size,
            min: size,
            max: size,
        }
    }

    pub fn clamp(self, width: u16) -> u16 {
        width.clamp(self.min, self.max.max(self.min))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnRole {
    Data(ValueKind),
    Selection,
    Deletion,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterOption {
    pub label: String,
    pub value: String,
}

impl FilterOption {
    pub fn new(label: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            value: value.into(),
        }
    }
}

/// What an options loader can see: the column asking, and the filter state of
/// every column so dependent pickers can narrow their choices.
pub struct OptionsContext<'a> {
    pub column: &'a ColumnId,
    pub filters: &'a ColumnFilters,
}

impl OptionsContext<'_> {
    pub fn filter_value(&self, column: &str) -> Option<&FilterValue> {
        self.filters
            .iter()
            .find(|filter| filter.id.as_str() == column)
            .map(|filter| &filter.value)
    }
}

pub type OptionsLoader = Arc<dyn Fn(&OptionsContext<'_>) -> Vec<FilterOption> + Send + Sync>;

#[derive(Clone)]
pub enum OptionsSource {
    Static(Vec<FilterOption>),
    Loader(OptionsLoader),
}

impl OptionsSource {
    pub fn resolve(&self, context: &OptionsContext<'_>) -> Vec<FilterOption> {
        match self {
            Self::Static(options) => options.clone(),
            Self::Loader(loader) => loader(context),
        }
    }
}

impl fmt::Debug for OptionsSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static(options) => f.debug_tuple("Static").field(options).finish(),
            Self::Loader(_) => f.write_str("Loader(..)"),
        }
    }
}

#[derive(Debug, Clone)]
pub enum FilterKind {
    /// Free text; parameter name defaults to the column id.
    Text { param: Option<String> },
    DateRange { from_key: String, to_key: String },
    MultiSelect {
        param: String,
        options: OptionsSource,
    },
    /// Parameter name defaults to the column id.
    Boolean {
        param: Option<String>,
        true_label: Option<String>,
        false_label: Option<String>,
    },
}

#[derive(Debug, Clone)]
pub struct FilterSpec {
    pub kind: FilterKind,
    pub label: Option<String>,
    pub order: Option<i32>,
}

impl FilterSpec {
    fn of(kind: FilterKind) -> Self {
        Self {
            kind,
            label: None,
            order: None,
        }
    }

    pub fn text() -> Self {
        Self::of(FilterKind::Text { param: None })
    }

    pub fn text_param(param: impl Into<String>) -> Self {
        Self::of(FilterKind::Text {
            param: Some(param.into()),
        })
    }

    pub fn date_range(from_key: impl Into<String>, to_key: impl Into<String>) -> Self {
        Self::of(FilterKind::DateRange {
            from_key: from_key.into(),
            to_key: to_key.into(),
        })
    }

    pub fn multi_select(param: impl Into<String>, options: OptionsSource) -> Self {
        Self::of(FilterKind::MultiSelect {
            param: param.into(),
            options,
        })
    }

    pub fn boolean() -> Self {
        Self::of(FilterKind::Boolean {
            param: None,
            true_label: None,
            false_label: None,
        })
    }

    pub fn with_param(mut self, name: impl Into<String>) -> Self {
        match &mut self.kind {
            FilterKind::Text { param } | FilterKind::Boolean { param, .. } => {
                *param = Some(name.into());
            }
            FilterKind::MultiSelect { param, .. } => *param = name.into(),
            FilterKind::DateRange { .. } => {}
        }
        self
    }

    pub fn labelled(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn ordered(mut self, order: i32) -> Self {
        self.order = Some(order);
        self
    }
}

#[derive(Debug, Clone)]
pub struct ColumnDef {
    pub id: ColumnId,
    pub title: String,
    pub role: ColumnRole,
    pub flags: ColumnFlags,
    pub size: ColumnSize,
    pub enable_sorting: bool,
    pub enable_hiding: bool,
    pub enable_resizing: bool,
    pub filter: Option<FilterSpec>,
}

impl ColumnDef {
    pub fn data(id: impl Into<ColumnId>, title: impl Into<String>, kind: ValueKind) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            role: ColumnRole::Data(kind),
            flags: ColumnFlags::default(),
            size: ColumnSize::default(),
            enable_sorting: true,
            enable_hiding: true,
            enable_resizing: true,
            filter: None,
        }
    }

    pub fn editable(mut self) -> Self {
        self.flags.editable = true;
        self
    }

    pub fn create_only(mut self) -> Self {
        self.flags.create_only = true;
        self
    }

    pub fn fixed_first(mut self) -> Self {
        self.flags.fixed_first = true;
        self
    }

    pub fn fixed_last(mut self) -> Self {
        self.flags.fixed_last = true;
        self
    }

    pub fn sized(mut self, size: ColumnSize) -> Self {
        self.size = size;
        self
    }

    pub fn width(mut self, width: u16) -> Self {
        self.size.size = width;
        self
    }

    pub fn filter(mut self, spec: FilterSpec) -> Self {
        self.filter = Some(spec);
        self
    }

    pub fn unsortable(mut self) -> Self {
        self.enable_sorting = false;
        self
    }

    pub fn value_kind(&self) -> Option<ValueKind> {
        match self.role {
            ColumnRole::Data(kind) => Some(kind),
            ColumnRole::Selection | ColumnRole::Deletion => None,
        }
    }

    /// Inline editing is allowed for editable data columns that are not
    /// restricted to row creation.
    pub fn is_inline_editable(&self) -> bool {
        self.flags.editable && !self.flags.create_only
    }
}

#[derive(Debug, Clone)]
pub enum ColumnNode {
    Leaf(ColumnDef),
    Group {
        title: String,
        columns: Vec<ColumnNode>,
    },
}

impl From<ColumnDef> for ColumnNode {
    fn from(value: ColumnDef) -> Self {
        Self::Leaf(value)
    }
}

/// Leaf columns in declaration order. Empty groups contribute nothing.
pub fn flatten_columns(nodes: &[ColumnNode]) -> Vec<&ColumnDef> {
    fn walk<'a>(nodes: &'a [ColumnNode], out: &mut Vec<&'a ColumnDef>) {
        for node in nodes {
            match node {
                ColumnNode::Leaf(column) => out.push(column),
                ColumnNode::Group { columns, .. } => walk(columns, out),
            }
        }
    }

    let mut out = Vec::new();
    walk(nodes, &mut out);
    out
}
