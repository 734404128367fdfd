// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use crate::{CellValue, ColumnId, RowId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Changed fields of one row, keyed by column.
pub type Patch = BTreeMap<ColumnId, CellValue>;

/// Row entity rendered by the grid. Field access is by column id so drafts can
/// be overlaid without knowing the concrete type.
pub trait GridRow: Clone {
    fn row_id(&self) -> RowId;

    /// Missing fields read as [`CellValue::Empty`].
    fn field(&self, column: &ColumnId) -> CellValue;

    fn set_field(&mut self, column: &ColumnId, value: CellValue);

    fn merged(&self, patch: &Patch) -> Self {
        let mut next = self.clone();
        for (column, value) in patch {
            next.set_field(column, value.clone());
        }
        next
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: RowId,
    #[serde(default)]
    pub fields: BTreeMap<ColumnId, CellValue>,
}

impl Record {
    pub fn new(id: impl Into<RowId>) -> Self {
        Self {
            id: id.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn with(mut self, column: &str, value: impl Into<CellValue>) -> Self {
        self.fields.insert(ColumnId::from(column), value.into());
        self
    }
}

impl GridRow for Record {
    fn row_id(&self) -> RowId {
        self.id.clone()
    }

    fn field(&self, column: &ColumnId) -> CellValue {
        self.fields.get(column).cloned().unwrap_or(CellValue::Empty)
    }

    fn set_field(&mut self, column: &ColumnId, value: CellValue) {
        self.fields.insert(column.clone(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::{GridRow, Patch, Record};
    use crate::{CellValue, ColumnId};

    #[test]
    fn merged_overlays_patch_without_touching_original() {
        let row = Record::new(1).with("qty", 2).with("name", "ink");
        let mut patch = Patch::new();
        patch.insert(ColumnId::from("qty"), CellValue::Int(3));

        let merged = row.merged(&patch);
        assert_eq!(merged.field(&ColumnId::from("qty")), CellValue::Int(3));
        assert_eq!(merged.field(&ColumnId::from("name")), CellValue::text("ink"));
        assert_eq!(row.field(&ColumnId::from("qty")), CellValue::Int(2));
    }

    #[test]
    fn missing_field_reads_empty() {
        let row = Record::new("a");
        assert_eq!(row.field(&ColumnId::from("nope")), CellValue::Empty);
    }
}
