// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use crate::{Store, now_rfc3339, value_ref_to_string};
use anyhow::{Context, Result, anyhow, bail};
use celda_grid::{
    CellError, CellValue, ColumnId, CommitFailure, GridRow, ListParams, Page, Patch, Record,
    RowId, SortOrder, ValueKind, format_date,
};
use rusqlite::types::Value;
use rusqlite::{OptionalExtension, params, params_from_iter};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Dataset {
    Circulation,
    Expenses,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: ValueKind,
    /// Counts that the store refuses to take below zero.
    pub non_negative: bool,
}

const fn field(name: &'static str, kind: ValueKind) -> FieldSpec {
    FieldSpec {
        name,
        kind,
        non_negative: false,
    }
}

const fn count(name: &'static str) -> FieldSpec {
    FieldSpec {
        name,
        kind: ValueKind::Int,
        non_negative: true,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    /// Substring match; several values match any of them.
    Like,
    In,
    AtLeast,
    AtMost,
    Equals,
}

/// Server parameter bound to a stored field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterBinding {
    pub param: &'static str,
    pub field: &'static str,
    pub op: FilterOp,
}

const fn bind(param: &'static str, field: &'static str, op: FilterOp) -> FilterBinding {
    FilterBinding { param, field, op }
}

const CIRCULATION_FIELDS: &[FieldSpec] = &[
    field("company", ValueKind::Text),
    field("product", ValueKind::Text),
    field("year", ValueKind::Int),
    field("month", ValueKind::Int),
    field("date", ValueKind::Date),
    count("sold"),
    count("free"),
    count("paid"),
    count("print_run"),
];

const EXPENSE_FIELDS: &[FieldSpec] = &[
    field("campaign", ValueKind::Text),
    field("concept", ValueKind::Text),
    field("date", ValueKind::Date),
    field("amount", ValueKind::Decimal),
    field("paid", ValueKind::Bool),
];

const CIRCULATION_FILTERS: &[FilterBinding] = &[
    bind("companies", "company", FilterOp::In),
    bind("product", "product", FilterOp::Like),
    bind("products", "product", FilterOp::In),
    bind("year", "year", FilterOp::Equals),
    bind("date_from", "date", FilterOp::AtLeast),
    bind("date_to", "date", FilterOp::AtMost),
];

const EXPENSE_FILTERS: &[FilterBinding] = &[
    bind("campaign", "campaign", FilterOp::Like),
    bind("campaigns", "campaign", FilterOp::In),
    bind("concept", "concept", FilterOp::Like),
    bind("date_from", "date", FilterOp::AtLeast),
    bind("date_to", "date", FilterOp::AtMost),
    bind("paid", "paid", FilterOp::Equals),
];

impl Dataset {
    pub const ALL: [Self; 2] = [Self::Circulation, Self::Expenses];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Circulation => "circulation",
            Self::Expenses => "expenses",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|dataset| dataset.as_str().eq_ignore_ascii_case(raw.trim()))
    }

    pub const fn fields(self) -> &'static [FieldSpec] {
        match self {
            Self::Circulation => CIRCULATION_FIELDS,
            Self::Expenses => EXPENSE_FIELDS,
        }
    }

    pub const fn filters(self) -> &'static [FilterBinding] {
        match self {
            Self::Circulation => CIRCULATION_FILTERS,
            Self::Expenses => EXPENSE_FILTERS,
        }
    }

    pub fn field(self, name: &str) -> Option<&'static FieldSpec> {
        self.fields().iter().find(|spec| spec.name == name)
    }
}

impl fmt::Display for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn json_path(field: &str) -> String {
    format!("$.\"{field}\".v")
}

fn int_id(id: &RowId) -> Result<i64> {
    match id {
        RowId::Int(value) => Ok(*value),
        RowId::Text(raw) => raw
            .parse::<i64>()
            .map_err(|_| anyhow!("record id {raw:?} is not numeric")),
    }
}

fn parse_cursor(cursor: Option<&str>) -> Result<usize> {
    match cursor {
        None => Ok(0),
        Some(raw) => raw
            .parse::<usize>()
            .map_err(|_| anyhow!("invalid page cursor {raw:?}; restart from the first page")),
    }
}

/// Filter input as the SQLite value `json_extract` yields for the field.
fn sql_value(spec: &FieldSpec, raw: &str) -> Result<Value> {
    let value = CellValue::parse_as(spec.kind, raw)
        .map_err(|err| anyhow!("filter value {raw:?} for {}: {err}", spec.name))?;
    Ok(match value {
        CellValue::Empty => Value::Null,
        CellValue::Bool(value) => Value::Integer(i64::from(value)),
        CellValue::Int(value) => Value::Integer(value),
        CellValue::Decimal(value) => Value::Real(value),
        CellValue::Text(value) => Value::Text(value),
        CellValue::Date(value) => Value::Text(format_date(value)),
    })
}

fn decode_fields(raw: &str) -> Result<BTreeMap<ColumnId, CellValue>> {
    serde_json::from_str(raw).context("decode stored record fields")
}

fn encode_fields(fields: &BTreeMap<ColumnId, CellValue>) -> Result<String> {
    serde_json::to_string(fields).context("encode record fields")
}

fn kind_matches(kind: ValueKind, value: &CellValue) -> bool {
    matches!(
        (kind, value),
        (_, CellValue::Empty)
            | (ValueKind::Text, CellValue::Text(_))
            | (ValueKind::Int, CellValue::Int(_))
            | (ValueKind::Decimal, CellValue::Decimal(_) | CellValue::Int(_))
            | (ValueKind::Date, CellValue::Date(_))
            | (ValueKind::Bool, CellValue::Bool(_))
    )
}

/// Per-field rejections for a patch, or `None` when it is acceptable.
fn validate_patch(dataset: Dataset, patch: &Patch) -> Result<Option<CommitFailure>> {
    let mut failure = CommitFailure::new("some values were rejected");
    let mut rejected = false;
    for (column, value) in patch {
        let Some(spec) = dataset.field(column.as_str()) else {
            bail!("{dataset} has no field `{column}`");
        };
        if !kind_matches(spec.kind, value) {
            failure = failure.with_field(
                column.clone(),
                CellError::Message(format!("expected {:?} value", spec.kind).to_lowercase()),
            );
            rejected = true;
        } else if spec.non_negative && value.as_int().is_some_and(|value| value < 0) {
            failure = failure.with_field(
                column.clone(),
                CellError::Message("must not be negative".to_owned()),
            );
            rejected = true;
        }
    }
    Ok(rejected.then_some(failure))
}

impl Store {
    /// One page of records. The cursor is the offset of the first record and
    /// the next cursor is absent on the last page.
    pub fn list_page(
        &self,
        dataset: Dataset,
        params: &ListParams,
        cursor: Option<&str>,
    ) -> Result<Page<Record>> {
        let offset = parse_cursor(cursor)?;
        let limit = params.limit.max(1);

        let mut sql = String::from("SELECT id, fields FROM records WHERE dataset = ?");
        let mut args = vec![Value::Text(dataset.as_str().to_owned())];

        for (param, values) in &params.filters {
            let values = values
                .iter()
                .map(|value| value.trim())
                .filter(|value| !value.is_empty())
                .collect::<Vec<_>>();
            if values.is_empty() {
                continue;
            }
            let Some(binding) = dataset
                .filters()
                .iter()
                .find(|binding| binding.param == param)
            else {
                log::debug!("{dataset}: ignoring unknown filter parameter {param}");
                continue;
            };
            let Some(spec) = dataset.field(binding.field) else {
                continue;
            };
            let target = "json_extract(fields, ?)";
            args.push(Value::Text(json_path(spec.name)));
            match binding.op {
                FilterOp::Like => {
                    let clauses = vec![format!("{target} LIKE ?"); values.len()];
                    sql.push_str(&format!(" AND ({})", clauses.join(" OR ")));
                    for (index, value) in values.iter().enumerate() {
                        if index > 0 {
                            args.push(Value::Text(json_path(spec.name)));
                        }
                        args.push(Value::Text(format!("%{value}%")));
                    }
                }
                FilterOp::In => {
                    let marks = vec!["?"; values.len()].join(", ");
                    sql.push_str(&format!(" AND {target} IN ({marks})"));
                    for value in &values {
                        args.push(sql_value(spec, value)?);
                    }
                }
                FilterOp::AtLeast | FilterOp::AtMost | FilterOp::Equals => {
                    let op = match binding.op {
                        FilterOp::AtLeast => ">=",
                        FilterOp::AtMost => "<=",
                        _ => "=",
                    };
                    sql.push_str(&format!(" AND {target} {op} ?"));
                    args.push(sql_value(spec, values[0])?);
                }
            }
        }

        match &params.sort {
            Some(sort) if dataset.field(&sort.sort_by).is_some() => {
                let direction = match sort.sort_order {
                    SortOrder::Asc => "ASC",
                    SortOrder::Desc => "DESC",
                };
                sql.push_str(&format!(
                    " ORDER BY json_extract(fields, ?) {direction}, id ASC"
                ));
                args.push(Value::Text(json_path(&sort.sort_by)));
            }
            Some(sort) => {
                log::debug!("{dataset}: ignoring sort by unknown field {}", sort.sort_by);
                sql.push_str(" ORDER BY id ASC");
            }
            None => sql.push_str(" ORDER BY id ASC"),
        }

        sql.push_str(" LIMIT ? OFFSET ?");
        args.push(Value::Integer(i64::try_from(limit + 1).unwrap_or(i64::MAX)));
        args.push(Value::Integer(i64::try_from(offset).unwrap_or(i64::MAX)));

        let mut stmt = self
            .conn
            .prepare(&sql)
            .with_context(|| format!("prepare {dataset} page query"))?;
        let rows = stmt
            .query_map(params_from_iter(args.iter()), |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })
            .with_context(|| format!("query {dataset} page"))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .with_context(|| format!("collect {dataset} page"))?;

        let has_more = rows.len() > limit;
        let mut items = Vec::with_capacity(limit);
        for (id, raw) in rows.into_iter().take(limit) {
            items.push(Record {
                id: RowId::Int(id),
                fields: decode_fields(&raw).with_context(|| format!("{dataset} record {id}"))?,
            });
        }
        let next_cursor = has_more.then(|| (offset + items.len()).to_string());
        Ok(Page { items, next_cursor })
    }

    pub fn get_record(&self, dataset: Dataset, id: &RowId) -> Result<Option<Record>> {
        let id = int_id(id)?;
        let raw = self
            .conn
            .query_row(
                "SELECT fields FROM records WHERE dataset = ? AND id = ?",
                params![dataset.as_str(), id],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .with_context(|| format!("load {dataset} record {id}"))?;
        raw.map(|raw| {
            Ok(Record {
                id: RowId::Int(id),
                fields: decode_fields(&raw)?,
            })
        })
        .transpose()
    }

    /// Stores a new record under the next free id and returns that id.
    pub fn insert_record(&self, dataset: Dataset, record: &Record) -> Result<RowId> {
        let fields = encode_fields(&record.fields)?;
        let now = now_rfc3339()?;
        let id: i64 = self
            .conn
            .query_row(
                "SELECT COALESCE(MAX(id), 0) + 1 FROM records WHERE dataset = ?",
                [dataset.as_str()],
                |row| row.get(0),
            )
            .with_context(|| format!("allocate {dataset} record id"))?;
        self.conn
            .execute(
                "
                INSERT INTO records (dataset, id, fields, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?)
                ",
                params![dataset.as_str(), id, fields, now, now],
            )
            .with_context(|| format!("insert {dataset} record"))?;
        Ok(RowId::Int(id))
    }

    /// Merges a patch into a stored record and returns the stored result.
    ///
    /// Values of the wrong kind and negative counts are rejected with a
    /// [`CommitFailure`] naming each offending field; callers can recover it
    /// with `downcast_ref`.
    pub fn update_record(&self, dataset: Dataset, id: &RowId, patch: &Patch) -> Result<Record> {
        if let Some(failure) = validate_patch(dataset, patch)? {
            return Err(anyhow::Error::new(failure))
                .with_context(|| format!("update {dataset} record {id}"));
        }
        let Some(current) = self.get_record(dataset, id)? else {
            bail!("{dataset} record {id} no longer exists; reload the page");
        };
        let merged = current.merged(patch);
        let fields = encode_fields(&merged.fields)?;
        let now = now_rfc3339()?;
        self.conn
            .execute(
                "UPDATE records SET fields = ?, updated_at = ? WHERE dataset = ? AND id = ?",
                params![fields, now, dataset.as_str(), int_id(id)?],
            )
            .with_context(|| format!("update {dataset} record {id}"))?;
        log::debug!("updated {dataset} record {id} ({} field(s))", patch.len());
        Ok(merged)
    }

    pub fn delete_record(&self, dataset: Dataset, id: &RowId) -> Result<()> {
        let affected = self
            .conn
            .execute(
                "DELETE FROM records WHERE dataset = ? AND id = ?",
                params![dataset.as_str(), int_id(id)?],
            )
            .with_context(|| format!("delete {dataset} record {id}"))?;
        if affected == 0 {
            bail!("{dataset} record {id} no longer exists");
        }
        log::debug!("deleted {dataset} record {id}");
        Ok(())
    }

    pub fn count_records(&self, dataset: Dataset) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM records WHERE dataset = ?",
                [dataset.as_str()],
                |row| row.get(0),
            )
            .with_context(|| format!("count {dataset} records"))?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    /// Sorted distinct non-empty values of one field, for pickers.
    pub fn distinct_values(&self, dataset: Dataset, field: &str) -> Result<Vec<String>> {
        if dataset.field(field).is_none() {
            bail!("{dataset} has no field `{field}`");
        }
        let mut stmt = self
            .conn
            .prepare(
                "
                SELECT DISTINCT json_extract(fields, ?) AS value
                FROM records
                WHERE dataset = ? AND value IS NOT NULL
                ORDER BY value ASC
                ",
            )
            .with_context(|| format!("prepare distinct {field} query"))?;
        let mut rows = stmt
            .query(params![json_path(field), dataset.as_str()])
            .with_context(|| format!("query distinct {dataset} {field}"))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().context("read distinct value")? {
            let value = value_ref_to_string(row.get_ref(0)?);
            if !value.is_empty() {
                out.push(value);
            }
        }
        Ok(out)
    }

    /// Distinct value pairs of two fields, for pickers that narrow by another
    /// column's filter.
    pub fn distinct_pairs(
        &self,
        dataset: Dataset,
        first: &str,
        second: &str,
    ) -> Result<Vec<(String, String)>> {
        for name in [first, second] {
            if dataset.field(name).is_none() {
                bail!("{dataset} has no field `{name}`");
            }
        }
        let mut stmt = self
            .conn
            .prepare(
                "
                SELECT DISTINCT json_extract(fields, ?) AS a, json_extract(fields, ?) AS b
                FROM records
                WHERE dataset = ? AND a IS NOT NULL AND b IS NOT NULL
                ORDER BY a ASC, b ASC
                ",
            )
            .with_context(|| format!("prepare distinct {first}/{second} query"))?;
        let mut rows = stmt
            .query(params![json_path(first), json_path(second), dataset.as_str()])
            .with_context(|| format!("query distinct {dataset} {first}/{second}"))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().context("read distinct pair")? {
            out.push((
                value_ref_to_string(row.get_ref(0)?),
                value_ref_to_string(row.get_ref(1)?),
            ));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::{Dataset, FilterOp, json_path, validate_patch};
    use celda_grid::{CellError, CellValue, ColumnId, Patch};

    #[test]
    fn datasets_parse_case_insensitively() {
        assert_eq!(Dataset::parse(" Expenses "), Some(Dataset::Expenses));
        assert_eq!(Dataset::parse("circulation"), Some(Dataset::Circulation));
        assert_eq!(Dataset::parse("payroll"), None);
    }

    #[test]
    fn every_filter_binds_a_known_field() {
        for dataset in Dataset::ALL {
            for binding in dataset.filters() {
                assert!(dataset.field(binding.field).is_some(), "{}", binding.param);
            }
        }
        assert!(
            Dataset::Expenses
                .filters()
                .iter()
                .any(|binding| binding.op == FilterOp::Equals)
        );
    }

    #[test]
    fn json_path_quotes_field_names() {
        assert_eq!(json_path("print_run"), "$.\"print_run\".v");
    }

    #[test]
    fn negative_counts_are_rejected_per_field() -> anyhow::Result<()> {
        let mut patch = Patch::new();
        patch.insert(ColumnId::from("sold"), CellValue::Int(-4));
        patch.insert(ColumnId::from("product"), CellValue::text("Evening Post"));
        let failure = validate_patch(Dataset::Circulation, &patch)?;
        let fields = failure.and_then(|failure| failure.fields).unwrap_or_default();
        assert_eq!(fields.len(), 1);
        assert!(matches!(
            fields.get(&ColumnId::from("sold")),
            Some(CellError::Message(_))
        ));
        Ok(())
    }

    #[test]
    fn unknown_fields_are_errors() {
        let mut patch = Patch::new();
        patch.insert(ColumnId::from("salary"), CellValue::Int(1));
        assert!(validate_patch(Dataset::Expenses, &patch).is_err());
    }
}
