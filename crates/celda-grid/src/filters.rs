// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use crate::{ColumnId, ColumnNode, FilterKind, FilterSpec, flatten_columns};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Server query parameters: parameter name to values. Empty values never appear.
pub type ServerFilters = BTreeMap<String, Vec<String>>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    Bool(bool),
    Text(String),
    Multi(Vec<String>),
    DateRange(DateRange),
}

impl FilterValue {
    fn scalar(&self) -> Option<String> {
        match self {
            Self::Text(value) => Some(value.trim().to_owned()),
            Self::Bool(value) => Some(value.to_string()),
            Self::Multi(values) => values.iter().find(|value| !value.is_empty()).cloned(),
            Self::DateRange(_) => None,
        }
    }

    fn strings(&self) -> Vec<String> {
        match self {
            Self::Multi(values) => values
                .iter()
                .filter(|value| !value.is_empty())
                .cloned()
                .collect(),
            other => other
                .scalar()
                .filter(|value| !value.is_empty())
                .into_iter()
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnFilter {
    pub id: ColumnId,
    pub value: FilterValue,
}

impl ColumnFilter {
    pub fn new(id: impl Into<ColumnId>, value: FilterValue) -> Self {
        Self {
            id: id.into(),
            value,
        }
    }
}

pub type ColumnFilters = Vec<ColumnFilter>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortEntry {
    pub id: ColumnId,
    pub desc: bool,
}

impl SortEntry {
    pub fn asc(id: impl Into<ColumnId>) -> Self {
        Self {
            id: id.into(),
            desc: false,
        }
    }

    pub fn desc(id: impl Into<ColumnId>) -> Self {
        Self {
            id: id.into(),
            desc: true,
        }
    }
}

pub type Sorting = Vec<SortEntry>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Asc => "asc",
            Self::Desc => "desc",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerSort {
    pub sort_by: String,
    pub sort_order: SortOrder,
}

/// Filter declaration per leaf column; `None` for columns without one.
pub type FilterMetaIndex = BTreeMap<ColumnId, Option<FilterSpec>>;

pub fn filter_meta_by_id(columns: &[ColumnNode]) -> FilterMetaIndex {
    flatten_columns(columns)
        .into_iter()
        .map(|column| (column.id.clone(), column.filter.clone()))
        .collect()
}

/// Only the first sort entry maps to server form.
pub fn map_sorting_to_server(sorting: &[SortEntry]) -> Option<ServerSort> {
    let first = sorting.first()?;
    Some(ServerSort {
        sort_by: first.id.to_string(),
        sort_order: if first.desc {
            SortOrder::Desc
        } else {
            SortOrder::Asc
        },
    })
}

fn first_value<'a>(server: &'a ServerFilters, key: &str) -> Option<&'a str> {
    server
        .get(key)
        .and_then(|values| values.first())
        .map(String::as_str)
        .filter(|value| !value.is_empty())
}

/// Hydrates client filter state from server-declared filters, using each
/// column's declared kind to pick parameter names and value shape.
pub fn from_server_to_column_filters(
    columns: &[ColumnNode],
    server: &ServerFilters,
) -> ColumnFilters {
    let mut out = ColumnFilters::new();

    for column in flatten_columns(columns) {
        let id = &column.id;
        let Some(spec) = &column.filter else {
            let values = server
                .get(id.as_str())
                .map(|values| {
                    values
                        .iter()
                        .filter(|value| !value.is_empty())
                        .cloned()
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default();
            if !values.is_empty() {
                out.push(ColumnFilter::new(id.clone(), FilterValue::Multi(values)));
            }
            continue;
        };

        match &spec.kind {
            FilterKind::Text { param } => {
                let key = param.as_deref().unwrap_or(id.as_str());
                if let Some(value) = first_value(server, key) {
                    out.push(ColumnFilter::new(
                        id.clone(),
                        FilterValue::Text(value.to_owned()),
                    ));
                }
            }
            FilterKind::MultiSelect { param, .. } => {
                let values = server
                    .get(param)
                    .map(|values| {
                        values
                            .iter()
                            .filter(|value| !value.is_empty())
                            .cloned()
                            .collect::<Vec<_>>()
                    })
                    .unwrap_or_default();
                if !values.is_empty() {
                    out.push(ColumnFilter::new(id.clone(), FilterValue::Multi(values)));
                }
            }
            FilterKind::DateRange { from_key, to_key } => {
                let from = first_value(server, from_key).map(str::to_owned);
                let to = first_value(server, to_key).map(str::to_owned);
                if from.is_some() || to.is_some() {
                    out.push(ColumnFilter::new(
                        id.clone(),
                        FilterValue::DateRange(DateRange { from, to }),
                    ));
                }
            }
            FilterKind::Boolean { param, .. } => {
                let key = param.as_deref().unwrap_or(id.as_str());
                let parsed = first_value(server, key)
                    .map(|value| value.trim().to_ascii_lowercase())
                    .and_then(|value| match value.as_str() {
                        "true" => Some(true),
                        "false" => Some(false),
                        _ => None,
                    });
                if let Some(value) = parsed {
                    out.push(ColumnFilter::new(id.clone(), FilterValue::Bool(value)));
                }
            }
        }
    }

    out
}

/// Translates client filter state to server parameters. Pure and
/// deterministic; empty values are omitted.
pub fn map_filters_to_server(meta: &FilterMetaIndex, filters: &[ColumnFilter]) -> ServerFilters {
    let mut out = ServerFilters::new();

    for filter in filters {
        let spec = meta.get(&filter.id).and_then(Option::as_ref);
        let Some(spec) = spec else {
            if let FilterValue::DateRange(range) = &filter.value {
                insert_range(
                    &mut out,
                    &format!("{}_from", filter.id),
                    &format!("{}_to", filter.id),
                    range,
                );
                continue;
            }
            let values = filter.value.strings();
            if !values.is_empty() {
                out.insert(filter.id.to_string(), values);
            }
            continue;
        };

        match &spec.kind {
            FilterKind::Text { param } => {
                let key = param.clone().unwrap_or_else(|| filter.id.to_string());
                if let Some(value) = filter.value.scalar().filter(|value| !value.is_empty()) {
                    out.insert(key, vec![value]);
                }
            }
            FilterKind::MultiSelect { param, .. } => {
                let values = filter.value.strings();
                if !values.is_empty() {
                    out.insert(param.clone(), values);
                }
            }
            FilterKind::DateRange { from_key, to_key } => {
                if let FilterValue::DateRange(range) = &filter.value {
                    insert_range(&mut out, from_key, to_key, range);
                }
            }
            FilterKind::Boolean { param, .. } => {
                let key = param.clone().unwrap_or_else(|| filter.id.to_string());
                let value = match &filter.value {
                    FilterValue::Bool(value) => Some(value.to_string()),
                    FilterValue::Text(raw) => {
                        let lowered = raw.trim().to_ascii_lowercase();
                        matches!(lowered.as_str(), "true" | "false").then_some(lowered)
                    }
                    FilterValue::Multi(_) | FilterValue::DateRange(_) => None,
                };
                if let Some(value) = value {
                    out.insert(key, vec![value]);
                }
            }
        }
    }

    out
}

fn insert_range(out: &mut ServerFilters, from_key: &str, to_key: &str, range: &DateRange) {
    if let Some(from) = range.from.as_ref().filter(|value| !value.is_empty()) {
        out.insert(from_key.to_owned(), vec![from.clone()]);
    }
    if let Some(to) = range.to.as_ref().filter(|value| !value.is_empty()) {
        out.insert(to_key.to_owned(), vec![to.clone()]);
    }
}

#[cfg(test)]
mod tests {
    use super::{
        ColumnFilter, DateRange, FilterValue, ServerFilters, ServerSort, SortEntry, SortOrder,
        filter_meta_by_id, from_server_to_column_filters, map_filters_to_server,
        map_sorting_to_server,
    };
    use crate::{ColumnDef, ColumnNode, FilterOption, FilterSpec, OptionsSource, ValueKind};

    fn columns() -> Vec<ColumnNode> {
        vec![
            ColumnDef::data("title", "Title", ValueKind::Text)
                .filter(FilterSpec::text())
                .into(),
            ColumnDef::data("company", "Company", ValueKind::Text)
                .filter(FilterSpec::multi_select(
                    "empresa",
                    OptionsSource::Static(vec![FilterOption::new("Acme", "AC")]),
                ))
                .into(),
            ColumnDef::data("date", "Date", ValueKind::Date)
                .filter(FilterSpec::date_range("date_from", "date_to"))
                .into(),
            ColumnDef::data("paid", "Paid", ValueKind::Bool)
                .filter(FilterSpec::boolean().with_param("is_paid"))
                .into(),
            ColumnDef::data("notes", "Notes", ValueKind::Text).into(),
        ]
    }

    fn server(pairs: &[(&str, &[&str])]) -> ServerFilters {
        pairs
            .iter()
            .map(|(key, values)| {
                (
                    (*key).to_owned(),
                    values.iter().map(|value| (*value).to_owned()).collect(),
                )
            })
            .collect()
    }

    #[test]
    fn hydrate_then_translate_reproduces_server_map() {
        let columns = columns();
        let original = server(&[
            ("title", &["ink"]),
            ("empresa", &["AC", "BX"]),
            ("date_from", &["2024-01-01"]),
            ("date_to", &["2024-02-01"]),
            ("is_paid", &["false"]),
            ("notes", &["a", "b"]),
        ]);

        let hydrated = from_server_to_column_filters(&columns, &original);
        let back = map_filters_to_server(&filter_meta_by_id(&columns), &hydrated);
        assert_eq!(back, original);
    }

    #[test]
    fn empty_values_are_omitted_both_ways() {
        let columns = columns();
        let original = server(&[
            ("title", &[""]),
            ("empresa", &[]),
            ("date_from", &["2024-01-01"]),
            ("is_paid", &["maybe"]),
        ]);

        let hydrated = from_server_to_column_filters(&columns, &original);
        assert_eq!(
            hydrated,
            vec![ColumnFilter::new(
                "date",
                FilterValue::DateRange(DateRange {
                    from: Some("2024-01-01".to_owned()),
                    to: None,
                }),
            )]
        );
        let back = map_filters_to_server(&filter_meta_by_id(&columns), &hydrated);
        assert_eq!(back, server(&[("date_from", &["2024-01-01"])]));
    }

    #[test]
    fn text_values_are_trimmed_and_blank_multi_select_dropped() {
        let columns = columns();
        let filters = vec![
            ColumnFilter::new("title", FilterValue::Text("  ink  ".to_owned())),
            ColumnFilter::new("company", FilterValue::Multi(vec![String::new()])),
            ColumnFilter::new("paid", FilterValue::Text(" TRUE ".to_owned())),
        ];
        let out = map_filters_to_server(&filter_meta_by_id(&columns), &filters);
        assert_eq!(out, server(&[("title", &["ink"]), ("is_paid", &["true"])]));
    }

    #[test]
    fn only_first_sort_entry_is_sent() {
        assert_eq!(map_sorting_to_server(&[]), None);
        assert_eq!(
            map_sorting_to_server(&[SortEntry::desc("fecha"), SortEntry::asc("mes")]),
            Some(ServerSort {
                sort_by: "fecha".to_owned(),
                sort_order: SortOrder::Desc,
            })
        );
    }

    #[test]
    fn filter_values_deserialize_by_shape() -> anyhow::Result<()> {
        let raw = r#"[{"id":"a","value":true},{"id":"b","value":"x"},{"id":"c","value":["1"]},{"id":"d","value":{"from":"2024-01-01"}}]"#;
        let parsed: Vec<ColumnFilter> = serde_json::from_str(raw)?;
        assert_eq!(parsed[0].value, FilterValue::Bool(true));
        assert_eq!(parsed[1].value, FilterValue::Text("x".to_owned()));
        assert_eq!(parsed[2].value, FilterValue::Multi(vec!["1".to_owned()]));
        assert!(matches!(parsed[3].value, FilterValue::DateRange(_)));
        Ok(())
    }
}
