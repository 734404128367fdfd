// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Context, Result};
use celda_grid::{
    CellKey, ColumnDef, ColumnNode, FilterSpec, FocusSurface, OptionsSource, PrefsStore,
    ScrollAlign, StorageChange, ValueKind, deletion_column, selection_column,
};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use time::{Date, macros::date};

pub use celda_db::demo::{RecordFaker, campaigns, companies, concepts, products};

/// Two editable data columns between the selection and deletion controls.
pub fn plain_columns() -> Vec<ColumnNode> {
    vec![
        selection_column("Select").into(),
        ColumnDef::data("name", "Name", ValueKind::Text)
            .editable()
            .filter(FilterSpec::text_param("q"))
            .into(),
        ColumnDef::data("qty", "Qty", ValueKind::Int)
            .editable()
            .into(),
        deletion_column("Delete").into(),
    ]
}

pub fn circulation_columns() -> Vec<ColumnNode> {
    vec![
        selection_column("Select").into(),
        ColumnDef::data("company", "Company", ValueKind::Text)
            .filter(FilterSpec::multi_select(
                "companies",
                OptionsSource::Static(companies()),
            ))
            .into(),
        ColumnDef::data("product", "Product", ValueKind::Text)
            .filter(FilterSpec::text())
            .into(),
        ColumnNode::Group {
            title: "Period".to_owned(),
            columns: vec![
                ColumnDef::data("year", "Year", ValueKind::Int).width(70).into(),
                ColumnDef::data("month", "Month", ValueKind::Int).width(70).into(),
                ColumnDef::data("date", "Date", ValueKind::Date)
                    .filter(FilterSpec::date_range("date_from", "date_to"))
                    .into(),
            ],
        },
        ColumnNode::Group {
            title: "Copies".to_owned(),
            columns: vec![
                ColumnDef::data("sold", "Sold", ValueKind::Int).editable().into(),
                ColumnDef::data("free", "Free", ValueKind::Int).editable().into(),
                ColumnDef::data("paid", "Paid", ValueKind::Int).editable().into(),
                ColumnDef::data("print_run", "Print run", ValueKind::Int)
                    .editable()
                    .create_only()
                    .into(),
            ],
        },
        deletion_column("Delete").into(),
    ]
}

pub fn expense_columns() -> Vec<ColumnNode> {
    vec![
        selection_column("Select").into(),
        ColumnDef::data("campaign", "Campaign", ValueKind::Text)
            .filter(FilterSpec::text())
            .into(),
        ColumnDef::data("concept", "Concept", ValueKind::Text)
            .editable()
            .into(),
        ColumnDef::data("date", "Date", ValueKind::Date)
            .editable()
            .filter(FilterSpec::date_range("date_from", "date_to"))
            .into(),
        ColumnDef::data("amount", "Amount", ValueKind::Decimal)
            .editable()
            .into(),
        ColumnDef::data("paid", "Paid", ValueKind::Bool)
            .editable()
            .filter(FilterSpec::boolean())
            .into(),
        deletion_column("Delete").into(),
    ]
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceCall {
    Scroll { index: usize, align: ScrollAlign },
    Focus(CellKey),
    ScrollIntoView(CellKey),
    FocusInteractive(CellKey),
}

/// Focus surface that records every call. Cells listed in `unmounted` refuse
/// focus the way a virtualized-away cell would.
#[derive(Debug, Default)]
pub struct RecordingSurface {
    pub calls: Vec<SurfaceCall>,
    pub unmounted: BTreeSet<CellKey>,
}

impl RecordingSurface {
    pub fn focused(&self) -> Vec<&CellKey> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                SurfaceCall::Focus(key) => Some(key),
                _ => None,
            })
            .collect()
    }

    pub fn scrolls(&self) -> Vec<usize> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                SurfaceCall::Scroll { index, .. } => Some(*index),
                _ => None,
            })
            .collect()
    }
}

impl FocusSurface for RecordingSurface {
    fn scroll_to_index(&mut self, index: usize, align: ScrollAlign) {
        self.calls.push(SurfaceCall::Scroll { index, align });
    }

    fn focus_cell(&mut self, key: &CellKey) -> bool {
        if self.unmounted.contains(key) {
            return false;
        }
        self.calls.push(SurfaceCall::Focus(key.clone()));
        true
    }

    fn scroll_cell_into_view(&mut self, key: &CellKey) {
        self.calls.push(SurfaceCall::ScrollIntoView(key.clone()));
    }

    fn focus_first_interactive(&mut self, key: &CellKey) -> bool {
        if self.unmounted.contains(key) {
            return false;
        }
        self.calls.push(SurfaceCall::FocusInteractive(key.clone()));
        true
    }
}

#[derive(Debug, Default)]
struct MemoryBackend {
    entries: BTreeMap<String, String>,
    log: Vec<(u64, StorageChange)>,
    writers: u64,
}

/// In-memory [`PrefsStore`]. Handles made with [`MemoryPrefsStore::handle`]
/// share the entries and see each other's writes as changes, like two
/// processes over the same database.
#[derive(Debug)]
pub struct MemoryPrefsStore {
    backend: Arc<Mutex<MemoryBackend>>,
    writer: u64,
    cursor: usize,
}

impl Default for MemoryPrefsStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryPrefsStore {
    pub fn new() -> Self {
        Self {
            backend: Arc::new(Mutex::new(MemoryBackend {
                writers: 1,
                ..MemoryBackend::default()
            })),
            writer: 0,
            cursor: 0,
        }
    }

    pub fn handle(&self) -> Self {
        let mut backend = self.backend.lock().unwrap_or_else(PoisonError::into_inner);
        let writer = backend.writers;
        backend.writers += 1;
        Self {
            backend: Arc::clone(&self.backend),
            writer,
            cursor: backend.log.len(),
        }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        let backend = self.backend.lock().unwrap_or_else(PoisonError::into_inner);
        backend.entries.get(key).cloned()
    }

    pub fn remove(&mut self, key: &str) {
        let mut backend = self.backend.lock().unwrap_or_else(PoisonError::into_inner);
        backend.entries.remove(key);
        let change = StorageChange {
            key: key.to_owned(),
            new_value: None,
        };
        backend.log.push((self.writer, change));
    }
}

impl PrefsStore for MemoryPrefsStore {
    fn load(&mut self, key: &str) -> Result<Option<String>> {
        Ok(self.get(key))
    }

    fn save(&mut self, key: &str, raw: &str) -> Result<()> {
        let mut backend = self.backend.lock().unwrap_or_else(PoisonError::into_inner);
        backend.entries.insert(key.to_owned(), raw.to_owned());
        let change = StorageChange {
            key: key.to_owned(),
            new_value: Some(raw.to_owned()),
        };
        backend.log.push((self.writer, change));
        Ok(())
    }

    fn poll_changes(&mut self) -> Result<Vec<StorageChange>> {
        let backend = self.backend.lock().unwrap_or_else(PoisonError::into_inner);
        let changes = backend.log[self.cursor..]
            .iter()
            .filter(|(writer, _)| *writer != self.writer)
            .map(|(_, change)| change.clone())
            .collect();
        self.cursor = backend.log.len();
        Ok(changes)
    }
}

pub fn temp_db_path() -> Result<(tempfile::TempDir, PathBuf)> {
    let dir = tempfile::tempdir().context("create temp dir")?;
    let db_path = dir.path().join("celda.db");
    Ok((dir, db_path))
}

pub fn fixture_date() -> Date {
    date!(2026-02-19)
}
