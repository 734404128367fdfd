// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::Result;
use celda_db::{Dataset, SqlitePrefsStore, Store};
use celda_grid::{ListParams, Page, Patch, Record, RowId};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// One connection shared by the runtime and the catalog loaders.
pub type SharedStore = Arc<Mutex<Store>>;

pub struct DbRuntime {
    store: SharedStore,
    dataset: Dataset,
    prefs: SqlitePrefsStore,
}

impl DbRuntime {
    pub fn new(store: SharedStore, dataset: Dataset, prefs: SqlitePrefsStore) -> Self {
        Self {
            store,
            dataset,
            prefs,
        }
    }

    fn store(&self) -> MutexGuard<'_, Store> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl celda_tui::GridRuntime for DbRuntime {
    type Prefs = SqlitePrefsStore;

    fn fetch_page(&mut self, params: &ListParams, cursor: Option<&str>) -> Result<Page<Record>> {
        self.store().list_page(self.dataset, params, cursor)
    }

    fn commit_row(&mut self, row_id: &RowId, patch: &Patch) -> Result<Record> {
        log::debug!("saving {} field(s) of {} row {row_id}", patch.len(), self.dataset);
        self.store().update_record(self.dataset, row_id, patch)
    }

    fn delete_row(&mut self, row_id: &RowId) -> Result<()> {
        log::debug!("deleting {} row {row_id}", self.dataset);
        self.store().delete_record(self.dataset, row_id)
    }

    fn prefs(&mut self) -> &mut SqlitePrefsStore {
        &mut self.prefs
    }
}
