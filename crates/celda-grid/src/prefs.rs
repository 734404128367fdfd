// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use crate::{
    ColumnId, ColumnSizing, Debounce, GridRow, TableChange, TableCore, Updater, VisibilityState,
};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::{Duration, Instant};

pub const DEFAULT_PREFS_DEBOUNCE: Duration = Duration::from_millis(250);

/// Persisted column layout. Field names match what other readers of the same
/// key expect.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TablePrefs {
    pub v: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column_visibility: Option<VisibilityState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column_order: Option<Vec<ColumnId>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column_sizing: Option<ColumnSizing>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageChange {
    pub key: String,
    pub new_value: Option<String>,
}

/// Keyed string storage shared between grid instances.
pub trait PrefsStore {
    fn load(&mut self, key: &str) -> Result<Option<String>>;
    fn save(&mut self, key: &str, raw: &str) -> Result<()>;
    /// Writes made through other handles since the last call. Own writes are
    /// not reported.
    fn poll_changes(&mut self) -> Result<Vec<StorageChange>>;
}

pub fn prefs_key(persist_key: &str, version: u32) -> Option<String> {
    let persist_key = persist_key.trim();
    if persist_key.is_empty() {
        return None;
    }
    Some(format!("datatable:{persist_key}:v{version}"))
}

fn parse_prefs(raw: Option<&str>) -> Option<TablePrefs> {
    let raw = raw?;
    match serde_json::from_str(raw) {
        Ok(prefs) => Some(prefs),
        Err(err) => {
            log::warn!("ignoring unreadable column preferences: {err}");
            None
        }
    }
}

/// Saved order restricted to known ids, with unknown ones dropped and missing
/// ones appended in declaration order.
pub fn merge_order(ids: &[ColumnId], saved: &[ColumnId]) -> Vec<ColumnId> {
    if saved.is_empty() {
        return ids.to_vec();
    }
    let known = ids.iter().collect::<BTreeSet<_>>();
    let mut out = Vec::with_capacity(ids.len());
    for id in saved {
        if known.contains(id) && !out.contains(id) {
            out.push(id.clone());
        }
    }
    for id in ids {
        if !out.contains(id) {
            out.push(id.clone());
        }
    }
    out
}

pub fn filter_sizing(ids: &[ColumnId], saved: &ColumnSizing) -> ColumnSizing {
    saved
        .iter()
        .filter(|(id, _)| ids.contains(id))
        .map(|(id, width)| (id.clone(), *width))
        .collect()
}

pub fn filter_visibility(ids: &[ColumnId], saved: &VisibilityState) -> VisibilityState {
    saved
        .iter()
        .filter(|(id, _)| ids.contains(id))
        .map(|(id, visible)| (id.clone(), *visible))
        .collect()
}

/// Binds a table's column layout to a [`PrefsStore`] key: restores on mount,
/// saves debounced after changes, and follows writes from other handles.
#[derive(Debug)]
pub struct PrefsBinding {
    key: Option<String>,
    version: u32,
    save: Debounce<()>,
    seen: (u64, u64, u64),
}

impl PrefsBinding {
    pub fn new(persist_key: Option<&str>, version: u32, delay: Duration) -> Self {
        Self {
            key: persist_key.and_then(|key| prefs_key(key, version)),
            version,
            save: Debounce::new(delay),
            seen: (0, 0, 0),
        }
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    fn revisions<T: GridRow>(table: &TableCore<T>) -> (u64, u64, u64) {
        let revisions = table.revisions();
        (
            revisions.column_visibility,
            revisions.column_order,
            revisions.column_sizing,
        )
    }

    fn apply<T: GridRow>(&mut self, table: &mut TableCore<T>, prefs: &TablePrefs) {
        let ids = table.leaf_column_ids();
        if let Some(visibility) = &prefs.column_visibility {
            let next = filter_visibility(&ids, visibility);
            table.dispatch(TableChange::ColumnVisibility(Updater::Set(next)));
        }
        if let Some(order) = &prefs.column_order {
            let next = merge_order(&ids, order);
            table.dispatch(TableChange::ColumnOrder(Updater::Set(next)));
        }
        if let Some(sizing) = &prefs.column_sizing {
            let next = filter_sizing(&ids, sizing);
            table.dispatch(TableChange::ColumnSizing(Updater::Set(next)));
        }
        self.seen = Self::revisions(table);
    }

    pub fn restore<T: GridRow>(
        &mut self,
        table: &mut TableCore<T>,
        store: &mut impl PrefsStore,
    ) -> Result<()> {
        let Some(key) = self.key.clone() else {
            return Ok(());
        };
        let raw = store
            .load(&key)
            .with_context(|| format!("load column preferences {key}"))?;
        if let Some(prefs) = parse_prefs(raw.as_deref()) {
            self.apply(table, &prefs);
        }
        Ok(())
    }

    pub fn observe<T: GridRow>(&mut self, table: &TableCore<T>, now: Instant) {
        if self.key.is_none() {
            return;
        }
        let current = Self::revisions(table);
        if current != self.seen {
            self.seen = current;
            self.save.push((), now);
        }
    }

    pub fn snapshot<T: GridRow>(&self, table: &TableCore<T>) -> TablePrefs {
        let state = table.state();
        TablePrefs {
            v: self.version,
            column_visibility: Some(state.column_visibility.clone()),
            column_order: Some(state.column_order.clone()),
            column_sizing: Some(state.column_sizing.clone()),
        }
    }

    /// Writes the layout once the debounce window has passed. Returns whether
    /// anything was written.
    pub fn flush<T: GridRow>(
        &mut self,
        table: &TableCore<T>,
        store: &mut impl PrefsStore,
        now: Instant,
    ) -> Result<bool> {
        let Some(key) = self.key.as_deref() else {
            return Ok(false);
        };
        if self.save.poll(now).is_none() {
            return Ok(false);
        }
        self.write(table, store, key)?;
        Ok(true)
    }

    /// Writes a save still inside its debounce window right away.
    pub fn flush_pending<T: GridRow>(
        &mut self,
        table: &TableCore<T>,
        store: &mut impl PrefsStore,
    ) -> Result<bool> {
        let Some(key) = self.key.as_deref() else {
            return Ok(false);
        };
        if self.save.cancel().is_none() {
            return Ok(false);
        }
        self.write(table, store, key)?;
        Ok(true)
    }

    fn write<T: GridRow>(
        &self,
        table: &TableCore<T>,
        store: &mut impl PrefsStore,
        key: &str,
    ) -> Result<()> {
        let raw = serde_json::to_string(&self.snapshot(table))
            .context("serialize column preferences")?;
        store
            .save(key, &raw)
            .with_context(|| format!("save column preferences {key}"))
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.save.deadline()
    }

    /// Re-hydrates from a write made elsewhere, through the same sanitation as
    /// the initial restore. Returns whether the change applied.
    pub fn on_storage_change<T: GridRow>(
        &mut self,
        table: &mut TableCore<T>,
        change: &StorageChange,
    ) -> bool {
        if self.key.as_deref() != Some(change.key.as_str()) {
            return false;
        }
        let Some(prefs) = parse_prefs(change.new_value.as_deref()) else {
            return false;
        };
        self.apply(table, &prefs);
        true
    }

    pub fn sync_external<T: GridRow>(
        &mut self,
        table: &mut TableCore<T>,
        store: &mut impl PrefsStore,
    ) -> Result<usize> {
        let changes = store.poll_changes().context("poll preference changes")?;
        Ok(changes
            .iter()
            .filter(|change| self.on_storage_change(table, change))
            .count())
    }
}

#[cfg(test)]
mod tests {
    use super::{
        PrefsBinding, PrefsStore, StorageChange, TablePrefs, filter_sizing, merge_order,
        prefs_key,
    };
    use crate::{ColumnDef, ColumnId, ColumnNode, ColumnSizing, Record, TableCore, ValueKind};
    use std::collections::BTreeMap;
    use std::time::{Duration, Instant};

    fn ids(names: &[&str]) -> Vec<ColumnId> {
        names.iter().map(|name| ColumnId::from(*name)).collect()
    }

    #[derive(Default)]
    struct Store {
        values: BTreeMap<String, String>,
        saves: usize,
    }

    impl PrefsStore for Store {
        fn load(&mut self, key: &str) -> anyhow::Result<Option<String>> {
            Ok(self.values.get(key).cloned())
        }

        fn save(&mut self, key: &str, raw: &str) -> anyhow::Result<()> {
            self.saves += 1;
            self.values.insert(key.to_owned(), raw.to_owned());
            Ok(())
        }

        fn poll_changes(&mut self) -> anyhow::Result<Vec<StorageChange>> {
            Ok(Vec::new())
        }
    }

    fn table() -> TableCore<Record> {
        TableCore::new(vec![
            ColumnNode::from(ColumnDef::data("a", "A", ValueKind::Text)),
            ColumnDef::data("b", "B", ValueKind::Text).into(),
            ColumnDef::data("c", "C", ValueKind::Text).into(),
        ])
    }

    #[test]
    fn merge_order_drops_unknown_and_appends_missing() {
        let merged = merge_order(&ids(&["a", "b", "c", "d"]), &ids(&["c", "x", "a"]));
        assert_eq!(merged, ids(&["c", "a", "b", "d"]));
        assert_eq!(merge_order(&ids(&["a"]), &[]), ids(&["a"]));
    }

    #[test]
    fn sizing_for_unknown_columns_is_dropped() {
        let mut saved = ColumnSizing::new();
        saved.insert(ColumnId::from("a"), 80);
        saved.insert(ColumnId::from("gone"), 90);
        let kept = filter_sizing(&ids(&["a", "b"]), &saved);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept.get("a"), Some(&80));
    }

    #[test]
    fn key_is_namespaced_and_versioned() {
        assert_eq!(prefs_key("ventas", 2).as_deref(), Some("datatable:ventas:v2"));
        assert_eq!(prefs_key("  ", 1), None);
    }

    #[test]
    fn restore_sanitizes_saved_layout() -> anyhow::Result<()> {
        let mut store = Store::default();
        store.values.insert(
            "datatable:t:v1".to_owned(),
            r#"{"v":1,"columnOrder":["c","zz"],"columnVisibility":{"b":false,"zz":false},"columnSizing":{"a":70}}"#
                .to_owned(),
        );
        let mut table = table();
        let mut binding = PrefsBinding::new(Some("t"), 1, Duration::from_millis(250));
        binding.restore(&mut table, &mut store)?;

        assert_eq!(table.state().column_order, ids(&["c", "a", "b"]));
        assert_eq!(table.state().column_visibility.len(), 1);
        assert_eq!(table.state().column_sizing.get("a"), Some(&70));

        binding.observe(&table, Instant::now());
        assert_eq!(binding.next_deadline(), None);
        Ok(())
    }

    #[test]
    fn unreadable_prefs_are_ignored() -> anyhow::Result<()> {
        let mut store = Store::default();
        store
            .values
            .insert("datatable:t:v1".to_owned(), "{not json".to_owned());
        let mut table = table();
        let mut binding = PrefsBinding::new(Some("t"), 1, Duration::from_millis(250));
        binding.restore(&mut table, &mut store)?;
        assert!(table.state().column_order.is_empty());
        Ok(())
    }

    #[test]
    fn changes_save_after_debounce() -> anyhow::Result<()> {
        let mut store = Store::default();
        let mut table = table();
        let mut binding = PrefsBinding::new(Some("t"), 3, Duration::from_millis(250));
        let start = Instant::now();

        table.set_column_size(&ColumnId::from("b"), 99);
        binding.observe(&table, start);
        table.set_column_visibility(&ColumnId::from("c"), false);
        binding.observe(&table, start + Duration::from_millis(100));
        assert!(!binding.flush(&table, &mut store, start + Duration::from_millis(300))?);
        assert!(binding.flush(&table, &mut store, start + Duration::from_millis(350))?);
        assert_eq!(store.saves, 1);

        let saved: TablePrefs = serde_json::from_str(&store.values["datatable:t:v3"])?;
        assert_eq!(saved.v, 3);
        assert_eq!(
            saved.column_sizing.and_then(|sizing| sizing.get("b").copied()),
            Some(99)
        );
        Ok(())
    }

    #[test]
    fn pending_save_can_be_forced() -> anyhow::Result<()> {
        let mut store = Store::default();
        let mut table = table();
        let mut binding = PrefsBinding::new(Some("t"), 1, Duration::from_secs(60));
        assert!(!binding.flush_pending(&table, &mut store)?);

        table.set_column_visibility(&ColumnId::from("a"), false);
        binding.observe(&table, Instant::now());
        assert!(binding.flush_pending(&table, &mut store)?);
        assert!(!binding.flush_pending(&table, &mut store)?);
        assert_eq!(store.saves, 1);
        Ok(())
    }

    #[test]
    fn storage_change_for_other_keys_is_ignored() {
        let mut table = table();
        let mut binding = PrefsBinding::new(Some("t"), 1, Duration::from_millis(250));
        let applied = binding.on_storage_change(
            &mut table,
            &StorageChange {
                key: "datatable:other:v1".to_owned(),
                new_value: Some(r#"{"v":1,"columnOrder":["c"]}"#.to_owned()),
            },
        );
        assert!(!applied);

        let applied = binding.on_storage_change(
            &mut table,
            &StorageChange {
                key: "datatable:t:v1".to_owned(),
                new_value: Some(r#"{"v":1,"columnOrder":["c"]}"#.to_owned()),
            },
        );
        assert!(applied);
        assert_eq!(table.state().column_order, ids(&["c", "a", "b"]));
    }

    #[test]
    fn binding_without_key_never_saves() -> anyhow::Result<()> {
        let mut store = Store::default();
        let mut table = table();
        let mut binding = PrefsBinding::new(None, 1, Duration::from_millis(1));
        let start = Instant::now();
        table.set_column_size(&ColumnId::from("a"), 40);
        binding.observe(&table, start);
        assert!(!binding.flush(&table, &mut store, start + Duration::from_secs(1))?);
        Ok(())
    }
}
