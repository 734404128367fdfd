// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use crate::{FetchFlags, FetchStatus, GridRow, RowId, ServerFilters, ServerSort};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PAGE_SIZE: usize = 40;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListParams {
    pub sort: Option<ServerSort>,
    #[serde(default)]
    pub filters: ServerFilters,
    pub limit: usize,
}

impl Default for ListParams {
    fn default() -> Self {
        Self {
            sort: None,
            filters: ServerFilters::new(),
            limit: DEFAULT_PAGE_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub seq: u64,
    pub cursor: Option<String>,
    pub params: ListParams,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<String>,
}

/// Cursor-paginated item list. Fetching is done by the caller: every load
/// hands back a [`PageRequest`] whose response is fed to [`Pager::receive`].
/// A newer request supersedes an older one, whose response is then dropped.
#[derive(Debug)]
pub struct Pager<T> {
    params: ListParams,
    items: Vec<T>,
    next_cursor: Option<String>,
    has_next_page: bool,
    status: FetchStatus,
    is_fetching: bool,
    is_fetching_next_page: bool,
    error: Option<String>,
    seq: u64,
    in_flight: Option<u64>,
    revision: u64,
}

impl<T: GridRow> Pager<T> {
    pub fn new(limit: usize) -> Self {
        Self {
            params: ListParams {
                limit: limit.max(1),
                ..ListParams::default()
            },
            items: Vec::new(),
            next_cursor: None,
            has_next_page: true,
            status: FetchStatus::Pending,
            is_fetching: false,
            is_fetching_next_page: false,
            error: None,
            seq: 0,
            in_flight: None,
            revision: 0,
        }
    }

    pub fn params(&self) -> &ListParams {
        &self.params
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn has_next_page(&self) -> bool {
        self.has_next_page
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Bumped whenever the item list changes.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn flags(&self) -> FetchFlags {
        FetchFlags {
            status: self.status,
            is_fetching: self.is_fetching,
            is_fetching_next_page: self.is_fetching_next_page,
        }
    }

    pub fn is_loading_anything(&self) -> bool {
        self.is_fetching || self.is_fetching_next_page
    }

    fn request(&mut self, cursor: Option<String>) -> PageRequest {
        self.seq += 1;
        self.in_flight = Some(self.seq);
        self.is_fetching = true;
        self.status = FetchStatus::Pending;
        self.error = None;
        PageRequest {
            seq: self.seq,
            cursor,
            params: self.params.clone(),
        }
    }

    /// Starts over from the first page, superseding anything in flight.
    pub fn load_first_page(&mut self) -> PageRequest {
        self.items.clear();
        self.next_cursor = None;
        self.has_next_page = true;
        self.is_fetching_next_page = false;
        self.revision += 1;
        self.request(None)
    }

    pub fn load_more(&mut self) -> Option<PageRequest> {
        if self.is_fetching || self.is_fetching_next_page || !self.has_next_page {
            return None;
        }
        self.is_fetching_next_page = true;
        let cursor = self.next_cursor.clone();
        Some(self.request(cursor))
    }

    pub fn set_sort(&mut self, sort: Option<ServerSort>) -> PageRequest {
        self.params.sort = sort;
        self.load_first_page()
    }

    pub fn set_filters(&mut self, filters: ServerFilters) -> PageRequest {
        self.params.filters = filters;
        self.load_first_page()
    }

    /// Applies a response. Returns `false` for responses to superseded
    /// requests, which leave the pager untouched.
    pub fn receive(&mut self, seq: u64, result: anyhow::Result<Page<T>>) -> bool {
        if self.in_flight != Some(seq) {
            log::debug!("dropping stale page response {seq}");
            return false;
        }
        self.in_flight = None;
        self.is_fetching = false;
        self.is_fetching_next_page = false;
        match result {
            Ok(page) => {
                self.items.extend(page.items);
                self.has_next_page = page.next_cursor.is_some();
                self.next_cursor = page.next_cursor;
                self.status = FetchStatus::Success;
                self.revision += 1;
            }
            Err(err) => {
                log::warn!("page fetch failed: {err:#}");
                self.error = Some(format!("{err:#}"));
                self.status = FetchStatus::Error;
            }
        }
        true
    }

    /// Replaces the stored item with the same id.
    pub fn apply_update(&mut self, row: T) -> bool {
        let id = row.row_id();
        let Some(slot) = self.items.iter_mut().find(|item| item.row_id() == id) else {
            return false;
        };
        *slot = row;
        self.revision += 1;
        true
    }

    pub fn remove(&mut self, id: &RowId) -> bool {
        let before = self.items.len();
        self.items.retain(|item| &item.row_id() != id);
        let removed = self.items.len() != before;
        if removed {
            self.revision += 1;
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::{Page, Pager};
    use crate::{CellValue, ColumnId, FetchStatus, GridRow, Record, RowId, ServerFilters};

    fn page(ids: std::ops::Range<i64>, next: Option<&str>) -> anyhow::Result<Page<Record>> {
        Ok(Page {
            items: ids.map(Record::new).collect(),
            next_cursor: next.map(str::to_owned),
        })
    }

    #[test]
    fn pages_accumulate_until_cursor_runs_out() {
        let mut pager = Pager::new(2);
        let first = pager.load_first_page();
        assert_eq!(first.cursor, None);
        assert_eq!(first.params.limit, 2);
        assert!(pager.load_more().is_none());
        assert!(pager.receive(first.seq, page(0..2, Some("2"))));

        let more = pager.load_more();
        let Some(more) = more else {
            panic!("expected a next page request");
        };
        assert_eq!(more.cursor.as_deref(), Some("2"));
        assert!(pager.flags().is_fetching_next_page);
        assert!(pager.load_more().is_none());
        pager.receive(more.seq, page(2..3, None));

        assert_eq!(pager.items().len(), 3);
        assert!(!pager.has_next_page());
        assert_eq!(pager.flags().status, FetchStatus::Success);
        assert!(pager.load_more().is_none());
    }

    #[test]
    fn superseded_responses_are_discarded() {
        let mut pager = Pager::<Record>::new(10);
        let stale = pager.load_first_page();
        let mut filters = ServerFilters::new();
        filters.insert("q".to_owned(), vec!["x".to_owned()]);
        let fresh = pager.set_filters(filters);
        assert_eq!(fresh.params.filters.len(), 1);

        assert!(!pager.receive(stale.seq, page(0..5, None)));
        assert!(pager.items().is_empty());
        assert!(pager.receive(fresh.seq, page(7..8, None)));
        assert_eq!(pager.items().len(), 1);
    }

    #[test]
    fn failures_surface_as_error_status() {
        let mut pager = Pager::<Record>::new(10);
        let request = pager.load_first_page();
        pager.receive(request.seq, Err(anyhow::anyhow!("offline")));
        assert_eq!(pager.flags().status, FetchStatus::Error);
        assert_eq!(pager.error(), Some("offline"));
        assert!(!pager.is_loading_anything());
    }

    #[test]
    fn update_and_remove_by_id() {
        let mut pager = Pager::new(10);
        let request = pager.load_first_page();
        pager.receive(request.seq, page(0..3, None));

        let updated = Record::new(1).with("qty", 9);
        assert!(pager.apply_update(updated));
        assert_eq!(
            pager.items()[1].field(&ColumnId::from("qty")),
            CellValue::Int(9)
        );
        assert!(pager.remove(&RowId::from(0)));
        assert!(!pager.remove(&RowId::from(0)));
        assert_eq!(pager.items().len(), 2);
    }
}
