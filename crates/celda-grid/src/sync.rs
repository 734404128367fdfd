// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use crate::{
    ColumnFilters, ColumnNode, Debounce, FilterMetaIndex, GridRow, ServerFilters, ServerSort,
    Sorting, TableChange, TableCore, Updater, filter_meta_by_id, from_server_to_column_filters,
    map_filters_to_server, map_sorting_to_server,
};
use std::time::{Duration, Instant};

pub const DEFAULT_SORT_DEBOUNCE: Duration = Duration::from_millis(250);
pub const DEFAULT_FILTER_DEBOUNCE: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FetchStatus {
    #[default]
    Pending,
    Success,
    Error,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchFlags {
    pub status: FetchStatus,
    pub is_fetching: bool,
    pub is_fetching_next_page: bool,
}

/// Status line for assistive output. Loading wins; an empty settled result
/// says so; anything else reports the count.
pub fn live_message(flags: FetchFlags, row_count: usize) -> String {
    if flags.status == FetchStatus::Pending {
        "Loading...".to_owned()
    } else if !flags.is_fetching_next_page && !flags.is_fetching && row_count == 0 {
        "No results.".to_owned()
    } else {
        format!("{row_count} results")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    ServerSort(Option<ServerSort>),
    ServerFilters(ServerFilters),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncTimings {
    pub sort_debounce: Duration,
    pub filter_debounce: Duration,
}

impl Default for SyncTimings {
    fn default() -> Self {
        Self {
            sort_debounce: DEFAULT_SORT_DEBOUNCE,
            filter_debounce: DEFAULT_FILTER_DEBOUNCE,
        }
    }
}

/// Bridges client sort and filter state to server query parameters.
///
/// Changes are picked up by comparing table revisions in [`ServerSync::observe`]
/// and leave through debounces drained by [`ServerSync::poll`]. Hydrating from
/// server-declared filters is absorbed, so it never echoes back upstream.
#[derive(Debug)]
pub struct ServerSync {
    meta: FilterMetaIndex,
    sort: Debounce<Sorting>,
    filters: Debounce<ColumnFilters>,
    seen_sorting: u64,
    seen_filters: u64,
    suppressed: bool,
    initial_filters: ColumnFilters,
}

impl ServerSync {
    pub fn new(columns: &[ColumnNode], timings: SyncTimings) -> Self {
        Self {
            meta: filter_meta_by_id(columns),
            sort: Debounce::new(timings.sort_debounce),
            filters: Debounce::new(timings.filter_debounce),
            seen_sorting: 0,
            seen_filters: 0,
            suppressed: true,
            initial_filters: ColumnFilters::new(),
        }
    }

    pub fn set_columns(&mut self, columns: &[ColumnNode]) {
        self.meta = filter_meta_by_id(columns);
    }

    pub fn is_suppressed(&self) -> bool {
        self.suppressed
    }

    /// Filters the table was last hydrated with.
    pub fn initial_filters(&self) -> &ColumnFilters {
        &self.initial_filters
    }

    pub fn hydrate<T: GridRow>(
        &mut self,
        table: &mut TableCore<T>,
        server: Option<&ServerFilters>,
    ) {
        self.suppressed = true;
        let next = server
            .map(|server| from_server_to_column_filters(table.columns(), server))
            .unwrap_or_default();
        self.initial_filters = next.clone();
        table.dispatch(TableChange::ColumnFilters(Updater::Set(next)));
        self.seen_filters = table.revisions().column_filters;
        self.filters.cancel();
    }

    /// Feeds changed sort and filter state into the debounces. The first call
    /// after a hydration lifts suppression.
    pub fn observe<T: GridRow>(&mut self, table: &TableCore<T>, now: Instant) {
        let revisions = table.revisions();
        if revisions.sorting != self.seen_sorting {
            self.seen_sorting = revisions.sorting;
            self.sort.push(table.state().sorting.clone(), now);
        }
        if revisions.column_filters != self.seen_filters {
            self.seen_filters = revisions.column_filters;
            self.filters.push(table.state().column_filters.clone(), now);
        }
        self.suppressed = false;
    }

    pub fn poll(&mut self, now: Instant) -> Vec<SyncEvent> {
        let mut events = Vec::new();
        if let Some(sorting) = self.sort.poll(now)
            && !self.suppressed
        {
            let sort = map_sorting_to_server(&sorting);
            log::debug!("server sort: {sort:?}");
            events.push(SyncEvent::ServerSort(sort));
        }
        if let Some(filters) = self.filters.poll(now)
            && !self.suppressed
        {
            let params = map_filters_to_server(&self.meta, &filters);
            log::debug!("server filters: {params:?}");
            events.push(SyncEvent::ServerFilters(params));
        }
        events
    }

    /// Earliest instant at which [`ServerSync::poll`] can yield something.
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.sort.deadline(), self.filters.deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }
}
