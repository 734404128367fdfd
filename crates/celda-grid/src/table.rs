// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use crate::{
    ColumnDef, ColumnFilter, ColumnFilters, ColumnId, ColumnNode, FilterValue, GridRow, RowId,
    SortEntry, Sorting, flatten_columns,
};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

pub type VisibilityState = BTreeMap<ColumnId, bool>;
pub type RowSelection = BTreeSet<RowId>;
pub type ColumnOrder = Vec<ColumnId>;
pub type ColumnSizing = BTreeMap<ColumnId, u16>;

/// Either a replacement value or a function of the current value.
pub enum Updater<S> {
    Set(S),
    Update(Box<dyn FnOnce(&S) -> S>),
}

impl<S> Updater<S> {
    pub fn update(f: impl FnOnce(&S) -> S + 'static) -> Self {
        Self::Update(Box::new(f))
    }

    fn apply(self, current: &S) -> S {
        match self {
            Self::Set(value) => value,
            Self::Update(f) => f(current),
        }
    }
}

impl<S: fmt::Debug> fmt::Debug for Updater<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Set(value) => f.debug_tuple("Set").field(value).finish(),
            Self::Update(_) => f.write_str("Update(..)"),
        }
    }
}

#[derive(Debug)]
pub enum TableChange {
    Sorting(Updater<Sorting>),
    ColumnFilters(Updater<ColumnFilters>),
    ColumnVisibility(Updater<VisibilityState>),
    RowSelection(Updater<RowSelection>),
    ColumnOrder(Updater<ColumnOrder>),
    ColumnSizing(Updater<ColumnSizing>),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableState {
    pub sorting: Sorting,
    pub column_filters: ColumnFilters,
    pub column_visibility: VisibilityState,
    pub row_selection: RowSelection,
    pub column_order: ColumnOrder,
    pub column_sizing: ColumnSizing,
}

/// Change counters per state slice; observers compare against the last value
/// they saw instead of diffing the state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Revisions {
    pub data: u64,
    pub sorting: u64,
    pub column_filters: u64,
    pub column_visibility: u64,
    pub row_selection: u64,
    pub column_order: u64,
    pub column_sizing: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionHeader {
    Unchecked,
    Indeterminate,
    Checked,
}

/// Table model in manual mode: rows are rendered in the order given and never
/// re-sorted or re-filtered locally. Every sort, filter, visibility, order,
/// sizing and selection change funnels through [`TableCore::dispatch`].
#[derive(Debug)]
pub struct TableCore<T> {
    data: Vec<T>,
    columns: Vec<ColumnNode>,
    /// Leaves in declaration order.
    leaves: Vec<ColumnDef>,
    /// Indices into `leaves` in display order, and the visible subset of it.
    /// Rebuilt when columns, order or visibility change.
    ordered: Vec<usize>,
    visible: Vec<usize>,
    state: TableState,
    revisions: Revisions,
}

fn bump(changed: bool, counter: &mut u64) -> bool {
    if changed {
        *counter += 1;
    }
    changed
}

impl<T: GridRow> TableCore<T> {
    pub fn new(columns: Vec<ColumnNode>) -> Self {
        let mut table = Self {
            data: Vec::new(),
            columns,
            leaves: Vec::new(),
            ordered: Vec::new(),
            visible: Vec::new(),
            state: TableState::default(),
            revisions: Revisions::default(),
        };
        table.relayout_columns();
        table
    }

    pub fn set_data(&mut self, data: Vec<T>) {
        self.data = data;
        self.revisions.data += 1;
    }

    pub fn set_columns(&mut self, columns: Vec<ColumnNode>) {
        self.columns = columns;
        self.relayout_columns();
        self.revisions.data += 1;
    }

    pub fn rows(&self) -> &[T] {
        &self.data
    }

    pub fn row_count(&self) -> usize {
        self.data.len()
    }

    pub fn row_at(&self, index: usize) -> Option<&T> {
        self.data.get(index)
    }

    pub fn row_id_at(&self, index: usize) -> Option<RowId> {
        self.data.get(index).map(GridRow::row_id)
    }

    pub fn row_index_of(&self, id: &RowId) -> Option<usize> {
        self.data.iter().position(|row| &row.row_id() == id)
    }

    pub fn columns(&self) -> &[ColumnNode] {
        &self.columns
    }

    pub fn state(&self) -> &TableState {
        &self.state
    }

    pub fn revisions(&self) -> Revisions {
        self.revisions
    }

    /// Display order: saved order first, unknown leaves appended in
    /// declaration order, then pinned columns moved to the edges.
    fn relayout_columns(&mut self) {
        self.leaves = flatten_columns(&self.columns)
            .into_iter()
            .cloned()
            .collect();
        let mut ordered = Vec::with_capacity(self.leaves.len());
        for id in &self.state.column_order {
            if let Some(index) = self.leaves.iter().position(|column| &column.id == id)
                && !ordered.contains(&index)
            {
                ordered.push(index);
            }
        }
        for index in 0..self.leaves.len() {
            if !ordered.contains(&index) {
                ordered.push(index);
            }
        }

        let leaves = &self.leaves;
        let (first, rest): (Vec<_>, Vec<_>) = ordered
            .into_iter()
            .partition(|&index| leaves[index].flags.fixed_first);
        let (last, middle): (Vec<_>, Vec<_>) = rest
            .into_iter()
            .partition(|&index| leaves[index].flags.fixed_last);
        self.ordered = first.into_iter().chain(middle).chain(last).collect();
        self.visible = self
            .ordered
            .iter()
            .copied()
            .filter(|&index| self.is_column_visible(&self.leaves[index]))
            .collect();
    }

    /// All leaf columns in display order.
    pub fn leaf_columns(&self) -> Vec<&ColumnDef> {
        self.ordered.iter().map(|&index| &self.leaves[index]).collect()
    }

    pub fn leaf_column_ids(&self) -> Vec<ColumnId> {
        self.leaves.iter().map(|column| column.id.clone()).collect()
    }

    pub fn visible_leaf_columns(&self) -> Vec<&ColumnDef> {
        self.visible.iter().map(|&index| &self.leaves[index]).collect()
    }

    fn is_column_visible(&self, column: &ColumnDef) -> bool {
        !column.enable_hiding
            || self
                .state
                .column_visibility
                .get(&column.id)
                .copied()
                .unwrap_or(true)
    }

    pub fn col_count(&self) -> usize {
        self.visible.len()
    }

    pub fn column_at(&self, index: usize) -> Option<&ColumnDef> {
        self.visible.get(index).map(|&leaf| &self.leaves[leaf])
    }

    pub fn column_index(&self, id: &ColumnId) -> Option<usize> {
        self.visible
            .iter()
            .position(|&leaf| &self.leaves[leaf].id == id)
    }

    pub fn column_width(&self, column: &ColumnDef) -> u16 {
        let width = self
            .state
            .column_sizing
            .get(&column.id)
            .copied()
            .unwrap_or(column.size.size);
        column.size.clamp(width)
    }

    /// Applies a change and reports whether the state slice actually changed.
    pub fn dispatch(&mut self, change: TableChange) -> bool {
        let state = &mut self.state;
        let revisions = &mut self.revisions;
        let (changed, layout) = match change {
            TableChange::Sorting(updater) => {
                let next = updater.apply(&state.sorting);
                let changed = next != state.sorting;
                state.sorting = next;
                (bump(changed, &mut revisions.sorting), false)
            }
            TableChange::ColumnFilters(updater) => {
                let next = updater.apply(&state.column_filters);
                let changed = next != state.column_filters;
                state.column_filters = next;
                (bump(changed, &mut revisions.column_filters), false)
            }
            TableChange::ColumnVisibility(updater) => {
                let next = updater.apply(&state.column_visibility);
                let changed = next != state.column_visibility;
                state.column_visibility = next;
                (bump(changed, &mut revisions.column_visibility), true)
            }
            TableChange::RowSelection(updater) => {
                let next = updater.apply(&state.row_selection);
                let changed = next != state.row_selection;
                state.row_selection = next;
                (bump(changed, &mut revisions.row_selection), false)
            }
            TableChange::ColumnOrder(updater) => {
                let next = updater.apply(&state.column_order);
                let changed = next != state.column_order;
                state.column_order = next;
                (bump(changed, &mut revisions.column_order), true)
            }
            TableChange::ColumnSizing(updater) => {
                let next = updater.apply(&state.column_sizing);
                let changed = next != state.column_sizing;
                state.column_sizing = next;
                (bump(changed, &mut revisions.column_sizing), false)
            }
        };
        if changed && layout {
            self.relayout_columns();
        }
        changed
    }

    /// Cycles a column's sort: none, ascending, descending, none. Single
    /// column sorting only.
    pub fn toggle_sorting(&mut self, column: &ColumnId) -> bool {
        let sortable = self
            .leaves
            .iter()
            .any(|def| &def.id == column && def.enable_sorting);
        if !sortable {
            return false;
        }
        let next = match self.state.sorting.first() {
            Some(entry) if &entry.id == column && !entry.desc => {
                vec![SortEntry::desc(column.clone())]
            }
            Some(entry) if &entry.id == column => Vec::new(),
            _ => vec![SortEntry::asc(column.clone())],
        };
        self.dispatch(TableChange::Sorting(Updater::Set(next)))
    }

    pub fn set_column_filter(&mut self, column: &ColumnId, value: Option<FilterValue>) -> bool {
        let column = column.clone();
        self.dispatch(TableChange::ColumnFilters(Updater::update(
            move |current: &ColumnFilters| {
                let mut next = current
                    .iter()
                    .filter(|filter| filter.id != column)
                    .cloned()
                    .collect::<ColumnFilters>();
                if let Some(value) = value {
                    next.push(ColumnFilter { id: column, value });
                }
                next
            },
        )))
    }

    pub fn column_filter(&self, column: &ColumnId) -> Option<&FilterValue> {
        self.state
            .column_filters
            .iter()
            .find(|filter| &filter.id == column)
            .map(|filter| &filter.value)
    }

    pub fn set_column_visibility(&mut self, column: &ColumnId, visible: bool) -> bool {
        let hideable = self
            .leaves
            .iter()
            .any(|def| &def.id == column && def.enable_hiding);
        if !hideable {
            return false;
        }
        let column = column.clone();
        self.dispatch(TableChange::ColumnVisibility(Updater::update(
            move |current: &VisibilityState| {
                let mut next = current.clone();
                next.insert(column, visible);
                next
            },
        )))
    }

    pub fn set_column_size(&mut self, column: &ColumnId, width: u16) -> bool {
        let Some(def) = self
            .leaves
            .iter()
            .find(|def| &def.id == column && def.enable_resizing)
        else {
            return false;
        };
        let width = def.size.clamp(width);
        let column = column.clone();
        self.dispatch(TableChange::ColumnSizing(Updater::update(
            move |current: &ColumnSizing| {
                let mut next = current.clone();
                next.insert(column, width);
                next
            },
        )))
    }

    pub fn select_row(&mut self, id: RowId, additive: bool) -> bool {
        self.dispatch(TableChange::RowSelection(Updater::update(
            move |current: &RowSelection| {
                let mut next = if additive {
                    current.clone()
                } else {
                    RowSelection::new()
                };
                next.insert(id);
                next
            },
        )))
    }

    pub fn toggle_row_selected(&mut self, id: RowId, selected: bool) -> bool {
        self.dispatch(TableChange::RowSelection(Updater::update(
            move |current: &RowSelection| {
                let mut next = current.clone();
                if selected {
                    next.insert(id);
                } else {
                    next.remove(&id);
                }
                next
            },
        )))
    }

    pub fn is_row_selected(&self, id: &RowId) -> bool {
        self.state.row_selection.contains(id)
    }

    pub fn toggle_all_page_rows_selected(&mut self, selected: bool) -> bool {
        let ids = self.data.iter().map(GridRow::row_id).collect::<Vec<_>>();
        self.dispatch(TableChange::RowSelection(Updater::update(
            move |current: &RowSelection| {
                let mut next = current.clone();
                for id in ids {
                    if selected {
                        next.insert(id);
                    } else {
                        next.remove(&id);
                    }
                }
                next
            },
        )))
    }

    pub fn selection_header(&self) -> SelectionHeader {
        let selected = self
            .data
            .iter()
            .filter(|row| self.state.row_selection.contains(&row.row_id()))
            .count();
        if selected == 0 {
            SelectionHeader::Unchecked
        } else if selected == self.data.len() {
            SelectionHeader::Checked
        } else {
            SelectionHeader::Indeterminate
        }
    }
}
