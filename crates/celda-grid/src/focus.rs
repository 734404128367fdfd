// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use crate::{CellKey, ColumnId, GridRow, RowId, TableCore};
use std::collections::{HashMap, VecDeque};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ScrollAlign {
    #[default]
    Auto,
    Start,
    Center,
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FocusOptions {
    pub select: bool,
    pub additive: bool,
}

impl Default for FocusOptions {
    fn default() -> Self {
        Self {
            select: true,
            additive: false,
        }
    }
}

impl FocusOptions {
    /// Moves focus without touching the row selection.
    pub const fn quiet() -> Self {
        Self {
            select: false,
            additive: false,
        }
    }
}

/// Deferred work against the rendered surface. Queued by the controller and
/// applied by the host once the corresponding rows have been laid out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FocusEffect {
    ScrollToRow { index: usize, align: ScrollAlign },
    FocusCell(CellKey),
    FocusFirstInteractive(CellKey),
}

/// Rendering host seen by the focus controller. Focus calls must not scroll the
/// viewport on their own and return `false` when the target is not mounted.
pub trait FocusSurface {
    fn scroll_to_index(&mut self, index: usize, align: ScrollAlign);
    fn focus_cell(&mut self, key: &CellKey) -> bool;
    fn scroll_cell_into_view(&mut self, key: &CellKey);
    fn focus_first_interactive(&mut self, key: &CellKey) -> bool;
}

/// Mounted element handles by cell key and row id.
#[derive(Debug, Clone)]
pub struct CellRegistry<H> {
    cells: HashMap<CellKey, H>,
    rows: HashMap<RowId, H>,
}

impl<H> Default for CellRegistry<H> {
    fn default() -> Self {
        Self {
            cells: HashMap::new(),
            rows: HashMap::new(),
        }
    }
}

impl<H> CellRegistry<H> {
    pub fn set_cell_ref(&mut self, key: CellKey, handle: Option<H>) {
        match handle {
            Some(handle) => {
                self.cells.insert(key, handle);
            }
            None => {
                self.cells.remove(&key);
            }
        }
    }

    pub fn set_row_ref(&mut self, id: RowId, handle: Option<H>) {
        match handle {
            Some(handle) => {
                self.rows.insert(id, handle);
            }
            None => {
                self.rows.remove(&id);
            }
        }
    }

    pub fn cell(&self, key: &CellKey) -> Option<&H> {
        self.cells.get(key)
    }

    pub fn row(&self, id: &RowId) -> Option<&H> {
        self.rows.get(id)
    }

    pub fn cells(&self) -> impl Iterator<Item = (&CellKey, &H)> {
        self.cells.iter()
    }

    pub fn clear(&mut self) {
        self.cells.clear();
        self.rows.clear();
    }
}

/// Owns the focused (row, column) coordinate. Positions index the currently
/// visible rows and columns and are re-validated whenever those change.
#[derive(Debug, Default)]
pub struct FocusController {
    active_row: Option<usize>,
    active_col: Option<usize>,
    effects: VecDeque<FocusEffect>,
}

fn clamp(value: isize, len: usize) -> usize {
    let max = len.saturating_sub(1);
    usize::try_from(value.max(0)).map_or(0, |value| value.min(max))
}

fn cell_key<T: GridRow>(table: &TableCore<T>, row: usize, col: usize) -> Option<CellKey> {
    let row_id = table.row_id_at(row)?;
    let column: ColumnId = table.column_at(col)?.id.clone();
    Some(CellKey::new(row_id, column))
}

impl FocusController {
    pub fn active(&self) -> Option<(usize, usize)> {
        Some((self.active_row?, self.active_col?))
    }

    pub fn active_row(&self) -> Option<usize> {
        self.active_row
    }

    pub fn active_col(&self) -> Option<usize> {
        self.active_col
    }

    /// Signed view of the coordinate with `-1` for "no focus".
    pub fn coordinate(&self) -> (isize, isize) {
        let signed = |value: Option<usize>| {
            value
                .and_then(|v| isize::try_from(v).ok())
                .unwrap_or(-1)
        };
        (signed(self.active_row), signed(self.active_col))
    }

    /// Bookkeeping only: records the coordinate without selection or effects.
    pub fn set_coordinate(&mut self, row: usize, col: usize) {
        self.active_row = Some(row);
        self.active_col = Some(col);
    }

    pub fn focus_cell_by_index<T: GridRow>(
        &mut self,
        table: &mut TableCore<T>,
        row: isize,
        col: isize,
        options: FocusOptions,
    ) {
        let rows = table.row_count();
        let cols = table.col_count();
        if rows == 0 || cols == 0 {
            return;
        }
        let ri = clamp(row, rows);
        let ci = clamp(col, cols);
        self.active_row = Some(ri);
        self.active_col = Some(ci);

        if options.select
            && let Some(id) = table.row_id_at(ri)
        {
            table.select_row(id, options.additive);
        }

        self.effects.push_back(FocusEffect::ScrollToRow {
            index: ri,
            align: ScrollAlign::Auto,
        });
        if let Some(key) = cell_key(table, ri, ci) {
            self.effects.push_back(FocusEffect::FocusCell(key));
        }
    }

    pub fn clear_cell_focus(&mut self) {
        self.active_row = None;
        self.active_col = None;
    }

    /// Re-clamps the cursor after the row or column set changed, refocusing
    /// quietly when the row under it is no longer editable.
    pub fn ensure_cursor_on_editable_row<T: GridRow>(
        &mut self,
        table: &mut TableCore<T>,
        is_row_editable_at: impl Fn(usize) -> bool,
    ) {
        let rows = table.row_count();
        let cols = table.col_count();
        if rows == 0 || cols == 0 {
            self.clear_cell_focus();
            return;
        }
        let ri = self.active_row.unwrap_or(0).min(rows - 1);
        let ci = self.active_col.unwrap_or(0).min(cols - 1);
        self.active_row = Some(ri);
        self.active_col = Some(ci);

        if !is_row_editable_at(ri) {
            self.focus_cell_by_index(
                table,
                isize::try_from(ri).unwrap_or(isize::MAX),
                isize::try_from(ci).unwrap_or(isize::MAX),
                FocusOptions::quiet(),
            );
        }
    }

    pub fn focus_first_editable_in_cell<T: GridRow>(
        &mut self,
        table: &TableCore<T>,
        row: usize,
        col: usize,
    ) {
        if let Some(key) = cell_key(table, row, col) {
            self.effects.push_back(FocusEffect::FocusFirstInteractive(key));
        }
    }

    pub fn pending_effects(&self) -> impl Iterator<Item = &FocusEffect> {
        self.effects.iter()
    }

    pub fn take_effects(&mut self) -> Vec<FocusEffect> {
        self.effects.drain(..).collect()
    }

    /// Applies queued scrolls only, leaving focus requests for after layout.
    pub fn apply_scroll_effects(&mut self, surface: &mut impl FocusSurface) {
        self.effects.retain(|effect| match effect {
            FocusEffect::ScrollToRow { index, align } => {
                surface.scroll_to_index(*index, *align);
                false
            }
            FocusEffect::FocusCell(_) | FocusEffect::FocusFirstInteractive(_) => true,
        });
    }

    /// Applies every queued effect in order. Targets that are no longer
    /// mounted are dropped.
    pub fn apply_effects(&mut self, surface: &mut impl FocusSurface) {
        while let Some(effect) = self.effects.pop_front() {
            match effect {
                FocusEffect::ScrollToRow { index, align } => surface.scroll_to_index(index, align),
                FocusEffect::FocusCell(key) => {
                    if surface.focus_cell(&key) {
                        surface.scroll_cell_into_view(&key);
                    } else {
                        log::trace!("focus target {key} not mounted");
                    }
                }
                FocusEffect::FocusFirstInteractive(key) => {
                    if !surface.focus_first_interactive(&key) {
                        log::trace!("no interactive control in {key}");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{
        CellRegistry, FocusController, FocusEffect, FocusOptions, FocusSurface, ScrollAlign,
    };
    use crate::{CellKey, ColumnDef, ColumnId, ColumnNode, Record, RowId, TableCore, ValueKind};

    fn table(rows: i64, cols: usize) -> TableCore<Record> {
        let columns = (0..cols)
            .map(|index| {
                ColumnNode::from(ColumnDef::data(
                    format!("c{index}").as_str(),
                    "C",
                    ValueKind::Text,
                ))
            })
            .collect();
        let mut table = TableCore::new(columns);
        table.set_data((0..rows).map(Record::new).collect());
        table
    }

    #[derive(Default)]
    struct Surface {
        mounted: Vec<CellKey>,
        log: Vec<String>,
    }

    impl FocusSurface for Surface {
        fn scroll_to_index(&mut self, index: usize, _align: ScrollAlign) {
            self.log.push(format!("scroll {index}"));
        }

        fn focus_cell(&mut self, key: &CellKey) -> bool {
            self.log.push(format!("focus {key}"));
            self.mounted.contains(key)
        }

        fn scroll_cell_into_view(&mut self, key: &CellKey) {
            self.log.push(format!("reveal {key}"));
        }

        fn focus_first_interactive(&mut self, key: &CellKey) -> bool {
            self.log.push(format!("control {key}"));
            true
        }
    }

    #[test]
    fn focus_clamps_into_grid_bounds() {
        let mut table = table(10, 4);
        let mut focus = FocusController::default();
        focus.focus_cell_by_index(&mut table, -5, 999, FocusOptions::default());
        assert_eq!(focus.coordinate(), (0, 3));
        assert!(table.is_row_selected(&RowId::from(0)));
    }

    #[test]
    fn empty_grid_is_a_noop() {
        let mut table = table(0, 4);
        let mut focus = FocusController::default();
        focus.focus_cell_by_index(&mut table, 1, 1, FocusOptions::default());
        assert_eq!(focus.coordinate(), (-1, -1));
        assert_eq!(focus.take_effects(), Vec::new());
    }

    #[test]
    fn additive_selection_keeps_previous_rows() {
        let mut table = table(5, 2);
        let mut focus = FocusController::default();
        focus.focus_cell_by_index(&mut table, 1, 0, FocusOptions::default());
        focus.focus_cell_by_index(
            &mut table,
            3,
            0,
            FocusOptions {
                select: true,
                additive: true,
            },
        );
        assert_eq!(table.state().row_selection.len(), 2);
        focus.focus_cell_by_index(&mut table, 4, 0, FocusOptions::default());
        assert_eq!(table.state().row_selection.len(), 1);
        focus.focus_cell_by_index(&mut table, 2, 0, FocusOptions::quiet());
        assert!(table.is_row_selected(&RowId::from(4)));
    }

    #[test]
    fn effects_scroll_then_focus_and_skip_unmounted_targets() {
        let mut table = table(3, 2);
        let mut focus = FocusController::default();
        focus.focus_cell_by_index(&mut table, 2, 1, FocusOptions::quiet());
        assert_eq!(
            focus.pending_effects().next(),
            Some(&FocusEffect::ScrollToRow {
                index: 2,
                align: ScrollAlign::Auto
            })
        );

        let mut surface = Surface::default();
        focus.apply_effects(&mut surface);
        assert_eq!(surface.log, vec!["scroll 2", "focus 2_c1"]);

        surface.log.clear();
        surface
            .mounted
            .push(CellKey::new(RowId::from(0), ColumnId::from("c0")));
        focus.focus_cell_by_index(&mut table, 0, 0, FocusOptions::quiet());
        focus.apply_scroll_effects(&mut surface);
        assert_eq!(surface.log, vec!["scroll 0"]);
        focus.apply_effects(&mut surface);
        assert_eq!(surface.log, vec!["scroll 0", "focus 0_c0", "reveal 0_c0"]);
    }

    #[test]
    fn ensure_cursor_reclamps_after_shrink() {
        let mut table = table(10, 3);
        let mut focus = FocusController::default();
        focus.set_coordinate(8, 2);
        table.set_data((0..4).map(Record::new).collect());
        focus.ensure_cursor_on_editable_row(&mut table, |_| true);
        assert_eq!(focus.active(), Some((3, 2)));
        assert!(focus.take_effects().is_empty());

        focus.ensure_cursor_on_editable_row(&mut table, |_| false);
        assert!(matches!(
            focus.take_effects().first(),
            Some(FocusEffect::ScrollToRow { index: 3, .. })
        ));

        table.set_data(Vec::new());
        focus.ensure_cursor_on_editable_row(&mut table, |_| true);
        assert_eq!(focus.active(), None);
    }

    #[test]
    fn registry_tracks_mount_and_unmount() {
        let mut registry = CellRegistry::default();
        let key = CellKey::new(RowId::from(1), ColumnId::from("qty"));
        registry.set_cell_ref(key.clone(), Some(7_u16));
        registry.set_row_ref(RowId::from(1), Some(3_u16));
        assert_eq!(registry.cell(&key), Some(&7));
        registry.set_cell_ref(key.clone(), None);
        assert_eq!(registry.cell(&key), None);
        assert_eq!(registry.row(&RowId::from(1)), Some(&3));
    }
}
