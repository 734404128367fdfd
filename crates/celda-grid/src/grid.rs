// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use crate::{
    CellError, CellKey, CellValue, ColumnId, ColumnNode, ColumnRole, CommitReason,
    DEFAULT_PREFS_DEBOUNCE, EventTarget, FetchFlags, FocusController, FocusOptions, FocusSurface,
    GridRow, KeyInput, KeyboardNav, NavHost, PrefsBinding, PrefsStore, Propagation, RowEditor,
    RowId, RowRequest, ScrollAlign, SelectionHeader, ServerFilters, ServerSync, Settled,
    StorageChange, SyncEvent, SyncTimings, TableCore, ValueError, VirtualOptions, VirtualRows,
    activates_control, live_message,
};
use anyhow::Result;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GridOptions {
    /// Preferences are only persisted when set.
    pub persist_key: Option<String>,
    pub prefs_version: u32,
    pub prefs_debounce: Duration,
    pub sync: SyncTimings,
    pub virtual_rows: VirtualOptions,
}

impl Default for GridOptions {
    fn default() -> Self {
        Self {
            persist_key: None,
            prefs_version: 1,
            prefs_debounce: DEFAULT_PREFS_DEBOUNCE,
            sync: SyncTimings::default(),
            virtual_rows: VirtualOptions::default(),
        }
    }
}

/// Everything a renderer needs to draw one cell.
#[derive(Debug, Clone, PartialEq)]
pub struct CellView {
    pub value: CellValue,
    pub dirty: bool,
    pub error: Option<CellError>,
    pub focused: bool,
    pub editing: bool,
    pub editable: bool,
}

/// The pieces the keyboard state machine drives, split from [`Grid`] so the
/// navigator can borrow them while the grid holds it.
struct GridParts<T> {
    table: TableCore<T>,
    focus: FocusController,
    editor: RowEditor<T>,
}

impl<T: GridRow> GridParts<T> {
    fn is_row_editable_at(&self, row: usize) -> bool {
        self.table
            .row_at(row)
            .is_some_and(|row| self.editor.is_row_editable(row))
    }
}

impl<T: GridRow> NavHost for GridParts<T> {
    fn row_count(&self) -> usize {
        self.table.row_count()
    }

    fn col_count(&self) -> usize {
        self.table.col_count()
    }

    fn is_cell_editable(&self, row: usize, col: usize) -> bool {
        self.is_row_editable_at(row)
            && self
                .table
                .column_at(col)
                .is_some_and(|column| column.is_inline_editable())
    }

    fn coordinate(&self) -> (isize, isize) {
        self.focus.coordinate()
    }

    fn set_coordinate(&mut self, row: usize, col: usize) {
        self.focus.set_coordinate(row, col);
    }

    fn focus_cell_by_index(&mut self, row: isize, col: isize, options: FocusOptions) {
        self.focus
            .focus_cell_by_index(&mut self.table, row, col, options);
    }

    fn focus_first_editable_in_cell(&mut self, row: usize, col: usize) {
        self.focus
            .focus_first_editable_in_cell(&self.table, row, col);
    }

    fn clear_cell_focus(&mut self) {
        self.focus.clear_cell_focus();
    }

    fn commit_row(&mut self, row: usize, reason: CommitReason) -> bool {
        match self.table.row_at(row) {
            Some(original) => self.editor.commit_row(row, original, reason),
            None => false,
        }
    }

    fn discard_row(&mut self, row: usize) {
        if let Some(id) = self.table.row_id_at(row) {
            self.editor.discard_row(&id);
        }
    }
}

/// Routes scroll effects into the virtualizer and focus effects to the host,
/// skipping targets whose row has left the table.
struct ViewportSurface<'a, T, S> {
    table: &'a TableCore<T>,
    rows: &'a mut VirtualRows,
    host: &'a mut S,
}

impl<T: GridRow, S: FocusSurface> FocusSurface for ViewportSurface<'_, T, S> {
    fn scroll_to_index(&mut self, index: usize, align: ScrollAlign) {
        self.rows.scroll_to_index(index, align);
        self.host.scroll_to_index(index, align);
    }

    fn focus_cell(&mut self, key: &CellKey) -> bool {
        self.table.row_index_of(&key.row).is_some() && self.host.focus_cell(key)
    }

    fn scroll_cell_into_view(&mut self, key: &CellKey) {
        self.host.scroll_cell_into_view(key);
    }

    fn focus_first_interactive(&mut self, key: &CellKey) -> bool {
        self.table.row_index_of(&key.row).is_some() && self.host.focus_first_interactive(key)
    }
}

/// An editable, keyboard-driven, server-synchronized data grid.
///
/// The grid holds no I/O. Commits and deletes leave through
/// [`Grid::take_requests`]; sort and filter changes through
/// [`Grid::poll_sync`]; load-more through [`Grid::poll_load_more`]; focus
/// work through [`Grid::flush_effects`].
pub struct Grid<T> {
    parts: GridParts<T>,
    nav: KeyboardNav,
    sync: ServerSync,
    virtual_rows: VirtualRows,
    prefs: PrefsBinding,
    fetch: FetchFlags,
}

impl<T: GridRow> Grid<T> {
    pub fn new(columns: Vec<ColumnNode>, options: GridOptions) -> Self {
        let sync = ServerSync::new(&columns, options.sync);
        Self {
            parts: GridParts {
                table: TableCore::new(columns),
                focus: FocusController::default(),
                editor: RowEditor::new(),
            },
            nav: KeyboardNav::default(),
            sync,
            virtual_rows: VirtualRows::new(options.virtual_rows),
            prefs: PrefsBinding::new(
                options.persist_key.as_deref(),
                options.prefs_version,
                options.prefs_debounce,
            ),
            fetch: FetchFlags::default(),
        }
    }

    pub fn with_editable(mut self, predicate: impl Fn(&T) -> bool + 'static) -> Self {
        self.parts.editor.set_editable(Some(Box::new(predicate)));
        self
    }

    pub fn table(&self) -> &TableCore<T> {
        &self.parts.table
    }

    /// Direct access for sort, filter, visibility, order, sizing and selection
    /// changes. Sync and preference bindings pick them up on their next poll.
    pub fn table_mut(&mut self) -> &mut TableCore<T> {
        &mut self.parts.table
    }

    pub fn editor(&self) -> &RowEditor<T> {
        &self.parts.editor
    }

    pub fn focus(&self) -> &FocusController {
        &self.parts.focus
    }

    pub fn virtual_rows(&self) -> &VirtualRows {
        &self.virtual_rows
    }

    pub fn virtual_rows_mut(&mut self) -> &mut VirtualRows {
        &mut self.virtual_rows
    }

    pub fn set_columns(&mut self, columns: Vec<ColumnNode>) {
        self.sync.set_columns(&columns);
        self.parts.table.set_columns(columns);
        self.reconcile_cursor();
    }

    /// Replaces the row set after a fetch, then puts the cursor back inside
    /// the grid.
    pub fn set_rows(&mut self, rows: Vec<T>, has_next_page: bool, fetch: FetchFlags) {
        self.parts.table.set_data(rows);
        self.virtual_rows.set_row_count(self.parts.table.row_count());
        self.virtual_rows.set_has_next_page(has_next_page);
        self.fetch = fetch;
        self.reconcile_cursor();
    }

    pub fn set_fetch_flags(&mut self, fetch: FetchFlags) {
        self.fetch = fetch;
    }

    fn reconcile_cursor(&mut self) {
        if self.parts.focus.active().is_none() {
            return;
        }
        let editable = (0..self.parts.table.row_count())
            .map(|index| self.parts.is_row_editable_at(index))
            .collect::<Vec<_>>();
        let GridParts { table, focus, .. } = &mut self.parts;
        focus.ensure_cursor_on_editable_row(table, |index| {
            editable.get(index).copied().unwrap_or(false)
        });

        if self.nav.is_editing() {
            let still_editable = self
                .parts
                .focus
                .active()
                .is_some_and(|(row, col)| self.parts.is_cell_editable(row, col));
            if !still_editable {
                self.nav.cancel_editing();
            }
        }
    }

    pub fn row_count(&self) -> usize {
        self.parts.table.row_count()
    }

    pub fn col_count(&self) -> usize {
        self.parts.table.col_count()
    }

    pub fn is_editing(&self) -> bool {
        self.nav.is_editing()
    }

    pub fn is_row_editable_at(&self, row: usize) -> bool {
        self.parts.is_row_editable_at(row)
    }

    pub fn is_cell_editable(&self, row: usize, col: usize) -> bool {
        self.parts.is_cell_editable(row, col)
    }

    pub fn is_cell_editing(&self, row: usize, col: usize) -> bool {
        self.nav.is_cell_editing(&self.parts, row, col)
    }

    /// Whether the delete control renders for a row. Follows the caller's
    /// predicate only, so a pending row keeps its control.
    pub fn shows_delete_control(&self, row: usize) -> bool {
        self.parts
            .table
            .row_at(row)
            .is_some_and(|row| self.parts.editor.is_row_editable_base(row))
    }

    pub fn get_cell_value(&self, row: usize, column: &ColumnId) -> Option<CellValue> {
        let original = self.parts.table.row_at(row)?;
        Some(self.parts.editor.get_cell_value(original, column))
    }

    pub fn set_row_field(&mut self, row: usize, column: &ColumnId, value: CellValue) {
        if let Some(original) = self.parts.table.row_at(row) {
            self.parts.editor.set_row_field(original, column, value);
        }
    }

    /// Parses typed input for the cell's column and stores it in the draft.
    pub fn set_cell_text(&mut self, row: usize, col: usize, raw: &str) -> Result<(), ValueError> {
        let Some(column) = self.parts.table.column_at(col) else {
            return Ok(());
        };
        let Some(kind) = column.value_kind() else {
            return Ok(());
        };
        let id = column.id.clone();
        let value = CellValue::parse_as(kind, raw)?;
        self.set_row_field(row, &id, value);
        Ok(())
    }

    pub fn cell_view(&self, row: usize, col: usize) -> Option<CellView> {
        let original = self.parts.table.row_at(row)?;
        let column = self.parts.table.column_at(col)?;
        let id = original.row_id();
        let editor = &self.parts.editor;
        Some(CellView {
            value: editor.get_cell_value(original, &column.id),
            dirty: editor.is_cell_dirty(&id, &column.id),
            error: editor.cell_error(&id, &column.id).cloned(),
            focused: self.parts.focus.active() == Some((row, col)),
            editing: self.is_cell_editing(row, col),
            editable: self.is_cell_editable(row, col),
        })
    }

    pub fn commit_row(&mut self, row: usize, reason: CommitReason) -> bool {
        self.parts.commit_row(row, reason)
    }

    pub fn commit_row_settled(&mut self, row: usize, reason: CommitReason) -> Settled {
        let GridParts { table, editor, .. } = &mut self.parts;
        match table.row_at(row) {
            Some(original) => editor.commit_row_settled(row, original, reason),
            None => Settled::skipped(),
        }
    }

    pub fn delete_row(&mut self, row: usize) -> bool {
        let GridParts { table, editor, .. } = &mut self.parts;
        table
            .row_at(row)
            .is_some_and(|original| editor.delete_row(row, original))
    }

    pub fn delete_row_settled(&mut self, row: usize) -> Settled {
        let GridParts { table, editor, .. } = &mut self.parts;
        match table.row_at(row) {
            Some(original) => editor.delete_row_settled(row, original),
            None => Settled::skipped(),
        }
    }

    pub fn discard_row(&mut self, row: usize) {
        self.parts.discard_row(row);
    }

    pub fn take_requests(&mut self) -> Vec<RowRequest<T>> {
        self.parts.editor.take_requests()
    }

    /// Applies completed commits and deletes, then re-validates the cursor.
    pub fn apply_settlements(&mut self) -> usize {
        let applied = self.parts.editor.apply_settlements();
        if applied > 0 {
            self.reconcile_cursor();
        }
        applied
    }

    pub fn focus_cell_by_index(&mut self, row: isize, col: isize, options: FocusOptions) {
        self.parts.focus_cell_by_index(row, col, options);
    }

    pub fn clear_cell_focus(&mut self) {
        self.parts.clear_cell_focus();
    }

    pub fn enter_edit_mode(&mut self, row: usize, col: usize) {
        self.nav.enter_edit_mode(&mut self.parts, row, col);
    }

    pub fn end_edit(&mut self, commit: bool, next: Option<(usize, usize)>) {
        self.nav.end_edit(&mut self.parts, commit, next);
    }

    /// Full key pipeline: the capture filter first, then control activation
    /// on the focused cell, then navigation.
    pub fn on_keydown(&mut self, input: &KeyInput) -> Propagation {
        let capture = self.nav.on_keydown_capture(input);
        if capture.stop_propagation {
            return capture;
        }
        if activates_control(&input.key) {
            if let Some((row, col)) = self.parts.focus.active() {
                if self.activate_control(row, col) {
                    return Propagation::SWALLOW;
                }
            }
        }
        self.nav.on_keydown(&mut self.parts, input)
    }

    pub fn on_cell_click(&mut self, row: usize, col: usize, target: EventTarget) {
        self.nav.on_cell_click(&mut self.parts, row, col, target);
        if target == EventTarget::InteractiveControl {
            self.activate_control(row, col);
        }
    }

    pub fn on_cell_dbl_click(&mut self, row: usize, col: usize) {
        self.nav.on_cell_dbl_click(&mut self.parts, row, col);
    }

    /// Presses the control in a selection or deletion cell. Returns `false`
    /// for data cells and for rows whose delete control is hidden.
    pub fn activate_control(&mut self, row: usize, col: usize) -> bool {
        let Some(role) = self.parts.table.column_at(col).map(|column| column.role) else {
            return false;
        };
        match role {
            ColumnRole::Data(_) => false,
            ColumnRole::Selection => {
                let Some(id) = self.parts.table.row_id_at(row) else {
                    return false;
                };
                let selected = self.parts.table.is_row_selected(&id);
                self.parts.table.toggle_row_selected(id, !selected);
                true
            }
            ColumnRole::Deletion => {
                if !self.shows_delete_control(row) {
                    return false;
                }
                self.delete_row(row);
                if self.nav.is_cell_editing(&self.parts, row, col) {
                    self.parts.focus_first_editable_in_cell(row, col);
                }
                true
            }
        }
    }

    pub fn selection_header(&self) -> SelectionHeader {
        self.parts.table.selection_header()
    }

    pub fn toggle_all_rows_selected(&mut self, selected: bool) -> bool {
        self.parts.table.toggle_all_page_rows_selected(selected)
    }

    pub fn selected_row_ids(&self) -> impl Iterator<Item = &RowId> {
        self.parts.table.state().row_selection.iter()
    }

    pub fn hydrate_filters(&mut self, server: Option<&ServerFilters>) {
        self.sync.hydrate(&mut self.parts.table, server);
    }

    /// Picks up table changes and returns server emissions that are due.
    pub fn poll_sync(&mut self, now: Instant) -> Vec<SyncEvent> {
        self.sync.observe(&self.parts.table, now);
        self.sync.poll(now)
    }

    pub fn live_message(&self) -> String {
        live_message(self.fetch, self.parts.table.row_count())
    }

    pub fn poll_load_more(&mut self, is_loading_anything: bool) -> bool {
        self.virtual_rows.poll_load_more(is_loading_anything)
    }

    pub fn restore_prefs(&mut self, store: &mut impl PrefsStore) -> Result<()> {
        self.prefs.restore(&mut self.parts.table, store)
    }

    pub fn flush_prefs(&mut self, store: &mut impl PrefsStore, now: Instant) -> Result<bool> {
        self.prefs.observe(&self.parts.table, now);
        self.prefs.flush(&self.parts.table, store, now)
    }

    /// Saves layout changes still inside the debounce window, before the grid
    /// goes away.
    pub fn flush_prefs_now(&mut self, store: &mut impl PrefsStore) -> Result<bool> {
        self.prefs.observe(&self.parts.table, Instant::now());
        self.prefs.flush_pending(&self.parts.table, store)
    }

    pub fn sync_prefs(&mut self, store: &mut impl PrefsStore) -> Result<usize> {
        let applied = self.prefs.sync_external(&mut self.parts.table, store)?;
        if applied > 0 {
            self.reconcile_cursor();
        }
        Ok(applied)
    }

    pub fn on_storage_change(&mut self, change: &StorageChange) -> bool {
        let applied = self.prefs.on_storage_change(&mut self.parts.table, change);
        if applied {
            self.reconcile_cursor();
        }
        applied
    }

    /// Earliest instant at which a debounced emission or save comes due.
    pub fn next_deadline(&self) -> Option<Instant> {
        [self.sync.next_deadline(), self.prefs.next_deadline()]
            .into_iter()
            .flatten()
            .min()
    }

    /// Applies only the queued scrolls so the host can lay out the target rows
    /// before focus lands.
    pub fn flush_scroll_effects(&mut self, host: &mut impl FocusSurface) {
        let mut surface = ViewportSurface {
            table: &self.parts.table,
            rows: &mut self.virtual_rows,
            host,
        };
        self.parts.focus.apply_scroll_effects(&mut surface);
    }

    pub fn flush_effects(&mut self, host: &mut impl FocusSurface) {
        let mut surface = ViewportSurface {
            table: &self.parts.table,
            rows: &mut self.virtual_rows,
            host,
        };
        self.parts.focus.apply_effects(&mut surface);
    }

    /// Commits every dirty row that is not already pending, as the grid goes
    /// away. Returns how many commits were emitted.
    pub fn unmount(&mut self) -> usize {
        let GridParts { table, editor, .. } = &mut self.parts;
        let dirty = editor.dirty_rows().cloned().collect::<Vec<_>>();
        let mut emitted = 0;
        for id in dirty {
            let Some(index) = table.row_index_of(&id) else {
                continue;
            };
            let Some(original) = table.row_at(index) else {
                continue;
            };
            if editor.commit_row(index, original, CommitReason::Unmount) {
                emitted += 1;
            }
        }
        self.nav.cancel_editing();
        emitted
    }
}

#[cfg(test)]
mod tests {
    use super::{Grid, GridOptions};
    use crate::{
        CellValue, ColumnDef, ColumnId, ColumnNode, CommitReason, EventTarget, FetchFlags,
        FetchStatus, GridRow, Key, KeyInput, Record, RowId, RowRequest, ValueKind, deletion_column,
        selection_column,
    };

    fn grid() -> Grid<Record> {
        let columns = vec![
            ColumnNode::from(selection_column("Select")),
            ColumnDef::data("name", "Name", ValueKind::Text)
                .editable()
                .into(),
            ColumnDef::data("qty", "Qty", ValueKind::Int).editable().into(),
            deletion_column("Delete").into(),
        ];
        let mut grid = Grid::new(columns, GridOptions::default());
        grid.set_rows(
            (1..=3_i64)
                .map(|id| Record::new(id).with("name", format!("r{id}")).with("qty", id))
                .collect(),
            false,
            FetchFlags {
                status: FetchStatus::Success,
                ..FetchFlags::default()
            },
        );
        grid
    }

    #[test]
    fn control_columns_are_not_inline_editable() {
        let grid = grid();
        assert!(!grid.is_cell_editable(0, 0));
        assert!(grid.is_cell_editable(0, 1));
        assert!(!grid.is_cell_editable(0, 3));
    }

    #[test]
    fn typed_input_is_parsed_per_column() {
        let mut grid = grid();
        assert!(grid.set_cell_text(0, 2, "1,200").is_ok());
        assert_eq!(
            grid.get_cell_value(0, &ColumnId::from("qty")),
            Some(CellValue::Int(1200))
        );
        assert!(grid.set_cell_text(0, 2, "lots").is_err());
        let view = grid.cell_view(0, 2);
        assert!(view.is_some_and(|view| view.dirty && view.editable));
    }

    #[test]
    fn enter_on_deletion_cell_requests_delete() {
        let mut grid = grid();
        grid.focus_cell_by_index(1, 3, crate::FocusOptions::quiet());
        let propagation = grid.on_keydown(&KeyInput::new(Key::Enter));
        assert!(propagation.prevent_default);
        let requests = grid.take_requests();
        assert!(matches!(
            requests.as_slice(),
            [RowRequest::Delete(delete)] if delete.row_id == RowId::from(2)
        ));
    }

    #[test]
    fn clicking_a_checkbox_toggles_selection_only() {
        let mut grid = grid();
        grid.on_cell_click(2, 0, EventTarget::InteractiveControl);
        assert_eq!(grid.focus().active(), Some((2, 0)));
        assert_eq!(
            grid.selected_row_ids().cloned().collect::<Vec<_>>(),
            vec![RowId::from(3)]
        );
        assert!(!grid.is_editing());
    }

    #[test]
    fn unmount_commits_dirty_rows() {
        let mut grid = grid();
        grid.set_row_field(0, &ColumnId::from("qty"), CellValue::Int(50));
        grid.set_row_field(2, &ColumnId::from("qty"), CellValue::Int(70));
        assert!(grid.commit_row(2, CommitReason::EditExit));
        assert_eq!(grid.unmount(), 1);
        let reasons = grid
            .take_requests()
            .into_iter()
            .filter_map(|request| match request {
                RowRequest::Commit(commit) => Some(commit.reason),
                RowRequest::Delete(_) => None,
            })
            .collect::<Vec<_>>();
        assert_eq!(reasons, vec![CommitReason::EditExit, CommitReason::Unmount]);
    }

    #[test]
    fn shrinking_rows_reclamps_cursor() {
        let mut grid = grid();
        grid.focus_cell_by_index(2, 1, crate::FocusOptions::default());
        grid.on_keydown(&KeyInput::new(Key::Enter));
        assert!(grid.is_editing());

        grid.set_rows(
            vec![Record::new(1).with("name", "r1")],
            false,
            FetchFlags::default(),
        );
        assert_eq!(grid.focus().active(), Some((0, 1)));
        assert!(grid.is_editing());
        assert_eq!(grid.live_message(), "Loading...");
    }

    #[test]
    fn row_turning_read_only_leaves_edit_mode() {
        let locked = CellValue::text("locked");
        let mut grid = grid().with_editable(move |row: &Record| {
            row.field(&ColumnId::from("name")) != locked
        });
        grid.focus_cell_by_index(0, 1, crate::FocusOptions::default());
        grid.on_keydown(&KeyInput::new(Key::Enter));
        assert!(grid.is_editing());

        grid.set_rows(
            vec![Record::new(1).with("name", "locked")],
            false,
            FetchFlags::default(),
        );
        assert!(!grid.is_editing());
        assert!(!grid.shows_delete_control(0));
    }
}
