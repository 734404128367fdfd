// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Context, Result};
use celda_grid::{
    CellKey, CellRegistry, CellValue, ColumnId, ColumnRole, CommitFailure, DateRange, EventTarget,
    FetchStatus, FilterKind, FilterOption, FilterValue, FocusOptions, FocusSurface, Grid, Key,
    KeyInput, ListParams, OptionsContext, Page, PageRequest, Pager, Patch, PrefsStore, Propagation,
    Record, RowId, RowRequest, ScrollAlign, SelectionHeader, ServerFilters, SyncEvent, TableChange,
    Updater, ValueError, ValueKind, VisibilityState, filter_meta_by_id, map_filters_to_server,
    parse_date,
};
use crossterm::event::{
    self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEvent, KeyEventKind,
    KeyModifiers, MouseButton, MouseEvent, MouseEventKind,
};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use crossterm::{execute, terminal};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout, Position, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Clear, Paragraph};
use std::io;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::{Duration, Instant};

const TICK: Duration = Duration::from_millis(120);
const STATUS_TTL: Duration = Duration::from_secs(4);
const DOUBLE_CLICK: Duration = Duration::from_millis(400);
const PX_PER_CHAR: u16 = 10;
const RESIZE_STEP: u16 = 10;
const WHEEL_ROWS: u64 = 3;
const SORT_MARK_ASC: &str = "▲";
const SORT_MARK_DESC: &str = "▼";
const FILTER_MARK: &str = "*";

/// Persistence behind the grid. Calls are synchronous; the loop runs each
/// one between frames.
pub trait GridRuntime {
    type Prefs: PrefsStore;

    fn fetch_page(&mut self, params: &ListParams, cursor: Option<&str>) -> Result<Page<Record>>;

    /// Persists a patch and returns the stored row. A rejection that names
    /// fields should carry a [`CommitFailure`] so the cells can be marked.
    fn commit_row(&mut self, row_id: &RowId, patch: &Patch) -> Result<Record>;

    fn delete_row(&mut self, row_id: &RowId) -> Result<()>;

    fn prefs(&mut self) -> &mut Self::Prefs;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppOptions {
    pub title: String,
    pub page_size: usize,
    /// Server filters the grid opens with, as if read from a URL.
    pub initial_filters: Option<ServerFilters>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InternalEvent {
    ClearStatus { token: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TableCommand {
    CycleSort,
    OpenFilter,
    ClearFilters,
    HideColumn,
    ShowAllColumns,
    Narrow,
    Widen,
    MoveColumn(isize),
    ToggleAllRows,
    Reload,
    ToggleHelp,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct EditBuffer {
    key: CellKey,
    text: String,
    error: Option<ValueError>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct FilterPrompt {
    column: ColumnId,
    title: String,
    hint: String,
    input: String,
}

/// Rendered cells by key. Offscreen cells of mounted rows keep a zero-width
/// rect so focus can land on them before the view scrolls sideways.
#[derive(Debug, Default)]
struct TerminalSurface {
    cells: CellRegistry<Rect>,
    focused: Option<CellKey>,
    reveal: Option<CellKey>,
}

impl TerminalSurface {
    fn hit(&self, x: u16, y: u16) -> Option<CellKey> {
        self.cells
            .cells()
            .find(|(_, rect)| rect.width > 0 && rect.contains(Position::new(x, y)))
            .map(|(key, _)| key.clone())
    }
}

impl FocusSurface for TerminalSurface {
    fn scroll_to_index(&mut self, index: usize, align: ScrollAlign) {
        log::trace!("scroll to row {index} ({align:?})");
    }

    fn focus_cell(&mut self, key: &CellKey) -> bool {
        if self.cells.cell(key).is_none() {
            return false;
        }
        self.focused = Some(key.clone());
        true
    }

    fn scroll_cell_into_view(&mut self, key: &CellKey) {
        self.reveal = Some(key.clone());
    }

    fn focus_first_interactive(&mut self, key: &CellKey) -> bool {
        if !self.focus_cell(key) {
            return false;
        }
        self.reveal = Some(key.clone());
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ColumnSlot {
    col: usize,
    x: u16,
    width: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RowSlot {
    index: usize,
    y: u16,
    loader: bool,
}

#[derive(Debug, Clone, Default)]
struct ViewLayout {
    table: Rect,
    header: Rect,
    body: Rect,
    status: Rect,
    columns: Vec<ColumnSlot>,
    rows: Vec<RowSlot>,
}

/// Terminal host for one [`Grid`] of [`Record`]s and the [`Pager`] feeding it.
pub struct GridApp {
    grid: Grid<Record>,
    pager: Pager<Record>,
    queued: Option<PageRequest>,
    seen_revision: u64,
    title: String,
    edit: Option<EditBuffer>,
    prompt: Option<FilterPrompt>,
    surface: TerminalSurface,
    view: ViewLayout,
    col_offset: usize,
    last_click: Option<(CellKey, Instant)>,
    help_visible: bool,
    status: Option<String>,
    status_token: u64,
    internal_tx: Sender<InternalEvent>,
    internal_rx: Receiver<InternalEvent>,
}

impl GridApp {
    pub fn new(mut grid: Grid<Record>, options: AppOptions) -> Self {
        grid.hydrate_filters(options.initial_filters.as_ref());
        let mut pager = Pager::new(options.page_size);
        let request = if options.initial_filters.is_some() {
            let table = grid.table();
            let filters = map_filters_to_server(
                &filter_meta_by_id(table.columns()),
                &table.state().column_filters,
            );
            pager.set_filters(filters)
        } else {
            pager.load_first_page()
        };
        grid.set_fetch_flags(pager.flags());
        let (internal_tx, internal_rx) = mpsc::channel();
        Self {
            grid,
            pager,
            queued: Some(request),
            seen_revision: 0,
            title: options.title,
            edit: None,
            prompt: None,
            surface: TerminalSurface::default(),
            view: ViewLayout::default(),
            col_offset: 0,
            last_click: None,
            help_visible: false,
            status: None,
            status_token: 0,
            internal_tx,
            internal_rx,
        }
    }

    pub fn grid(&self) -> &Grid<Record> {
        &self.grid
    }

    pub fn grid_mut(&mut self) -> &mut Grid<Record> {
        &mut self.grid
    }

    pub fn pager(&self) -> &Pager<Record> {
        &self.pager
    }

    pub fn status(&self) -> Option<&str> {
        self.status.as_deref()
    }

    /// Restores the saved column layout.
    pub fn start<R: GridRuntime>(&mut self, runtime: &mut R) {
        if let Err(error) = self.grid.restore_prefs(runtime.prefs()) {
            log::warn!("column preferences not restored: {error:#}");
            self.emit_status(format!("layout not restored: {error}"));
        }
    }

    /// One pass of background work: the queued fetch, row requests,
    /// settlements, server sync, load-more and preference persistence.
    pub fn tick<R: GridRuntime>(&mut self, runtime: &mut R, now: Instant) {
        self.process_internal_events();
        self.run_fetch(runtime);
        self.run_requests(runtime);
        self.grid.apply_settlements();
        self.sync_rows();

        for event in self.grid.poll_sync(now) {
            let request = match event {
                SyncEvent::ServerSort(sort) => self.pager.set_sort(sort),
                SyncEvent::ServerFilters(filters) => self.pager.set_filters(filters),
            };
            self.queue(request);
        }
        if self.grid.poll_load_more(self.pager.is_loading_anything())
            && let Some(request) = self.pager.load_more()
        {
            log::debug!("loading another page");
            self.queue(request);
        }

        if let Err(error) = self.grid.flush_prefs(runtime.prefs(), now) {
            log::warn!("column preferences not saved: {error:#}");
        }
        match self.grid.sync_prefs(runtime.prefs()) {
            Ok(0) => {}
            Ok(applied) => log::debug!("applied {applied} layout change(s) from another session"),
            Err(error) => log::warn!("column preference changes not read: {error:#}"),
        }
        self.sync_edit_buffer();
    }

    /// Commits what is still dirty and saves the layout, as the grid closes.
    pub fn shutdown<R: GridRuntime>(&mut self, runtime: &mut R) -> Result<()> {
        let emitted = self.grid.unmount();
        if emitted > 0 {
            log::info!("saving {emitted} edited row(s) before exit");
        }
        self.run_requests(runtime);
        self.grid.apply_settlements();
        self.edit = None;
        self.grid
            .flush_prefs_now(runtime.prefs())
            .context("save column preferences on exit")?;
        Ok(())
    }

    /// How long the loop may block on input before work comes due.
    pub fn poll_timeout(&self, now: Instant) -> Duration {
        if self.queued.is_some() {
            return Duration::ZERO;
        }
        self.grid
            .next_deadline()
            .map_or(TICK, |deadline| deadline.saturating_duration_since(now).min(TICK))
    }

    fn queue(&mut self, request: PageRequest) {
        self.queued = Some(request);
        self.grid.set_fetch_flags(self.pager.flags());
    }

    fn run_fetch<R: GridRuntime>(&mut self, runtime: &mut R) {
        let Some(request) = self.queued.take() else {
            return;
        };
        // The load-more trigger re-arms only on a poll that sees the request
        // in flight.
        self.grid.poll_load_more(self.pager.is_loading_anything());
        log::debug!(
            "fetching page {} at cursor {:?}",
            request.seq,
            request.cursor
        );
        let result = runtime.fetch_page(&request.params, request.cursor.as_deref());
        let applied = self.pager.receive(request.seq, result);
        if applied
            && self.pager.flags().status == FetchStatus::Error
            && let Some(error) = self.pager.error()
        {
            let message = format!("load failed: {error}");
            self.emit_status(message);
        }
    }

    fn run_requests<R: GridRuntime>(&mut self, runtime: &mut R) {
        for request in self.grid.take_requests() {
            match request {
                RowRequest::Commit(commit) => {
                    match runtime.commit_row(&commit.row_id, &commit.patch) {
                        Ok(stored) => {
                            commit.completion.succeed();
                            self.pager.apply_update(stored);
                        }
                        Err(error) => {
                            let failure = commit_failure(&error);
                            log::warn!("save of row {} failed: {error:#}", commit.row_id);
                            self.emit_status(format!("row {} not saved: {failure}", commit.row_id));
                            commit.completion.fail(failure);
                        }
                    }
                }
                RowRequest::Delete(delete) => match runtime.delete_row(&delete.row_id) {
                    Ok(()) => {
                        delete.completion.succeed();
                        self.pager.remove(&delete.row_id);
                        self.emit_status(format!("deleted row {}", delete.row_id));
                    }
                    Err(error) => {
                        let failure = commit_failure(&error);
                        log::warn!("delete of row {} failed: {error:#}", delete.row_id);
                        self.emit_status(format!("row {} not deleted: {failure}", delete.row_id));
                        delete.completion.fail(failure);
                    }
                },
            }
        }
    }

    fn sync_rows(&mut self) {
        if self.pager.revision() == self.seen_revision {
            self.grid.set_fetch_flags(self.pager.flags());
            return;
        }
        self.seen_revision = self.pager.revision();
        self.grid.set_rows(
            self.pager.items().to_vec(),
            self.pager.has_next_page(),
            self.pager.flags(),
        );
    }

    fn process_internal_events(&mut self) {
        while let Ok(event) = self.internal_rx.try_recv() {
            match event {
                InternalEvent::ClearStatus { token } if token == self.status_token => {
                    self.status = None;
                }
                InternalEvent::ClearStatus { .. } => {}
            }
        }
    }

    fn emit_status(&mut self, message: impl Into<String>) {
        self.status = Some(message.into());
        self.status_token = self.status_token.saturating_add(1);
        schedule_status_clear(&self.internal_tx, self.status_token);
    }

    /// Keeps the edit buffer on the cell being edited, seeding it from the
    /// cell's current value when editing moves.
    fn sync_edit_buffer(&mut self) {
        if !self.grid.is_editing() {
            self.edit = None;
            return;
        }
        let Some((row, col)) = self.grid.focus().active() else {
            self.edit = None;
            return;
        };
        let table = self.grid.table();
        let (Some(row_id), Some(column)) = (table.row_id_at(row), table.column_at(col)) else {
            self.edit = None;
            return;
        };
        let key = CellKey::new(row_id, column.id.clone());
        if self.edit.as_ref().is_some_and(|edit| edit.key == key) {
            return;
        }
        let text = self
            .grid
            .get_cell_value(row, &key.column)
            .map(|value| display_value(&value))
            .unwrap_or_default();
        self.edit = Some(EditBuffer {
            key,
            text,
            error: None,
        });
    }

    fn apply_edit_buffer(&mut self) {
        let Some(edit) = &mut self.edit else {
            return;
        };
        let table = self.grid.table();
        let (Some(row), Some(col)) = (
            table.row_index_of(&edit.key.row),
            table.column_index(&edit.key.column),
        ) else {
            return;
        };
        edit.error = self.grid.set_cell_text(row, col, &edit.text).err();
    }

    /// Returns `true` when the app should exit.
    pub fn handle_key(&mut self, key: KeyEvent) -> bool {
        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        if ctrl && matches!(key.code, KeyCode::Char('q') | KeyCode::Char('c')) {
            return true;
        }

        if self.help_visible {
            if matches!(key.code, KeyCode::Esc | KeyCode::Char('?')) {
                self.help_visible = false;
            }
            return false;
        }

        if self.prompt.is_some() {
            self.handle_prompt_key(key);
            return false;
        }

        if self.grid.is_editing() {
            self.handle_edit_key(key);
            self.sync_edit_buffer();
            return false;
        }

        if let Some(input) = key_input(key)
            && self.grid.on_keydown(&input).handled()
        {
            self.sync_edit_buffer();
            return false;
        }

        match table_command_for_key(key) {
            Some(command) => self.apply_table_command(command),
            None => false,
        }
    }

    fn handle_edit_key(&mut self, key: KeyEvent) {
        let plain = !key
            .modifiers
            .intersects(KeyModifiers::CONTROL | KeyModifiers::ALT);
        match key.code {
            KeyCode::Backspace => {
                if let Some(edit) = &mut self.edit {
                    edit.text.pop();
                }
                self.apply_edit_buffer();
            }
            KeyCode::Char(ch) if plain && ch != ' ' => {
                if let Some(edit) = &mut self.edit {
                    edit.text.push(ch);
                }
                self.apply_edit_buffer();
            }
            _ => {
                let Some(input) = key_input(key) else {
                    return;
                };
                let input = input.on(EventTarget::EditableControl);
                let invalid = self.edit.as_ref().is_some_and(|edit| edit.error.is_some());
                if invalid && matches!(input.key, Key::Enter | Key::Tab) {
                    self.emit_status("fix the value or press esc to discard the row");
                    return;
                }
                let propagation = self.grid.on_keydown(&input);
                if propagation == Propagation::STOP && input.key == Key::Space {
                    if let Some(edit) = &mut self.edit {
                        edit.text.push(' ');
                    }
                    self.apply_edit_buffer();
                }
            }
        }
    }

    fn focused_column(&self) -> Option<(usize, usize, ColumnId)> {
        let (row, col) = self.grid.focus().active()?;
        let column = self.grid.table().column_at(col)?;
        Some((row, col, column.id.clone()))
    }

    fn apply_table_command(&mut self, command: TableCommand) -> bool {
        match command {
            TableCommand::Quit => return true,
            TableCommand::ToggleHelp => self.help_visible = true,
            TableCommand::Reload => {
                let request = self.pager.load_first_page();
                self.queue(request);
            }
            TableCommand::ToggleAllRows => {
                let select = self.grid.selection_header() != SelectionHeader::Checked;
                self.grid.toggle_all_rows_selected(select);
            }
            TableCommand::ClearFilters => {
                if self
                    .grid
                    .table_mut()
                    .dispatch(TableChange::ColumnFilters(Updater::Set(Vec::new())))
                {
                    self.emit_status("filters cleared");
                }
            }
            TableCommand::ShowAllColumns => {
                self.grid
                    .table_mut()
                    .dispatch(TableChange::ColumnVisibility(Updater::Set(
                        VisibilityState::new(),
                    )));
            }
            TableCommand::CycleSort
            | TableCommand::OpenFilter
            | TableCommand::HideColumn
            | TableCommand::Narrow
            | TableCommand::Widen
            | TableCommand::MoveColumn(_) => {
                let Some((row, col, column)) = self.focused_column() else {
                    self.emit_status("move to a cell first");
                    return false;
                };
                self.apply_column_command(command, row, col, &column);
            }
        }
        false
    }

    fn apply_column_command(
        &mut self,
        command: TableCommand,
        row: usize,
        col: usize,
        column: &ColumnId,
    ) {
        match command {
            TableCommand::CycleSort => {
                if !self.grid.table_mut().toggle_sorting(column) {
                    self.emit_status(format!("{column} cannot be sorted"));
                }
            }
            TableCommand::OpenFilter => self.open_filter_prompt(column),
            TableCommand::HideColumn => {
                if self.grid.table_mut().set_column_visibility(column, false) {
                    self.refocus(row, col);
                    self.emit_status(format!("hid {column}; C shows all"));
                } else {
                    self.emit_status(format!("{column} cannot be hidden"));
                }
            }
            TableCommand::Narrow | TableCommand::Widen => {
                let table = self.grid.table();
                let Some(width) = table
                    .column_at(col)
                    .map(|definition| table.column_width(definition))
                else {
                    return;
                };
                let next = if command == TableCommand::Widen {
                    width.saturating_add(RESIZE_STEP)
                } else {
                    width.saturating_sub(RESIZE_STEP)
                };
                if !self.grid.table_mut().set_column_size(column, next) {
                    self.emit_status(format!("{column} cannot be resized"));
                }
            }
            TableCommand::MoveColumn(delta) => {
                let mut order = self
                    .grid
                    .table()
                    .leaf_columns()
                    .iter()
                    .map(|definition| definition.id.clone())
                    .collect::<Vec<_>>();
                let Some(from) = order.iter().position(|id| id == column) else {
                    return;
                };
                let Some(to) = from.checked_add_signed(delta).filter(|to| *to < order.len())
                else {
                    return;
                };
                order.swap(from, to);
                self.grid
                    .table_mut()
                    .dispatch(TableChange::ColumnOrder(Updater::Set(order)));
                if let Some(next) = self.grid.table().column_index(column) {
                    self.refocus(row, next);
                }
            }
            _ => {}
        }
    }

    fn refocus(&mut self, row: usize, col: usize) {
        let row = isize::try_from(row).unwrap_or(isize::MAX);
        let col = isize::try_from(col).unwrap_or(isize::MAX);
        self.grid.focus_cell_by_index(row, col, FocusOptions::quiet());
    }

    fn open_filter_prompt(&mut self, column: &ColumnId) {
        let table = self.grid.table();
        let Some(definition) = table.leaf_columns().into_iter().find(|def| &def.id == column)
        else {
            return;
        };
        let Some(spec) = &definition.filter else {
            let message = format!("{} has no filter", definition.title);
            self.emit_status(message);
            return;
        };
        let hint = match &spec.kind {
            FilterKind::Text { .. } => "text".to_owned(),
            FilterKind::DateRange { .. } => "YYYY-MM-DD..YYYY-MM-DD".to_owned(),
            FilterKind::Boolean { .. } => "yes/no".to_owned(),
            FilterKind::MultiSelect { options, .. } => {
                let context = OptionsContext {
                    column,
                    filters: &table.state().column_filters,
                };
                let labels = options
                    .resolve(&context)
                    .into_iter()
                    .map(|option| option.label)
                    .take(6)
                    .collect::<Vec<_>>();
                if labels.is_empty() {
                    "comma separated".to_owned()
                } else {
                    format!("{}, ...", labels.join(", "))
                }
            }
        };
        let prompt = FilterPrompt {
            column: column.clone(),
            title: spec.label.clone().unwrap_or_else(|| definition.title.clone()),
            hint,
            input: filter_input_text(table.column_filter(column)),
        };
        self.prompt = Some(prompt);
    }

    fn handle_prompt_key(&mut self, key: KeyEvent) {
        let Some(prompt) = &mut self.prompt else {
            return;
        };
        match key.code {
            KeyCode::Esc => self.prompt = None,
            KeyCode::Backspace => {
                prompt.input.pop();
            }
            KeyCode::Char(ch) => prompt.input.push(ch),
            KeyCode::Enter => {
                let column = prompt.column.clone();
                let input = prompt.input.clone();
                match self.parse_prompt(&column, &input) {
                    Ok(value) => {
                        let cleared = value.is_none();
                        self.grid.table_mut().set_column_filter(&column, value);
                        self.prompt = None;
                        if cleared {
                            self.emit_status(format!("{column} filter cleared"));
                        }
                    }
                    Err(message) => self.emit_status(message),
                }
            }
            _ => {}
        }
    }

    fn parse_prompt(&self, column: &ColumnId, input: &str) -> Result<Option<FilterValue>, String> {
        let table = self.grid.table();
        let Some(spec) = table
            .leaf_columns()
            .into_iter()
            .find(|def| &def.id == column)
            .and_then(|def| def.filter.as_ref())
        else {
            return Err(format!("{column} has no filter"));
        };
        let options = match &spec.kind {
            FilterKind::MultiSelect { options, .. } => options.resolve(&OptionsContext {
                column,
                filters: &table.state().column_filters,
            }),
            _ => Vec::new(),
        };
        parse_filter_input(&spec.kind, &options, input)
    }

    pub fn handle_mouse(&mut self, mouse: MouseEvent, now: Instant) {
        match mouse.kind {
            MouseEventKind::Down(MouseButton::Left) => {
                let Some(key) = self.surface.hit(mouse.column, mouse.row) else {
                    return;
                };
                let table = self.grid.table();
                let (Some(row), Some(col)) = (
                    table.row_index_of(&key.row),
                    table.column_index(&key.column),
                ) else {
                    return;
                };
                let control = table
                    .column_at(col)
                    .is_some_and(|column| !matches!(column.role, ColumnRole::Data(_)));
                let double = self.last_click.as_ref().is_some_and(|(last, at)| {
                    last == &key && now.saturating_duration_since(*at) <= DOUBLE_CLICK
                });
                if double {
                    self.grid.on_cell_dbl_click(row, col);
                    self.last_click = None;
                } else {
                    let target = if control {
                        EventTarget::InteractiveControl
                    } else {
                        EventTarget::Cell
                    };
                    self.grid.on_cell_click(row, col, target);
                    self.last_click = Some((key, now));
                }
                self.sync_edit_buffer();
            }
            MouseEventKind::ScrollDown | MouseEventKind::ScrollUp => {
                let rows = self.grid.virtual_rows_mut();
                let step = WHEEL_ROWS * u64::from(rows.options().row_height);
                let offset = if mouse.kind == MouseEventKind::ScrollDown {
                    rows.scroll_offset().saturating_add(step)
                } else {
                    rows.scroll_offset().saturating_sub(step)
                };
                rows.set_scroll_offset(offset);
            }
            _ => {}
        }
    }

    /// Sizes the viewport, applies scroll effects, lays the cells out, then
    /// lands focus on the mounted cells.
    pub fn prepare_frame(&mut self, area: Rect) {
        let layout = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Min(3), Constraint::Length(3)])
            .split(area);
        let table = layout[0];
        let inner = Block::default().borders(Borders::ALL).inner(table);
        let header = Rect {
            height: inner.height.min(1),
            ..inner
        };
        let body = Rect {
            y: inner.y.saturating_add(header.height),
            height: inner.height.saturating_sub(header.height),
            ..inner
        };
        self.view.table = table;
        self.view.header = header;
        self.view.body = body;
        self.view.status = layout[1];

        let row_height = u64::from(self.grid.virtual_rows().options().row_height);
        self.grid
            .virtual_rows_mut()
            .set_viewport(u64::from(body.height) * row_height);
        self.grid.flush_scroll_effects(&mut self.surface);
        self.layout_cells();
        self.grid.flush_effects(&mut self.surface);

        if let Some(key) = self.surface.reveal.take()
            && self.reveal_column(&key.column)
        {
            self.layout_cells();
        }
    }

    fn layout_cells(&mut self) {
        let body = self.view.body;
        let table = self.grid.table();
        let columns = table.visible_leaf_columns();
        self.col_offset = self.col_offset.min(columns.len().saturating_sub(1));

        let mut slots = Vec::new();
        let mut x = body.x;
        for (col, column) in columns.iter().enumerate().skip(self.col_offset) {
            if x >= body.right() {
                break;
            }
            let width = cell_width(table.column_width(column)).min(body.right() - x);
            slots.push(ColumnSlot { col, x, width });
            x = x.saturating_add(width).saturating_add(1);
        }

        let rows = self.grid.virtual_rows();
        let row_height = u64::from(rows.options().row_height);
        let offset = rows.scroll_offset();
        let mut row_slots = Vec::new();
        self.surface.cells.clear();
        for item in rows.virtual_items() {
            let line = item
                .start
                .checked_sub(offset)
                .map(|delta| delta / row_height)
                .and_then(|line| u16::try_from(line).ok())
                .filter(|line| *line < body.height);
            let y = line.map(|line| body.y + line);
            let loader = rows.is_loader_index(item.index);
            if let Some(y) = y {
                row_slots.push(RowSlot {
                    index: item.index,
                    y,
                    loader,
                });
            }
            if loader {
                continue;
            }
            let Some(row_id) = table.row_id_at(item.index) else {
                continue;
            };
            for (col, column) in columns.iter().enumerate() {
                let slot = slots.iter().find(|slot| slot.col == col);
                let rect = match (y, slot) {
                    (Some(y), Some(slot)) => Rect::new(slot.x, y, slot.width, 1),
                    _ => Rect::default(),
                };
                self.surface
                    .cells
                    .set_cell_ref(CellKey::new(row_id.clone(), column.id.clone()), Some(rect));
            }
            let row_rect = y.map_or_else(Rect::default, |y| Rect::new(body.x, y, body.width, 1));
            self.surface.cells.set_row_ref(row_id, Some(row_rect));
        }
        self.view.columns = slots;
        self.view.rows = row_slots;
    }

    /// Moves the horizontal offset so the column is on screen. Returns
    /// whether it moved.
    fn reveal_column(&mut self, column: &ColumnId) -> bool {
        let table = self.grid.table();
        let Some(index) = table.column_index(column) else {
            return false;
        };
        let before = self.col_offset;
        if index < self.col_offset {
            self.col_offset = index;
            return true;
        }
        let widths = table
            .visible_leaf_columns()
            .iter()
            .map(|definition| cell_width(table.column_width(definition)) + 1)
            .collect::<Vec<_>>();
        let available = self.view.body.width;
        while self.col_offset < index {
            let used = widths[self.col_offset..=index]
                .iter()
                .fold(0_u16, |sum, width| sum.saturating_add(*width));
            if used <= available.saturating_add(1) {
                break;
            }
            self.col_offset += 1;
        }
        self.col_offset != before
    }

    pub fn render(&self, frame: &mut ratatui::Frame<'_>) {
        let block = Block::default()
            .title(self.table_title())
            .borders(Borders::ALL);
        frame.render_widget(block, self.view.table);
        frame.render_widget(
            Paragraph::new(Line::from(self.header_spans())),
            self.view.header,
        );

        let body = self.view.body;
        for slot in &self.view.rows {
            let line = if slot.loader {
                let text = if self.pager.flags().is_fetching_next_page {
                    "loading more..."
                } else {
                    "..."
                };
                Line::from(Span::styled(text, Style::default().fg(Color::DarkGray)))
            } else {
                Line::from(self.row_spans(slot.index))
            };
            frame.render_widget(
                Paragraph::new(line),
                Rect::new(body.x, slot.y, body.width, 1),
            );
        }

        let status = Paragraph::new(self.status_text())
            .style(Style::default().fg(Color::Yellow))
            .block(Block::default().borders(Borders::ALL));
        frame.render_widget(status, self.view.status);

        if let Some(edit) = &self.edit
            && self.surface.focused.as_ref() == Some(&edit.key)
            && let Some(rect) = self.surface.cells.cell(&edit.key)
            && rect.width > 0
        {
            let typed = u16::try_from(edit.text.chars().count()).unwrap_or(u16::MAX);
            let x = rect.x + typed.min(rect.width - 1);
            frame.set_cursor_position(Position::new(x, rect.y));
        }

        if self.help_visible {
            let area = centered_rect(70, 60, frame.area());
            frame.render_widget(Clear, area);
            let help = Paragraph::new(help_overlay_text())
                .block(Block::default().title("help").borders(Borders::ALL));
            frame.render_widget(help, area);
        }
    }

    fn table_title(&self) -> String {
        let selected = self.grid.selected_row_ids().count();
        let mut title = format!("{} | {}", self.title, self.grid.live_message());
        if selected > 0 {
            title.push_str(&format!(" | {selected} selected"));
        }
        title
    }

    fn header_spans(&self) -> Vec<Span<'static>> {
        let style = Style::default()
            .fg(Color::White)
            .add_modifier(Modifier::BOLD);
        let mut spans = Vec::new();
        for slot in &self.view.columns {
            let label = self.header_label(slot.col);
            spans.push(Span::styled(fit(&label, slot.width, false), style));
            spans.push(Span::raw(" "));
        }
        spans
    }

    fn header_label(&self, col: usize) -> String {
        let table = self.grid.table();
        let Some(column) = table.column_at(col) else {
            return String::new();
        };
        match column.role {
            ColumnRole::Selection => match self.grid.selection_header() {
                SelectionHeader::Checked => "[x]".to_owned(),
                SelectionHeader::Indeterminate => "[-]".to_owned(),
                SelectionHeader::Unchecked => "[ ]".to_owned(),
            },
            ColumnRole::Deletion => String::new(),
            ColumnRole::Data(_) => {
                let mut label = column.title.clone();
                if let Some(sort) = table
                    .state()
                    .sorting
                    .first()
                    .filter(|sort| sort.id == column.id)
                {
                    label.push(' ');
                    label.push_str(if sort.desc {
                        SORT_MARK_DESC
                    } else {
                        SORT_MARK_ASC
                    });
                }
                if table.column_filter(&column.id).is_some() {
                    label.push(' ');
                    label.push_str(FILTER_MARK);
                }
                label
            }
        }
    }

    fn row_spans(&self, row: usize) -> Vec<Span<'static>> {
        let mut spans = Vec::new();
        for slot in &self.view.columns {
            let (text, style, right) = self.cell_display(row, slot.col);
            spans.push(Span::styled(fit(&text, slot.width, right), style));
            spans.push(Span::raw(" "));
        }
        spans
    }

    /// Text, style and right alignment for one cell.
    fn cell_display(&self, row: usize, col: usize) -> (String, Style, bool) {
        let table = self.grid.table();
        let (Some(column), Some(row_id), Some(view)) = (
            table.column_at(col),
            table.row_id_at(row),
            self.grid.cell_view(row, col),
        ) else {
            return (String::new(), Style::default(), false);
        };
        let pending = self.grid.editor().is_row_pending(&row_id);

        let (text, right) = match column.role {
            ColumnRole::Selection => {
                let mark = if table.is_row_selected(&row_id) {
                    "[x]"
                } else {
                    "[ ]"
                };
                (mark.to_owned(), false)
            }
            ColumnRole::Deletion => {
                let mark = match (self.grid.shows_delete_control(row), pending) {
                    (false, _) => "",
                    (true, true) => "...",
                    (true, false) => "[del]",
                };
                (mark.to_owned(), false)
            }
            ColumnRole::Data(kind) => {
                let editing_text = self
                    .edit
                    .as_ref()
                    .filter(|edit| {
                        view.editing && edit.key.row == row_id && edit.key.column == column.id
                    })
                    .map(|edit| edit.text.clone());
                let text = editing_text.unwrap_or_else(|| display_value(&view.value));
                (text, matches!(kind, ValueKind::Int | ValueKind::Decimal) && !view.editing)
            }
        };

        let mut style = Style::default();
        if table.is_row_selected(&row_id) {
            style = style.add_modifier(Modifier::BOLD);
        }
        if pending {
            style = style.fg(Color::DarkGray);
        }
        if view.dirty {
            style = style.fg(Color::Yellow);
        }
        if view.error.is_some() {
            style = style.fg(Color::Red).add_modifier(Modifier::UNDERLINED);
        }
        if view.focused {
            style = style.fg(Color::Black).bg(Color::Cyan);
        }
        if view.editing {
            style = Style::default().fg(Color::White).bg(Color::Blue);
        }
        (text, style, right)
    }

    fn status_text(&self) -> String {
        let mode = if self.prompt.is_some() {
            "FILTER"
        } else if self.grid.is_editing() {
            "EDIT"
        } else {
            "NAV"
        };
        let detail = if let Some(prompt) = &self.prompt {
            Some(format!("{} ({}): {}", prompt.title, prompt.hint, prompt.input))
        } else if let Some(error) = self.edit.as_ref().and_then(|edit| edit.error) {
            Some(format!("invalid value: {error}"))
        } else {
            self.focused_cell_error()
        };
        let hints = if self.grid.is_editing() {
            "type to edit | enter/tab save | esc discard"
        } else {
            "j/k/h/l tab | enter edit | space select | s sort f/F filter | c/C < > [ ] | a r ? q"
        };
        let mut parts = vec![mode.to_owned(), self.grid.live_message()];
        parts.extend(detail);
        parts.extend(self.status.clone());
        parts.push(hints.to_owned());
        parts.join(" | ")
    }

    fn focused_cell_error(&self) -> Option<String> {
        let (row, col) = self.grid.focus().active()?;
        let view = self.grid.cell_view(row, col)?;
        view.error.map(|error| format!("rejected: {error}"))
    }
}

pub fn run_grid_app<R: GridRuntime>(app: &mut GridApp, runtime: &mut R) -> Result<()> {
    enable_raw_mode().context("enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, terminal::EnterAlternateScreen, EnableMouseCapture)
        .context("enter alternate screen")?;

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("create terminal")?;

    app.start(runtime);
    let result = event_loop(&mut terminal, app, runtime);
    let shutdown = app.shutdown(runtime);

    disable_raw_mode().context("disable raw mode")?;
    execute!(
        io::stdout(),
        DisableMouseCapture,
        terminal::LeaveAlternateScreen
    )
    .context("leave alternate screen")?;
    result.and(shutdown)
}

fn event_loop<R: GridRuntime>(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut GridApp,
    runtime: &mut R,
) -> Result<()> {
    loop {
        app.tick(runtime, Instant::now());

        let size = terminal.size().context("read terminal size")?;
        app.prepare_frame(Rect::new(0, 0, size.width, size.height));
        terminal
            .draw(|frame| app.render(frame))
            .context("draw frame")?;

        let timeout = app.poll_timeout(Instant::now());
        if !event::poll(timeout).context("poll event")? {
            continue;
        }
        match event::read().context("read event")? {
            Event::Key(key) if key.kind != KeyEventKind::Release => {
                if app.handle_key(key) {
                    return Ok(());
                }
            }
            Event::Mouse(mouse) => app.handle_mouse(mouse, Instant::now()),
            _ => {}
        }
    }
}

fn schedule_status_clear(internal_tx: &Sender<InternalEvent>, token: u64) {
    let sender = internal_tx.clone();
    thread::spawn(move || {
        thread::sleep(STATUS_TTL);
        let _ = sender.send(InternalEvent::ClearStatus { token });
    });
}

fn commit_failure(error: &anyhow::Error) -> CommitFailure {
    error
        .downcast_ref::<CommitFailure>()
        .cloned()
        .unwrap_or_else(|| CommitFailure::new(format!("{error:#}")))
}

fn key_input(key: KeyEvent) -> Option<KeyInput> {
    let mapped = match key.code {
        KeyCode::Up => Key::Up,
        KeyCode::Down => Key::Down,
        KeyCode::Left => Key::Left,
        KeyCode::Right => Key::Right,
        KeyCode::Enter => Key::Enter,
        KeyCode::Tab | KeyCode::BackTab => Key::Tab,
        KeyCode::Esc => Key::Escape,
        KeyCode::Home => Key::Home,
        KeyCode::End => Key::End,
        KeyCode::PageUp => Key::PageUp,
        KeyCode::PageDown => Key::PageDown,
        KeyCode::Char(' ') => Key::Space,
        KeyCode::Char(ch) => Key::Char(ch),
        _ => return None,
    };
    let mut input = KeyInput::new(mapped);
    input.shift = key.modifiers.contains(KeyModifiers::SHIFT) || key.code == KeyCode::BackTab;
    input.ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
    input.meta = key
        .modifiers
        .intersects(KeyModifiers::ALT | KeyModifiers::SUPER | KeyModifiers::META);
    Some(input)
}

fn table_command_for_key(key: KeyEvent) -> Option<TableCommand> {
    if key.modifiers.contains(KeyModifiers::CONTROL) {
        return None;
    }
    match key.code {
        KeyCode::Char('s') => Some(TableCommand::CycleSort),
        KeyCode::Char('f') => Some(TableCommand::OpenFilter),
        KeyCode::Char('F') => Some(TableCommand::ClearFilters),
        KeyCode::Char('c') => Some(TableCommand::HideColumn),
        KeyCode::Char('C') => Some(TableCommand::ShowAllColumns),
        KeyCode::Char('<') => Some(TableCommand::Narrow),
        KeyCode::Char('>') => Some(TableCommand::Widen),
        KeyCode::Char('[') => Some(TableCommand::MoveColumn(-1)),
        KeyCode::Char(']') => Some(TableCommand::MoveColumn(1)),
        KeyCode::Char('a') => Some(TableCommand::ToggleAllRows),
        KeyCode::Char('r') => Some(TableCommand::Reload),
        KeyCode::Char('?') => Some(TableCommand::ToggleHelp),
        KeyCode::Char('q') => Some(TableCommand::Quit),
        _ => None,
    }
}

fn cell_width(px: u16) -> u16 {
    px.div_ceil(PX_PER_CHAR).max(3)
}

fn display_value(value: &CellValue) -> String {
    match value {
        CellValue::Decimal(value) => format!("{value:.2}"),
        other => other.to_string(),
    }
}

/// Pads or truncates to exactly `width` characters.
fn fit(text: &str, width: u16, right: bool) -> String {
    let width = usize::from(width);
    let count = text.chars().count();
    if count > width {
        if width == 0 {
            return String::new();
        }
        let mut out = text.chars().take(width - 1).collect::<String>();
        out.push('…');
        return out;
    }
    let pad = " ".repeat(width - count);
    if right {
        format!("{pad}{text}")
    } else {
        format!("{text}{pad}")
    }
}

fn filter_input_text(value: Option<&FilterValue>) -> String {
    match value {
        None => String::new(),
        Some(FilterValue::Text(text)) => text.clone(),
        Some(FilterValue::Bool(flag)) => if *flag { "yes" } else { "no" }.to_owned(),
        Some(FilterValue::Multi(values)) => values.join(","),
        Some(FilterValue::DateRange(range)) => format!(
            "{}..{}",
            range.from.as_deref().unwrap_or_default(),
            range.to.as_deref().unwrap_or_default()
        ),
    }
}

/// Reads prompt input as a filter value of the column's kind. Blank input
/// clears the filter. Date ranges are `from..to` with either side optional.
fn parse_filter_input(
    kind: &FilterKind,
    options: &[FilterOption],
    raw: &str,
) -> Result<Option<FilterValue>, String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    match kind {
        FilterKind::Text { .. } => Ok(Some(FilterValue::Text(raw.to_owned()))),
        FilterKind::MultiSelect { .. } => {
            let mut values: Vec<String> = Vec::new();
            for part in raw.split(',').map(str::trim).filter(|part| !part.is_empty()) {
                let value = if options.is_empty() {
                    part.to_owned()
                } else {
                    options
                        .iter()
                        .find(|option| {
                            option.value == part || option.label.eq_ignore_ascii_case(part)
                        })
                        .map(|option| option.value.clone())
                        .ok_or_else(|| format!("unknown option {part:?}"))?
                };
                if !values.contains(&value) {
                    values.push(value);
                }
            }
            Ok((!values.is_empty()).then_some(FilterValue::Multi(values)))
        }
        FilterKind::Boolean {
            true_label,
            false_label,
            ..
        } => {
            let matches = |label: &Option<String>| {
                label
                    .as_deref()
                    .is_some_and(|label| label.eq_ignore_ascii_case(raw))
            };
            if matches(true_label) {
                return Ok(Some(FilterValue::Bool(true)));
            }
            if matches(false_label) {
                return Ok(Some(FilterValue::Bool(false)));
            }
            match CellValue::parse_as(ValueKind::Bool, raw) {
                Ok(CellValue::Bool(flag)) => Ok(Some(FilterValue::Bool(flag))),
                _ => Err(format!("expected yes or no, got {raw:?}")),
            }
        }
        FilterKind::DateRange { .. } => {
            let (from, to) = raw.split_once("..").unwrap_or((raw, ""));
            let bound = |part: &str| -> Result<Option<String>, String> {
                let part = part.trim();
                if part.is_empty() {
                    return Ok(None);
                }
                parse_date(part)
                    .map(|_| Some(part.to_owned()))
                    .map_err(|error| format!("{part:?}: {error}"))
            };
            let range = DateRange {
                from: bound(from)?,
                to: bound(to)?,
            };
            let any = range.from.is_some() || range.to.is_some();
            Ok(any.then_some(FilterValue::DateRange(range)))
        }
    }
}

fn help_overlay_text() -> &'static str {
    "j/k/h/l, arrows   move\n\
     tab, shift+tab    next / previous cell\n\
     home/end          row start / end (ctrl: grid)\n\
     pgup/pgdn         page\n\
     enter             edit cell, press button\n\
     enter/tab (edit)  save and move\n\
     esc               discard edit / clear focus\n\
     space             toggle checkbox\n\
     s                 cycle sort\n\
     f / F             filter column / clear filters\n\
     c / C             hide column / show all\n\
     < / >             narrower / wider\n\
     [ / ]             move column left / right\n\
     a                 select all rows\n\
     r                 reload\n\
     q, ctrl+q         quit"
}

fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(area);
    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(vertical[1])[1]
}
