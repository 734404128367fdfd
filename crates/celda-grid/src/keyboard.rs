// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use crate::{CommitReason, FocusOptions};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Up,
    Down,
    Left,
    Right,
    Char(char),
    Enter,
    Tab,
    Escape,
    Home,
    End,
    PageUp,
    PageDown,
    Space,
}

/// What the event landed on inside a cell.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EventTarget {
    /// The cell itself.
    #[default]
    Cell,
    /// A native text control that consumes arrows and paging keys.
    EditableControl,
    /// A nested button, checkbox, link or opted-out element handling its own
    /// interaction.
    InteractiveControl,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyInput {
    pub key: Key,
    pub shift: bool,
    pub ctrl: bool,
    pub meta: bool,
    pub target: EventTarget,
}

impl KeyInput {
    pub fn new(key: Key) -> Self {
        Self {
            key,
            shift: false,
            ctrl: false,
            meta: false,
            target: EventTarget::Cell,
        }
    }

    pub fn shift(mut self) -> Self {
        self.shift = true;
        self
    }

    pub fn ctrl(mut self) -> Self {
        self.ctrl = true;
        self
    }

    pub fn on(mut self, target: EventTarget) -> Self {
        self.target = target;
        self
    }
}

impl From<Key> for KeyInput {
    fn from(value: Key) -> Self {
        Self::new(value)
    }
}

/// What the host should do with the native event after the grid saw it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Propagation {
    pub prevent_default: bool,
    pub stop_propagation: bool,
}

impl Propagation {
    pub const PASS: Self = Self {
        prevent_default: false,
        stop_propagation: false,
    };

    pub const PREVENT: Self = Self {
        prevent_default: true,
        stop_propagation: false,
    };

    pub const SWALLOW: Self = Self {
        prevent_default: true,
        stop_propagation: true,
    };

    pub const STOP: Self = Self {
        prevent_default: false,
        stop_propagation: true,
    };

    pub fn handled(self) -> bool {
        self.prevent_default || self.stop_propagation
    }
}

/// Grid surface the navigation state machine drives. Coordinates are signed so
/// `-1` can mean "no focus".
pub trait NavHost {
    fn row_count(&self) -> usize;
    fn col_count(&self) -> usize;
    fn is_cell_editable(&self, row: usize, col: usize) -> bool;
    fn coordinate(&self) -> (isize, isize);
    fn set_coordinate(&mut self, row: usize, col: usize);
    fn focus_cell_by_index(&mut self, row: isize, col: isize, options: FocusOptions);
    fn focus_first_editable_in_cell(&mut self, row: usize, col: usize);
    fn clear_cell_focus(&mut self);
    fn commit_row(&mut self, row: usize, reason: CommitReason) -> bool;
    fn discard_row(&mut self, row: usize);
}

fn to_index(value: isize) -> Option<usize> {
    usize::try_from(value).ok()
}

fn signed(value: usize) -> isize {
    isize::try_from(value).unwrap_or(isize::MAX)
}

fn editable_at(host: &impl NavHost, row: isize, col: isize) -> bool {
    match (to_index(row), to_index(col)) {
        (Some(row), Some(col)) => host.is_cell_editable(row, col),
        _ => false,
    }
}

fn focus(host: &mut impl NavHost, row: isize, col: isize) {
    host.focus_cell_by_index(row, col, FocusOptions::default());
}

const PAGE_ROWS: isize = 10;

/// Edit-mode flag plus the key and pointer transitions around it.
#[derive(Debug, Default)]
pub struct KeyboardNav {
    editing: bool,
}

impl KeyboardNav {
    pub fn is_editing(&self) -> bool {
        self.editing
    }

    pub fn is_cell_editing(&self, host: &impl NavHost, row: usize, col: usize) -> bool {
        self.editing && host.coordinate() == (signed(row), signed(col))
    }

    /// Drops edit mode without committing or discarding.
    pub fn cancel_editing(&mut self) {
        self.editing = false;
    }

    pub fn enter_edit_mode(&mut self, host: &mut impl NavHost, row: usize, col: usize) {
        let (r, c) = host.coordinate();
        let same = (r, c) == (signed(row), signed(col));
        if self.editing && same {
            return;
        }
        if !host.is_cell_editable(row, col) {
            return;
        }
        if !same {
            host.focus_cell_by_index(signed(row), signed(col), FocusOptions::default());
        }
        self.editing = true;
        host.focus_first_editable_in_cell(row, col);
    }

    /// Leaves edit mode. With `commit`, the row is committed only when the
    /// destination is on another row or there is no destination.
    pub fn end_edit(
        &mut self,
        host: &mut impl NavHost,
        commit: bool,
        next: Option<(usize, usize)>,
    ) {
        if !self.editing {
            return;
        }
        let current = to_index(host.coordinate().0);

        if let Some(row) = current {
            if commit {
                let leaving = next.is_none_or(|(next_row, _)| next_row != row);
                if leaving {
                    let reason = if next.is_some() {
                        CommitReason::RowChange
                    } else {
                        CommitReason::EditExit
                    };
                    host.commit_row(row, reason);
                }
            } else {
                host.discard_row(row);
            }
        }

        self.editing = false;

        let Some((next_row, next_col)) = next else {
            let (r, c) = host.coordinate();
            if r >= 0 && c >= 0 {
                host.focus_cell_by_index(r, c, FocusOptions::quiet());
            }
            return;
        };

        // Decided against the rows as they are now, before the commit lands.
        let can_edit_next = host.is_cell_editable(next_row, next_col);
        host.focus_cell_by_index(signed(next_row), signed(next_col), FocusOptions::default());
        if can_edit_next {
            self.editing = true;
            host.focus_first_editable_in_cell(next_row, next_col);
        }
    }

    /// Capture-phase filter, active only while editing: scrolling keys never
    /// reach the grid or the host, except inside a native text control.
    pub fn on_keydown_capture(&self, input: &KeyInput) -> Propagation {
        if !self.editing {
            return Propagation::PASS;
        }
        let scrolling = matches!(
            input.key,
            Key::Up
                | Key::Down
                | Key::Left
                | Key::Right
                | Key::PageUp
                | Key::PageDown
                | Key::Home
                | Key::End
                | Key::Space
        );
        if !scrolling {
            return Propagation::PASS;
        }
        if input.target == EventTarget::EditableControl {
            return Propagation::STOP;
        }
        Propagation::SWALLOW
    }

    pub fn on_keydown(&mut self, host: &mut impl NavHost, input: &KeyInput) -> Propagation {
        let rows = signed(host.row_count());
        let cols = signed(host.col_count());
        let (r, c) = host.coordinate();

        if self.editing {
            return match input.key {
                Key::Escape => {
                    self.end_edit(host, false, None);
                    Propagation::PREVENT
                }
                Key::Enter => {
                    let (Some(row), Some(col)) = (to_index(r), to_index(c)) else {
                        return Propagation::PASS;
                    };
                    let next_row = if input.shift {
                        row.saturating_sub(1)
                    } else {
                        (row + 1).min(host.row_count().saturating_sub(1))
                    };
                    self.end_edit(host, true, Some((next_row, col)));
                    Propagation::PREVENT
                }
                Key::Tab => {
                    if r < 0 || c < 0 {
                        return Propagation::PASS;
                    }
                    let next_row = if !input.shift && c == cols - 1 {
                        (r + 1).min(rows - 1)
                    } else if input.shift && c == 0 {
                        (r - 1).max(0)
                    } else {
                        r
                    };
                    let next_col = if input.shift {
                        if c > 0 { c - 1 } else { cols - 1 }
                    } else if c < cols - 1 {
                        c + 1
                    } else {
                        0
                    };
                    match (to_index(next_row), to_index(next_col)) {
                        (Some(row), Some(col)) => self.end_edit(host, true, Some((row, col))),
                        _ => return Propagation::PASS,
                    }
                    Propagation::PREVENT
                }
                _ => Propagation::PASS,
            };
        }

        if rows == 0 || cols == 0 {
            return Propagation::PASS;
        }

        let row_or_top = if r < 0 { 0 } else { r };
        let col_or_first = if c < 0 { 0 } else { c };
        match input.key {
            Key::Escape => host.clear_cell_focus(),
            Key::Char('j') | Key::Down => {
                focus(host, if r < 0 { 0 } else { r + 1 }, col_or_first);
            }
            Key::Char('k') | Key::Up => {
                focus(host, if r <= 0 { 0 } else { r - 1 }, col_or_first);
            }
            Key::Char('l') | Key::Right => {
                focus(host, row_or_top, if c < 0 { 0 } else { c + 1 });
            }
            Key::Char('h') | Key::Left => {
                focus(host, row_or_top, if c <= 0 { 0 } else { c - 1 });
            }
            Key::Enter => {
                let (Some(row), Some(col)) = (to_index(r), to_index(c)) else {
                    return Propagation::PASS;
                };
                self.enter_edit_mode(host, row, col);
            }
            Key::Tab => {
                if r < 0 || c < 0 {
                    return Propagation::PASS;
                }
                let at_last = r == rows - 1 && c == cols - 1;
                let at_first = r == 0 && c == 0;
                if input.shift {
                    if at_first {
                        return Propagation::PASS;
                    }
                    if c > 0 {
                        focus(host, r, c - 1);
                    } else {
                        focus(host, r - 1, cols - 1);
                    }
                } else {
                    if at_last {
                        return Propagation::PASS;
                    }
                    if c < cols - 1 {
                        focus(host, r, c + 1);
                    } else {
                        focus(host, r + 1, 0);
                    }
                }
            }
            Key::Home => {
                if input.ctrl || input.meta {
                    focus(host, 0, 0);
                } else {
                    focus(host, row_or_top, 0);
                }
            }
            Key::End => {
                if input.ctrl || input.meta {
                    focus(host, rows - 1, cols - 1);
                } else {
                    focus(host, row_or_top, cols - 1);
                }
            }
            Key::PageDown => {
                focus(host, if r < 0 { 0 } else { r + PAGE_ROWS }, col_or_first);
            }
            Key::PageUp => {
                focus(host, if r < 0 { 0 } else { r - PAGE_ROWS }, col_or_first);
            }
            Key::Space => {
                if r < 0 || c < 0 {
                    host.focus_cell_by_index(0, 0, FocusOptions::quiet());
                    return Propagation::PREVENT;
                }
                return Propagation::PASS;
            }
            Key::Char(_) => return Propagation::PASS,
        }
        Propagation::PREVENT
    }

    pub fn on_cell_click(
        &mut self,
        host: &mut impl NavHost,
        row: usize,
        col: usize,
        target: EventTarget,
    ) {
        if target == EventTarget::InteractiveControl {
            host.set_coordinate(row, col);
            return;
        }
        let same = host.coordinate() == (signed(row), signed(col));

        if same {
            if self.editing {
                return;
            }
            if host.is_cell_editable(row, col) {
                self.enter_edit_mode(host, row, col);
            } else {
                host.focus_cell_by_index(signed(row), signed(col), FocusOptions::default());
            }
            return;
        }

        if self.editing {
            self.end_edit(host, true, Some((row, col)));
            return;
        }
        host.focus_cell_by_index(signed(row), signed(col), FocusOptions::default());
    }

    pub fn on_cell_dbl_click(&mut self, host: &mut impl NavHost, row: usize, col: usize) {
        if editable_at(host, signed(row), signed(col)) {
            self.enter_edit_mode(host, row, col);
        }
    }
}
