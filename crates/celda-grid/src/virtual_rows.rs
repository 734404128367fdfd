// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use crate::ScrollAlign;

pub const DEFAULT_ROW_HEIGHT: u32 = 40;
pub const DEFAULT_OVERSCAN: usize = 5;
pub const DEFAULT_PREFETCH_GAP: usize = 0;
pub const DEFAULT_SKELETON_ROWS: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VirtualOptions {
    pub row_height: u32,
    pub overscan: usize,
    pub prefetch_gap: usize,
    pub skeleton_rows: usize,
}

impl Default for VirtualOptions {
    fn default() -> Self {
        Self {
            row_height: DEFAULT_ROW_HEIGHT,
            overscan: DEFAULT_OVERSCAN,
            prefetch_gap: DEFAULT_PREFETCH_GAP,
            skeleton_rows: DEFAULT_SKELETON_ROWS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VirtualItem {
    pub index: usize,
    pub start: u64,
    pub size: u64,
}

impl VirtualItem {
    pub fn end(&self) -> u64 {
        self.start + self.size
    }
}

/// Fixed-height row virtualizer with skeleton slots while another page exists
/// and a tail watcher that asks for the next page.
#[derive(Debug, Clone)]
pub struct VirtualRows {
    options: VirtualOptions,
    row_count: usize,
    has_next_page: bool,
    viewport: u64,
    offset: u64,
    // Row count at which load-more last fired while inside the end zone.
    fired_at: Option<usize>,
}

impl VirtualRows {
    pub fn new(options: VirtualOptions) -> Self {
        Self {
            options: VirtualOptions {
                row_height: options.row_height.max(1),
                ..options
            },
            row_count: 0,
            has_next_page: false,
            viewport: 0,
            offset: 0,
            fired_at: None,
        }
    }

    pub fn options(&self) -> VirtualOptions {
        self.options
    }

    pub fn set_row_count(&mut self, rows: usize) {
        self.row_count = rows;
        self.clamp_offset();
    }

    pub fn set_has_next_page(&mut self, has_next: bool) {
        self.has_next_page = has_next;
        self.clamp_offset();
    }

    pub fn set_viewport(&mut self, height: u64) {
        self.viewport = height;
        self.clamp_offset();
    }

    pub fn row_count(&self) -> usize {
        self.row_count
    }

    /// Real rows plus skeleton slots while another page is known to exist.
    pub fn count(&self) -> usize {
        if self.has_next_page {
            self.row_count + self.options.skeleton_rows
        } else {
            self.row_count
        }
    }

    fn size(&self) -> u64 {
        u64::from(self.options.row_height)
    }

    pub fn total_size(&self) -> u64 {
        self.count() as u64 * self.size()
    }

    pub fn scroll_offset(&self) -> u64 {
        self.offset
    }

    pub fn set_scroll_offset(&mut self, offset: u64) {
        self.offset = offset;
        self.clamp_offset();
    }

    fn clamp_offset(&mut self) {
        let max = self.total_size().saturating_sub(self.viewport);
        self.offset = self.offset.min(max);
    }

    pub fn is_loader_index(&self, index: usize) -> bool {
        index >= self.row_count
    }

    fn item(&self, index: usize) -> VirtualItem {
        VirtualItem {
            index,
            start: index as u64 * self.size(),
            size: self.size(),
        }
    }

    /// Items intersecting the viewport, widened by the overscan on both sides.
    pub fn virtual_items(&self) -> Vec<VirtualItem> {
        let count = self.count();
        if count == 0 {
            return Vec::new();
        }
        let size = self.size();
        let first = usize::try_from(self.offset / size).unwrap_or(usize::MAX);
        let last_visible = (self.offset + self.viewport).saturating_sub(1) / size;
        let last = usize::try_from(last_visible)
            .unwrap_or(usize::MAX)
            .max(first);
        let start = first.saturating_sub(self.options.overscan).min(count - 1);
        let end = last.saturating_add(self.options.overscan).min(count - 1);
        (start..=end).map(|index| self.item(index)).collect()
    }

    pub fn scroll_to_index(&mut self, index: usize, align: ScrollAlign) {
        let count = self.count();
        if count == 0 {
            return;
        }
        let item = self.item(index.min(count - 1));
        let view_end = self.offset + self.viewport;
        self.offset = match align {
            ScrollAlign::Start => item.start,
            ScrollAlign::End => item.end().saturating_sub(self.viewport),
            ScrollAlign::Center => (item.start + item.size / 2).saturating_sub(self.viewport / 2),
            ScrollAlign::Auto if item.start < self.offset => item.start,
            ScrollAlign::Auto if item.end() > view_end => item.end().saturating_sub(self.viewport),
            ScrollAlign::Auto => self.offset,
        };
        self.clamp_offset();
    }

    /// True once each time the rendered tail reaches the end zone of the real
    /// rows while another page exists and nothing is loading. Leaving the end
    /// zone, a change in row count, or a poll that sees a load in flight
    /// re-arms it, so a load that adds no rows is asked for again.
    pub fn poll_load_more(&mut self, is_loading_anything: bool) -> bool {
        if is_loading_anything {
            self.fired_at = None;
            return false;
        }
        if !self.has_next_page {
            return false;
        }
        let Some(last) = self.virtual_items().last().copied() else {
            return false;
        };
        if self.row_count == 0 {
            return false;
        }
        let threshold = (self.row_count - 1).saturating_sub(self.options.prefetch_gap);
        if last.index < threshold {
            self.fired_at = None;
            return false;
        }
        if self.fired_at == Some(self.row_count) {
            return false;
        }
        self.fired_at = Some(self.row_count);
        log::debug!("load more at {} rows", self.row_count);
        true
    }
}
