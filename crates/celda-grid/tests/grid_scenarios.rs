// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::Result;
use celda_grid::{
    CellError, CellKey, CellValue, ColumnDef, ColumnId, ColumnNode, CommitFailure, CommitReason,
    FetchFlags, FetchStatus, FocusOptions, Grid, GridOptions, Key, KeyInput, PrefsStore, Record,
    RowId, RowRequest, ServerFilters, ServerSort, SettleOutcome, SortEntry, SortOrder, SyncEvent,
    TableChange, TablePrefs, Updater, ValueKind, prefs_key,
};
use celda_testkit::{MemoryPrefsStore, RecordFaker, RecordingSurface, plain_columns};
use futures::executor::block_on;
use std::time::{Duration, Instant};

fn success() -> FetchFlags {
    FetchFlags {
        status: FetchStatus::Success,
        ..FetchFlags::default()
    }
}

fn col(id: &str) -> ColumnId {
    ColumnId::from(id)
}

fn data_only_grid(rows: i64) -> Grid<Record> {
    let columns = vec![
        ColumnDef::data("name", "Name", ValueKind::Text)
            .editable()
            .into(),
        ColumnDef::data("qty", "Qty", ValueKind::Int).editable().into(),
    ];
    let mut grid = Grid::new(columns, GridOptions::default());
    grid.set_rows(
        (1..=rows)
            .map(|id| Record::new(id).with("name", format!("row {id}")).with("qty", id))
            .collect(),
        false,
        success(),
    );
    grid
}

fn commits(requests: Vec<RowRequest<Record>>) -> Vec<celda_grid::RowCommit<Record>> {
    requests
        .into_iter()
        .filter_map(|request| match request {
            RowRequest::Commit(commit) => Some(commit),
            RowRequest::Delete(_) => None,
        })
        .collect()
}

#[test]
fn editing_back_to_original_leaves_nothing_to_commit() {
    let columns = vec![ColumnNode::from(
        ColumnDef::data("price", "Price", ValueKind::Int).editable(),
    )];
    let mut grid = Grid::new(columns, GridOptions::default());
    grid.set_rows(vec![Record::new("42").with("price", 10_i64)], false, success());

    grid.set_row_field(0, &col("price"), CellValue::Int(15));
    assert!(grid.editor().row_patch(&RowId::from("42")).is_some());
    grid.set_row_field(0, &col("price"), CellValue::Int(10));

    assert!(grid.editor().state(&RowId::from("42")).is_none());
    assert_eq!(grid.get_cell_value(0, &col("price")), Some(CellValue::Int(10)));
    assert!(!grid.commit_row(0, CommitReason::EditExit));
    assert!(grid.take_requests().is_empty());
}

#[test]
fn field_failure_marks_only_that_field() {
    let columns = vec![ColumnNode::from(
        ColumnDef::data("qty", "Qty", ValueKind::Int).editable(),
    )];
    let mut grid = Grid::new(columns, GridOptions::default());
    grid.set_rows(vec![Record::new("7").with("qty", 1_i64)], false, success());
    grid.set_row_field(0, &col("qty"), CellValue::Int(3));

    let settled = grid.commit_row_settled(0, CommitReason::EditExit);
    let mut sent = commits(grid.take_requests());
    assert_eq!(sent.len(), 1);
    let commit = sent.remove(0);
    assert_eq!(commit.patch.get(&col("qty")), Some(&CellValue::Int(3)));
    commit
        .completion
        .fail(CommitFailure::default().with_field("qty", CellError::Failed));
    assert_eq!(grid.apply_settlements(), 1);
    assert_eq!(block_on(settled), SettleOutcome::Failed);

    let id = RowId::from("7");
    let state = grid.editor().state(&id);
    assert!(state.is_some_and(|state| state.pending().is_none()));
    assert_eq!(
        state.map(|state| state.errors().clone()),
        Some([(col("qty"), CellError::Failed)].into_iter().collect())
    );
    assert_eq!(grid.get_cell_value(0, &col("qty")), Some(CellValue::Int(3)));
}

#[test]
fn second_commit_while_pending_is_rejected() {
    let mut grid = data_only_grid(3);
    grid.set_row_field(1, &col("qty"), CellValue::Int(99));
    assert!(grid.commit_row(1, CommitReason::EditExit));
    assert!(!grid.commit_row(1, CommitReason::EditExit));
    assert!(!grid.is_row_editable_at(1));

    let commit = commits(grid.take_requests()).remove(0);
    commit.completion.succeed();
    grid.apply_settlements();
    assert!(grid.is_row_editable_at(1));
    assert!(grid.editor().state(&RowId::from(2)).is_none());
}

#[test]
fn sort_change_emits_once_after_debounce() {
    let columns = vec![ColumnNode::from(ColumnDef::data(
        "fecha",
        "Fecha",
        ValueKind::Date,
    ))];
    let mut grid = Grid::<Record>::new(columns, GridOptions::default());
    let start = Instant::now();
    assert!(grid.poll_sync(start).is_empty());

    grid.table_mut()
        .dispatch(TableChange::Sorting(Updater::Set(vec![SortEntry::desc(
            "fecha",
        )])));
    assert!(grid.poll_sync(start + Duration::from_millis(100)).is_empty());

    let events = grid.poll_sync(start + Duration::from_millis(400));
    assert_eq!(
        events,
        vec![SyncEvent::ServerSort(Some(ServerSort {
            sort_by: "fecha".to_owned(),
            sort_order: SortOrder::Desc,
        }))]
    );
    assert!(grid.poll_sync(start + Duration::from_secs(5)).is_empty());
}

#[test]
fn hydrated_filters_are_not_echoed() {
    let mut grid = Grid::<Record>::new(plain_columns(), GridOptions::default());
    let mut server = ServerFilters::new();
    server.insert("q".to_owned(), vec!["acme".to_owned()]);
    grid.hydrate_filters(Some(&server));

    let start = Instant::now();
    assert!(grid.poll_sync(start).is_empty());
    assert!(grid.poll_sync(start + Duration::from_secs(2)).is_empty());

    grid.table_mut()
        .set_column_filter(&col("name"), Some(celda_grid::FilterValue::Text("box".into())));
    grid.poll_sync(start + Duration::from_secs(3));
    let events = grid.poll_sync(start + Duration::from_secs(5));
    let mut expected = ServerFilters::new();
    expected.insert("q".to_owned(), vec!["box".to_owned()]);
    assert_eq!(events, vec![SyncEvent::ServerFilters(expected)]);
}

#[test]
fn settled_page_reports_row_count() {
    let mut grid = Grid::new(plain_columns(), GridOptions::default());
    let rows = RecordFaker::new(3).circulation_records(20);
    grid.set_rows(rows, false, success());
    assert_eq!(grid.live_message(), "20 results");

    grid.set_rows(Vec::new(), false, success());
    assert_eq!(grid.live_message(), "No results.");
}

#[test]
fn tab_from_last_column_commits_and_edits_next_row() {
    let mut grid = data_only_grid(3);
    grid.focus_cell_by_index(0, 1, FocusOptions::default());
    grid.on_keydown(&KeyInput::new(Key::Enter));
    assert!(grid.is_cell_editing(0, 1));
    grid.set_row_field(0, &col("qty"), CellValue::Int(42));

    grid.on_keydown(&KeyInput::new(Key::Tab));

    assert_eq!(grid.focus().active(), Some((1, 0)));
    assert!(grid.is_cell_editing(1, 0));
    let sent = commits(grid.take_requests());
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].reason, CommitReason::RowChange);
    assert_eq!(sent[0].row_id, RowId::from(1));
}

#[test]
fn tab_onto_read_only_row_focuses_without_editing() {
    let locked = CellValue::text("row 2");
    let mut grid = data_only_grid(3).with_editable(move |row: &Record| {
        celda_grid::GridRow::field(row, &ColumnId::from("name")) != locked
    });
    grid.focus_cell_by_index(0, 1, FocusOptions::default());
    grid.on_keydown(&KeyInput::new(Key::Enter));
    grid.on_keydown(&KeyInput::new(Key::Tab));

    assert_eq!(grid.focus().active(), Some((1, 0)));
    assert!(!grid.is_editing());
}

#[test]
fn focus_is_clamped_into_the_grid() {
    let columns = (0..4)
        .map(|index| {
            ColumnNode::from(ColumnDef::data(
                format!("c{index}").as_str(),
                "C",
                ValueKind::Text,
            ))
        })
        .collect();
    let mut grid = Grid::new(columns, GridOptions::default());
    grid.set_rows((0..10_i64).map(Record::new).collect(), false, success());

    grid.focus_cell_by_index(-5, 999, FocusOptions::default());
    assert_eq!(grid.focus().coordinate(), (0, 3));
}

#[test]
fn effects_scroll_then_focus_mounted_cells() {
    let mut grid = data_only_grid(30);
    grid.virtual_rows_mut().set_viewport(400);
    grid.focus_cell_by_index(25, 1, FocusOptions::default());

    let mut surface = RecordingSurface::default();
    grid.flush_effects(&mut surface);

    assert_eq!(surface.scrolls(), vec![25]);
    let key = CellKey::new(RowId::from(26), col("qty"));
    assert_eq!(surface.focused(), vec![&key]);
    assert!(grid.virtual_rows().scroll_offset() > 0);

    grid.focus_cell_by_index(0, 0, FocusOptions::default());
    surface.unmounted.insert(CellKey::new(RowId::from(1), col("name")));
    surface.calls.clear();
    grid.flush_effects(&mut surface);
    assert!(surface.focused().is_empty());
}

#[test]
fn scrolling_to_the_tail_requests_one_more_page() {
    let mut grid = data_only_grid(20);
    let rows = grid.table().rows().to_vec();
    grid.set_rows(rows, true, success());
    grid.virtual_rows_mut().set_viewport(400);
    assert!(!grid.poll_load_more(false));

    let end = grid.virtual_rows().total_size();
    grid.virtual_rows_mut().set_scroll_offset(end);
    assert!(!grid.poll_load_more(true));
    assert!(grid.poll_load_more(false));
    assert!(!grid.poll_load_more(false));
}

#[test]
fn layout_is_saved_and_sanitized_on_restore() -> Result<()> {
    let options = GridOptions {
        persist_key: Some("orders".to_owned()),
        ..GridOptions::default()
    };
    let mut store = MemoryPrefsStore::new();
    let key = prefs_key("orders", 1).unwrap_or_default();

    let stale = TablePrefs {
        v: 1,
        column_order: Some(vec![col("qty"), col("gone"), col("name")]),
        ..TablePrefs::default()
    };
    store.save(&key, &serde_json::to_string(&stale)?)?;

    let mut grid = Grid::<Record>::new(plain_columns(), options.clone());
    grid.restore_prefs(&mut store)?;
    assert_eq!(
        grid.table().state().column_order,
        vec![col("qty"), col("name"), col("__select__"), col("__delete__")]
    );

    let start = Instant::now();
    grid.table_mut().set_column_visibility(&col("qty"), false);
    assert!(!grid.flush_prefs(&mut store, start)?);
    assert!(grid.flush_prefs(&mut store, start + Duration::from_secs(1))?);

    let raw = store.get(&key).unwrap_or_default();
    let saved: TablePrefs = serde_json::from_str(&raw)?;
    assert_eq!(
        saved.column_visibility.and_then(|v| v.get(&col("qty")).copied()),
        Some(false)
    );
    Ok(())
}

#[test]
fn layout_follows_writes_from_another_handle() -> Result<()> {
    let options = GridOptions {
        persist_key: Some("orders".to_owned()),
        ..GridOptions::default()
    };
    let mut mine = MemoryPrefsStore::new();
    let mut theirs = mine.handle();

    let mut grid = Grid::<Record>::new(plain_columns(), options.clone());
    let mut other = Grid::<Record>::new(plain_columns(), options);

    let start = Instant::now();
    other.table_mut().set_column_size(&col("name"), 220);
    other.flush_prefs(&mut theirs, start)?;
    assert!(other.flush_prefs(&mut theirs, start + Duration::from_secs(1))?);

    assert_eq!(grid.sync_prefs(&mut mine)?, 1);
    assert_eq!(
        grid.table().state().column_sizing.get(&col("name")),
        Some(&220)
    );
    assert_eq!(other.sync_prefs(&mut theirs)?, 0);
    Ok(())
}

#[test]
fn unmount_flushes_dirty_rows_with_unmount_reason() {
    let mut grid = data_only_grid(4);
    grid.set_row_field(0, &col("name"), CellValue::text("renamed"));
    grid.set_row_field(3, &col("qty"), CellValue::Int(0));

    assert_eq!(grid.unmount(), 2);
    let sent = commits(grid.take_requests());
    assert!(
        sent.iter()
            .all(|commit| commit.reason == CommitReason::Unmount)
    );
    assert_eq!(
        sent.iter().map(|commit| commit.row_index).collect::<Vec<_>>(),
        vec![0, 3]
    );
}
