// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::Result;
use celda_db::{Dataset, SqlitePrefsStore, Store, validate_db_path};
use celda_grid::{
    CellError, CellValue, ColumnId, CommitFailure, GridRow, ListParams, Patch, PrefsStore, RowId,
    ServerFilters, ServerSort, SortOrder,
};
use celda_testkit::{RecordFaker, temp_db_path};

fn seeded(count: usize) -> Result<Store> {
    let store = Store::open_memory()?;
    store.bootstrap()?;
    let mut faker = RecordFaker::new(11);
    for record in faker.circulation_records(count) {
        store.insert_record(Dataset::Circulation, &record)?;
    }
    for record in faker.expense_records(count) {
        store.insert_record(Dataset::Expenses, &record)?;
    }
    Ok(store)
}

fn params(limit: usize) -> ListParams {
    ListParams {
        limit,
        ..ListParams::default()
    }
}

fn col(id: &str) -> ColumnId {
    ColumnId::from(id)
}

#[test]
fn validate_db_path_rejects_uri_forms() {
    assert!(validate_db_path("file:test.db").is_err());
    assert!(validate_db_path("https://example.com/db.sqlite").is_err());
    assert!(validate_db_path("db.sqlite?mode=ro").is_err());
    assert!(validate_db_path("").is_err());
    assert!(validate_db_path("/tmp/celda.db").is_ok());
}

#[test]
fn bootstrap_is_idempotent_on_disk() -> Result<()> {
    let (_dir, path) = temp_db_path()?;
    {
        let store = Store::open(&path)?;
        store.bootstrap()?;
        store.insert_record(Dataset::Expenses, &RecordFaker::new(1).expense_record(1))?;
    }
    let store = Store::open(&path)?;
    store.bootstrap()?;
    assert_eq!(store.count_records(Dataset::Expenses)?, 1);
    Ok(())
}

#[test]
fn records_and_prefs_share_one_file() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("celda.db");
    {
        let store = Store::open(&path)?;
        store.bootstrap()?;
        store.insert_record(
            Dataset::Circulation,
            &RecordFaker::new(3).circulation_record(1),
        )?;
        let mut prefs = SqlitePrefsStore::open(&path)?;
        prefs.save("datatable:celda-circulation:v1", "{\"v\":1}")?;
    }

    let store = Store::open(&path)?;
    store.bootstrap()?;
    assert_eq!(store.count_records(Dataset::Circulation)?, 1);
    let saved: i64 = store
        .raw_connection()
        .query_row("SELECT COUNT(*) FROM prefs", [], |row| row.get(0))?;
    assert_eq!(saved, 1);
    Ok(())
}

#[test]
fn bootstrap_rejects_foreign_schema() -> Result<()> {
    let store = Store::open_memory()?;
    store
        .raw_connection()
        .execute_batch("CREATE TABLE records (id INTEGER PRIMARY KEY, body TEXT);")?;
    let err = store.bootstrap().err().map(|err| err.to_string());
    assert!(err.is_some_and(|message| message.contains("missing required columns")));
    Ok(())
}

#[test]
fn pages_follow_cursor_to_the_end() -> Result<()> {
    let store = seeded(25)?;
    let mut cursor = None;
    let mut seen = Vec::new();
    loop {
        let page = store.list_page(Dataset::Circulation, &params(10), cursor.as_deref())?;
        seen.extend(page.items.iter().map(|record| record.row_id()));
        match page.next_cursor {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }
    assert_eq!(seen.len(), 25);
    assert_eq!(seen.first(), Some(&RowId::Int(1)));
    assert_eq!(seen.last(), Some(&RowId::Int(25)));
    Ok(())
}

#[test]
fn bad_cursor_is_an_error() -> Result<()> {
    let store = seeded(1)?;
    assert!(
        store
            .list_page(Dataset::Circulation, &params(10), Some("page-two"))
            .is_err()
    );
    Ok(())
}

#[test]
fn sort_orders_by_field_with_id_tiebreak() -> Result<()> {
    let store = seeded(30)?;
    let list = ListParams {
        sort: Some(ServerSort {
            sort_by: "sold".to_owned(),
            sort_order: SortOrder::Desc,
        }),
        ..params(30)
    };
    let page = store.list_page(Dataset::Circulation, &list, None)?;
    let sold = page
        .items
        .iter()
        .map(|record| record.field(&col("sold")).as_int().unwrap_or_default())
        .collect::<Vec<_>>();
    assert!(sold.windows(2).all(|pair| pair[0] >= pair[1]));
    Ok(())
}

#[test]
fn filters_bind_per_dataset() -> Result<()> {
    let store = seeded(60)?;

    let mut filters = ServerFilters::new();
    filters.insert("companies".to_owned(), vec!["ACM".to_owned(), "BRD".to_owned()]);
    filters.insert("date_from".to_owned(), vec!["2025-01-01".to_owned()]);
    filters.insert("unknown".to_owned(), vec!["x".to_owned()]);
    let list = ListParams {
        filters,
        ..params(100)
    };
    let page = store.list_page(Dataset::Circulation, &list, None)?;
    assert!(!page.items.is_empty());
    for record in &page.items {
        let company = record.field(&col("company"));
        assert!(company == CellValue::text("ACM") || company == CellValue::text("BRD"));
        let date = record.field(&col("date")).to_string();
        assert!(date.as_str() >= "2025-01-01");
    }

    let mut filters = ServerFilters::new();
    filters.insert("paid".to_owned(), vec!["true".to_owned()]);
    filters.insert("concept".to_owned(), vec![String::new()]);
    let list = ListParams {
        filters,
        ..params(100)
    };
    let page = store.list_page(Dataset::Expenses, &list, None)?;
    assert!(!page.items.is_empty());
    assert!(
        page.items
            .iter()
            .all(|record| record.field(&col("paid")) == CellValue::Bool(true))
    );
    Ok(())
}

#[test]
fn update_merges_patch_and_returns_stored_row() -> Result<()> {
    let store = seeded(3)?;
    let mut patch = Patch::new();
    patch.insert(col("sold"), CellValue::Int(12));
    let updated = store.update_record(Dataset::Circulation, &RowId::Int(2), &patch)?;
    assert_eq!(updated.field(&col("sold")), CellValue::Int(12));

    let stored = store.get_record(Dataset::Circulation, &RowId::Int(2))?;
    assert_eq!(stored, Some(updated));
    Ok(())
}

#[test]
fn negative_count_is_rejected_with_field_detail() -> Result<()> {
    let store = seeded(3)?;
    let before = store.get_record(Dataset::Circulation, &RowId::Int(1))?;
    let mut patch = Patch::new();
    patch.insert(col("free"), CellValue::Int(-1));

    let err = store
        .update_record(Dataset::Circulation, &RowId::Int(1), &patch)
        .err();
    let failure = err
        .as_ref()
        .and_then(|err| err.downcast_ref::<CommitFailure>())
        .cloned();
    let fields = failure.and_then(|failure| failure.fields).unwrap_or_default();
    assert!(matches!(
        fields.get(&col("free")),
        Some(CellError::Message(_))
    ));
    assert_eq!(store.get_record(Dataset::Circulation, &RowId::Int(1))?, before);
    Ok(())
}

#[test]
fn delete_removes_row_once() -> Result<()> {
    let store = seeded(3)?;
    store.delete_record(Dataset::Expenses, &RowId::Int(3))?;
    assert_eq!(store.count_records(Dataset::Expenses)?, 2);
    assert!(store.delete_record(Dataset::Expenses, &RowId::Int(3)).is_err());
    assert_eq!(store.count_records(Dataset::Circulation)?, 3);
    Ok(())
}

#[test]
fn distinct_values_feed_pickers() -> Result<()> {
    let store = seeded(50)?;
    let companies = store.distinct_values(Dataset::Circulation, "company")?;
    assert!(!companies.is_empty());
    assert!(companies.windows(2).all(|pair| pair[0] < pair[1]));
    assert!(store.distinct_values(Dataset::Circulation, "salary").is_err());

    let pairs = store.distinct_pairs(Dataset::Circulation, "company", "product")?;
    assert!(pairs.len() >= companies.len());
    assert!(pairs.iter().all(|(company, _)| companies.contains(company)));
    assert!(pairs.windows(2).all(|pair| pair[0] < pair[1]));
    Ok(())
}

#[test]
fn demo_seed_fills_both_datasets() -> Result<()> {
    let store = Store::open_memory()?;
    store.bootstrap()?;
    store.seed_demo_data()?;
    for dataset in Dataset::ALL {
        assert_eq!(store.count_records(dataset)?, celda_db::demo::DEMO_ROWS);
    }
    Ok(())
}

#[test]
fn prefs_written_by_one_handle_reach_the_other() -> Result<()> {
    let (_dir, path) = temp_db_path()?;
    let mut first = SqlitePrefsStore::open(&path)?;
    let mut second = SqlitePrefsStore::open(&path)?;

    first.save("datatable:orders:v1", "{\"v\":1}")?;
    assert!(first.poll_changes()?.is_empty());

    let changes = second.poll_changes()?;
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].key, "datatable:orders:v1");
    assert_eq!(changes[0].new_value.as_deref(), Some("{\"v\":1}"));
    assert!(second.poll_changes()?.is_empty());

    second.save("datatable:orders:v1", "{\"v\":1,\"columnOrder\":[]}")?;
    assert_eq!(first.poll_changes()?.len(), 1);
    assert_eq!(
        first.load("datatable:orders:v1")?.as_deref(),
        Some("{\"v\":1,\"columnOrder\":[]}")
    );
    Ok(())
}

#[test]
fn prefs_handle_ignores_history_before_it_opened() -> Result<()> {
    let (_dir, path) = temp_db_path()?;
    let mut first = SqlitePrefsStore::open(&path)?;
    first.save("k", "old")?;
    let mut late = SqlitePrefsStore::open(&path)?;
    assert!(late.poll_changes()?.is_empty());
    assert_eq!(late.load("k")?.as_deref(), Some("old"));
    Ok(())
}
