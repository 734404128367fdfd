// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use crate::{bootstrap_connection, configure_connection, now_rfc3339, validate_db_path};
use anyhow::{Context, Result};
use celda_grid::{PrefsStore, StorageChange};
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_WRITER: AtomicU64 = AtomicU64::new(1);

fn writer_id() -> String {
    format!(
        "{}-{}",
        std::process::id(),
        NEXT_WRITER.fetch_add(1, Ordering::Relaxed)
    )
}

/// [`PrefsStore`] over the `prefs` table. Every handle gets its own writer id
/// and sees rows written by other handles, in this process or another, as
/// changes.
pub struct SqlitePrefsStore {
    conn: Connection,
    writer: String,
    seen_seq: i64,
}

impl SqlitePrefsStore {
    pub fn open(path: &Path) -> Result<Self> {
        let printable = path.to_string_lossy().to_string();
        validate_db_path(&printable)?;
        let conn = Connection::open(path)
            .with_context(|| format!("open preference store at {}", path.display()))?;
        Self::from_connection(conn)
    }

    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("open in-memory preference store")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        configure_connection(&conn)?;
        bootstrap_connection(&conn)?;
        let seen_seq = max_seq(&conn)?;
        Ok(Self {
            conn,
            writer: writer_id(),
            seen_seq,
        })
    }

    pub fn writer(&self) -> &str {
        &self.writer
    }
}

fn max_seq(conn: &Connection) -> Result<i64> {
    conn.query_row("SELECT COALESCE(MAX(seq), 0) FROM prefs", [], |row| {
        row.get(0)
    })
    .context("read preference sequence")
}

impl PrefsStore for SqlitePrefsStore {
    fn load(&mut self, key: &str) -> Result<Option<String>> {
        self.conn
            .query_row("SELECT value FROM prefs WHERE key = ?", [key], |row| {
                row.get::<_, String>(0)
            })
            .optional()
            .with_context(|| format!("read preference {key}"))
    }

    fn save(&mut self, key: &str, raw: &str) -> Result<()> {
        let now = now_rfc3339()?;
        self.conn
            .execute(
                "
                INSERT INTO prefs (key, value, writer, seq, updated_at)
                VALUES (?, ?, ?, (SELECT COALESCE(MAX(seq), 0) + 1 FROM prefs), ?)
                ON CONFLICT(key) DO UPDATE SET
                  value = excluded.value,
                  writer = excluded.writer,
                  seq = excluded.seq,
                  updated_at = excluded.updated_at
                ",
                params![key, raw, self.writer, now],
            )
            .with_context(|| format!("upsert preference {key}"))?;
        Ok(())
    }

    fn poll_changes(&mut self) -> Result<Vec<StorageChange>> {
        let mut stmt = self
            .conn
            .prepare("SELECT key, value, writer, seq FROM prefs WHERE seq > ? ORDER BY seq ASC")
            .context("prepare preference change query")?;
        let rows = stmt
            .query_map([self.seen_seq], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            })
            .context("query preference changes")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("collect preference changes")?;

        let mut changes = Vec::new();
        for (key, value, writer, seq) in rows {
            self.seen_seq = self.seen_seq.max(seq);
            if writer != self.writer {
                changes.push(StorageChange {
                    key,
                    new_value: Some(value),
                });
            }
        }
        Ok(changes)
    }
}

#[cfg(test)]
mod tests {
    use super::SqlitePrefsStore;
    use celda_grid::PrefsStore;

    #[test]
    fn own_writes_are_not_reported() -> anyhow::Result<()> {
        let mut store = SqlitePrefsStore::open_memory()?;
        store.save("datatable:orders:v1", "{\"v\":1}")?;
        assert!(store.poll_changes()?.is_empty());
        assert_eq!(
            store.load("datatable:orders:v1")?.as_deref(),
            Some("{\"v\":1}")
        );
        store.save("datatable:orders:v1", "{\"v\":2}")?;
        assert_eq!(
            store.load("datatable:orders:v1")?.as_deref(),
            Some("{\"v\":2}")
        );
        Ok(())
    }

    #[test]
    fn handles_get_distinct_writers() -> anyhow::Result<()> {
        let a = SqlitePrefsStore::open_memory()?;
        let b = SqlitePrefsStore::open_memory()?;
        assert_ne!(a.writer(), b.writer());
        Ok(())
    }
}
