//! Local sync-state store.
//!
//! One SQLite file, one row per tracker issue the bot has seen. The row is
//! the authoritative record of where the issue sits in its sync lifecycle;
//! marker labels on the tracker are a mirror of it, re-applied when a
//! previous run lost the label write. State changes go through
//! [`SyncStore::transition`], which validates them against the
//! [`SyncState`] machine instead of trusting whatever labels say.
//!
//! The expiring compute cache used by the metrics command lives in the
//! [`cache`] submodule and is unrelated to sync records.

pub mod cache;

use crate::models::SyncState;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use std::fs;
use std::path::Path;

/// Name of the store file under the state directory.
pub const STORE_FILE: &str = "sync.db";

/// A sync record, one per issue.
#[derive(Debug, Clone)]
pub struct SyncRecord {
    /// Issue URL plus page title; the original cache key format, kept so
    /// records survive upgrades from the label-only scheme.
    pub cache_key: String,
    pub issue_url: String,
    pub project_id: u64,
    pub issue_iid: u64,
    pub state: SyncState,
    /// Linked workspace page, once one exists.
    pub page_id: Option<String>,
    pub page_url: Option<String>,
    /// Creation time of the newest page block already mirrored back to the
    /// tracker. Blocks at or before this are never re-sent.
    pub block_watermark: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// SQLite-backed store of sync records.
pub struct SyncStore {
    conn: Connection,
}

impl SyncStore {
    /// Open (creating if needed) the store at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;
        Ok(Self { conn })
    }

    /// In-memory store for tests and dry runs.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self { conn })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS sync_records (
                cache_key TEXT PRIMARY KEY,
                issue_url TEXT NOT NULL,
                project_id INTEGER NOT NULL,
                issue_iid INTEGER NOT NULL,
                state TEXT NOT NULL DEFAULT 'unlinked',
                page_id TEXT,
                page_url TEXT,
                block_watermark TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_sync_records_issue
                ON sync_records(project_id, issue_iid);
            CREATE INDEX IF NOT EXISTS idx_sync_records_page
                ON sync_records(page_id);
            CREATE INDEX IF NOT EXISTS idx_sync_records_state
                ON sync_records(state);
            "#,
        )?;
        Ok(())
    }

    /// Look a record up by its cache key.
    pub fn get(&self, cache_key: &str) -> Result<Option<SyncRecord>> {
        let record = self
            .conn
            .query_row(
                "SELECT cache_key, issue_url, project_id, issue_iid, state,
                        page_id, page_url, block_watermark, created_at, updated_at
                 FROM sync_records WHERE cache_key = ?1",
                params![cache_key],
                record_from_row,
            )
            .optional()?;
        Ok(record)
    }

    /// Look a record up by tracker identity.
    pub fn find_by_issue(&self, project_id: u64, issue_iid: u64) -> Result<Option<SyncRecord>> {
        let record = self
            .conn
            .query_row(
                "SELECT cache_key, issue_url, project_id, issue_iid, state,
                        page_id, page_url, block_watermark, created_at, updated_at
                 FROM sync_records WHERE project_id = ?1 AND issue_iid = ?2",
                params![project_id, issue_iid],
                record_from_row,
            )
            .optional()?;
        Ok(record)
    }

    /// Look a record up by its bound workspace page.
    pub fn find_by_page(&self, page_id: &str) -> Result<Option<SyncRecord>> {
        let record = self
            .conn
            .query_row(
                "SELECT cache_key, issue_url, project_id, issue_iid, state,
                        page_id, page_url, block_watermark, created_at, updated_at
                 FROM sync_records WHERE page_id = ?1",
                params![page_id],
                record_from_row,
            )
            .optional()?;
        Ok(record)
    }

    /// Fetch the record for an issue, creating an `unlinked` one if this is
    /// the first time the bot sees it.
    pub fn ensure(
        &self,
        cache_key: &str,
        issue_url: &str,
        project_id: u64,
        issue_iid: u64,
    ) -> Result<SyncRecord> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT OR IGNORE INTO sync_records
                (cache_key, issue_url, project_id, issue_iid, state, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            params![
                cache_key,
                issue_url,
                project_id,
                issue_iid,
                SyncState::Unlinked.as_str(),
                now
            ],
        )?;
        self.get(cache_key)?
            .ok_or_else(|| Error::RecordNotFound(cache_key.to_string()))
    }

    /// Move a record to `next`, validating the transition.
    ///
    /// Returns the updated record. Invalid moves (including identity moves)
    /// fail with [`Error::InvalidTransition`] and leave the row untouched.
    pub fn transition(&self, cache_key: &str, next: SyncState) -> Result<SyncRecord> {
        let record = self
            .get(cache_key)?
            .ok_or_else(|| Error::RecordNotFound(cache_key.to_string()))?;
        if !record.state.can_transition(next) {
            return Err(Error::InvalidTransition {
                from: record.state,
                to: next,
            });
        }
        self.conn.execute(
            "UPDATE sync_records SET state = ?1, updated_at = ?2 WHERE cache_key = ?3",
            params![next.as_str(), Utc::now().to_rfc3339(), cache_key],
        )?;
        self.get(cache_key)?
            .ok_or_else(|| Error::RecordNotFound(cache_key.to_string()))
    }

    /// Bind a workspace page to a record.
    pub fn bind_page(&self, cache_key: &str, page_id: &str, page_url: &str) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE sync_records SET page_id = ?1, page_url = ?2, updated_at = ?3
             WHERE cache_key = ?4",
            params![page_id, page_url, Utc::now().to_rfc3339(), cache_key],
        )?;
        if changed == 0 {
            return Err(Error::RecordNotFound(cache_key.to_string()));
        }
        Ok(())
    }

    /// Advance the block high-water mark for the record bound to `page_id`.
    pub fn set_block_watermark(&self, page_id: &str, at: DateTime<Utc>) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE sync_records SET block_watermark = ?1, updated_at = ?2
             WHERE page_id = ?3",
            params![at.to_rfc3339(), Utc::now().to_rfc3339(), page_id],
        )?;
        if changed == 0 {
            return Err(Error::RecordNotFound(page_id.to_string()));
        }
        Ok(())
    }
}

/// Map a result row onto a [`SyncRecord`].
fn record_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SyncRecord> {
    let state_raw: String = row.get(4)?;
    let state = SyncState::parse(&state_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            4,
            rusqlite::types::Type::Text,
            format!("unknown sync state '{state_raw}'").into(),
        )
    })?;
    Ok(SyncRecord {
        cache_key: row.get(0)?,
        issue_url: row.get(1)?,
        project_id: row.get(2)?,
        issue_iid: row.get(3)?,
        state,
        page_id: row.get(5)?,
        page_url: row.get(6)?,
        block_watermark: parse_time_column(row, 7)?,
        created_at: required_time(row, 8)?,
        updated_at: required_time(row, 9)?,
    })
}

fn required_time(row: &rusqlite::Row<'_>, index: usize) -> rusqlite::Result<DateTime<Utc>> {
    parse_time_column(row, index)?.ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            index,
            rusqlite::types::Type::Text,
            "unexpected NULL timestamp".into(),
        )
    })
}

fn parse_time_column(
    row: &rusqlite::Row<'_>,
    index: usize,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(index)?;
    match raw {
        None => Ok(None),
        Some(s) => DateTime::parse_from_rfc3339(&s)
            .map(|t| Some(t.with_timezone(&Utc)))
            .map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    index,
                    rusqlite::types::Type::Text,
                    e.to_string().into(),
                )
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SyncStore {
        SyncStore::open_in_memory().unwrap()
    }

    fn seed(store: &SyncStore) -> SyncRecord {
        store
            .ensure(
                "https://tracker.example.com/team/app/-/issues/42-#42:app - Fix login",
                "https://tracker.example.com/team/app/-/issues/42",
                7,
                42,
            )
            .unwrap()
    }

    #[test]
    fn test_ensure_creates_unlinked_record() {
        let store = store();
        let record = seed(&store);
        assert_eq!(record.state, SyncState::Unlinked);
        assert_eq!(record.project_id, 7);
        assert_eq!(record.issue_iid, 42);
        assert!(record.page_id.is_none());
        assert!(record.block_watermark.is_none());
    }

    #[test]
    fn test_ensure_is_idempotent() {
        let store = store();
        let first = seed(&store);
        store.transition(&first.cache_key, SyncState::Linked).unwrap();
        // A second ensure must not reset the state back to unlinked.
        let again = seed(&store);
        assert_eq!(again.state, SyncState::Linked);
    }

    #[test]
    fn test_get_missing_record() {
        let store = store();
        assert!(store.get("nothing").unwrap().is_none());
    }

    #[test]
    fn test_transition_happy_path() {
        let store = store();
        let record = seed(&store);
        let linked = store.transition(&record.cache_key, SyncState::Linked).unwrap();
        assert_eq!(linked.state, SyncState::Linked);
        let stale = store.transition(&record.cache_key, SyncState::Stale).unwrap();
        assert_eq!(stale.state, SyncState::Stale);
        let closed = store
            .transition(&record.cache_key, SyncState::ClosedInWorkspace)
            .unwrap();
        assert_eq!(closed.state, SyncState::ClosedInWorkspace);
    }

    #[test]
    fn test_transition_rejects_invalid_moves() {
        let store = store();
        let record = seed(&store);
        store.transition(&record.cache_key, SyncState::Linked).unwrap();

        let err = store
            .transition(&record.cache_key, SyncState::Linked)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidTransition {
                from: SyncState::Linked,
                to: SyncState::Linked
            }
        ));

        // The row is untouched after a rejected move.
        let current = store.get(&record.cache_key).unwrap().unwrap();
        assert_eq!(current.state, SyncState::Linked);
    }

    #[test]
    fn test_transition_missing_record() {
        let store = store();
        let err = store.transition("nothing", SyncState::Linked).unwrap_err();
        assert!(matches!(err, Error::RecordNotFound(_)));
    }

    #[test]
    fn test_bind_page_and_find_by_page() {
        let store = store();
        let record = seed(&store);
        store
            .bind_page(
                &record.cache_key,
                "01234567-89ab-cdef-0123-456789abcdef",
                "https://pages.example.com/p1",
            )
            .unwrap();
        let found = store
            .find_by_page("01234567-89ab-cdef-0123-456789abcdef")
            .unwrap()
            .unwrap();
        assert_eq!(found.cache_key, record.cache_key);
        assert_eq!(found.page_url.as_deref(), Some("https://pages.example.com/p1"));
    }

    #[test]
    fn test_find_by_issue() {
        let store = store();
        seed(&store);
        let found = store.find_by_issue(7, 42).unwrap().unwrap();
        assert_eq!(found.issue_iid, 42);
        assert!(store.find_by_issue(7, 999).unwrap().is_none());
    }

    #[test]
    fn test_block_watermark_roundtrip() {
        let store = store();
        let record = seed(&store);
        store
            .bind_page(&record.cache_key, "page-1", "https://pages.example.com/p1")
            .unwrap();
        let mark = DateTime::parse_from_rfc3339("2024-01-02T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        store.set_block_watermark("page-1", mark).unwrap();
        let found = store.find_by_page("page-1").unwrap().unwrap();
        assert_eq!(found.block_watermark, Some(mark));
    }

    #[test]
    fn test_watermark_for_unknown_page_fails() {
        let store = store();
        let err = store
            .set_block_watermark("no-such-page", Utc::now())
            .unwrap_err();
        assert!(matches!(err, Error::RecordNotFound(_)));
    }

    #[test]
    fn test_open_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join(STORE_FILE);
        let store = SyncStore::open(&path).unwrap();
        store
            .ensure("key", "https://tracker.example.com/t/p/-/issues/1", 1, 1)
            .unwrap();
        assert!(path.exists());

        // Reopening sees the same data.
        drop(store);
        let reopened = SyncStore::open(&path).unwrap();
        assert!(reopened.get("key").unwrap().is_some());
    }

    #[test]
    fn test_corrupt_state_value_is_an_error() {
        let store = store();
        let record = seed(&store);
        store
            .conn
            .execute(
                "UPDATE sync_records SET state = 'garbage' WHERE cache_key = ?1",
                params![record.cache_key],
            )
            .unwrap();
        assert!(store.get(&record.cache_key).is_err());
    }
}
