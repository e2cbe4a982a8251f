//! SQLite-backed row storage: schema, migration, and the external-content
//! FTS5 virtual table that mirrors `plain_text`/`note` via triggers.

use crate::record::{ContentType, Record, RecordId};
use rusqlite::{Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub mod error {
    use thiserror::Error;

    #[derive(Debug, Error)]
    pub enum DatabaseError {
        #[error("sqlite error: {0}")]
        Sqlite(#[from] rusqlite::Error),

        #[error("record not found")]
        NotFound,

        #[error("database is busy")]
        Busy,
    }

    impl DatabaseError {
        pub fn is_busy(&self) -> bool {
            matches!(
                self,
                DatabaseError::Sqlite(rusqlite::Error::SqliteFailure(e, _))
                    if e.code == rusqlite::ErrorCode::DatabaseBusy
            )
        }
    }
}

use error::DatabaseError;

const SCHEMA_VERSION: i32 = 2;

/// Owns the single write connection. All mutations go through `&mut self`
/// methods so callers can't issue concurrent writes on this handle; short-
/// lived read-only connections are opened separately against the same WAL
/// file for concurrent reads.
pub struct Database {
    conn: Connection,
    db_path: PathBuf,
}

impl Database {
    pub fn open(db_path: &Path) -> Result<Self, DatabaseError> {
        let conn = Connection::open(db_path)?;
        configure_connection(&conn)?;

        let mut db = Self {
            conn,
            db_path: db_path.to_path_buf(),
        };
        db.migrate()?;
        Ok(db)
    }

    /// Opens an independent short-lived read-only connection against the
    /// same database file, for use by concurrent readers (e.g. `search`'s
    /// FTS queries) without contending with the write connection.
    pub fn open_reader(&self) -> Result<Connection, DatabaseError> {
        let conn = Connection::open(&self.db_path)?;
        conn.pragma_update(None, "query_only", true)?;
        Ok(conn)
    }

    fn migrate(&mut self) -> Result<(), DatabaseError> {
        let user_version: i32 = self
            .conn
            .query_row("SELECT user_version FROM pragma_user_version", [], |r| {
                r.get(0)
            })?;

        match user_version {
            0 | 1 => self.init_schema()?,
            SCHEMA_VERSION => {}
            other => {
                tracing::warn!(version = other, "unexpected schema version; leaving as-is");
            }
        }
        Ok(())
    }

    fn init_schema(&mut self) -> Result<(), DatabaseError> {
        self.conn.execute_batch(&format!(
            r#"
            BEGIN;
            CREATE TABLE IF NOT EXISTS clipboard_items (
                id TEXT PRIMARY KEY,
                type TEXT NOT NULL,
                content_hash TEXT NOT NULL UNIQUE,
                plain_text TEXT NOT NULL,
                note TEXT,
                app_bundle_id TEXT,
                created_at INTEGER NOT NULL,
                last_used_at INTEGER NOT NULL,
                use_count INTEGER NOT NULL,
                is_pinned INTEGER NOT NULL,
                size_bytes INTEGER NOT NULL,
                storage_ref TEXT,
                thumbnail_ref TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_type_last_used ON clipboard_items(type, last_used_at);
            CREATE INDEX IF NOT EXISTS idx_pinned_last_used ON clipboard_items(is_pinned, last_used_at);
            CREATE INDEX IF NOT EXISTS idx_content_hash ON clipboard_items(content_hash);

            CREATE VIRTUAL TABLE IF NOT EXISTS clipboard_fts USING fts5(
                plain_text, note,
                content='clipboard_items',
                content_rowid='rowid',
                tokenize='unicode61 remove_diacritics 2'
            );

            CREATE TRIGGER IF NOT EXISTS clipboard_ai AFTER INSERT ON clipboard_items BEGIN
                INSERT INTO clipboard_fts(rowid, plain_text, note) VALUES (new.rowid, new.plain_text, new.note);
            END;
            CREATE TRIGGER IF NOT EXISTS clipboard_ad AFTER DELETE ON clipboard_items BEGIN
                INSERT INTO clipboard_fts(clipboard_fts, rowid, plain_text, note) VALUES('delete', old.rowid, old.plain_text, old.note);
            END;
            CREATE TRIGGER IF NOT EXISTS clipboard_au_text AFTER UPDATE OF plain_text ON clipboard_items
            WHEN OLD.plain_text IS NOT NEW.plain_text
            BEGIN
                INSERT INTO clipboard_fts(clipboard_fts, rowid, plain_text, note) VALUES('delete', old.rowid, old.plain_text, old.note);
                INSERT INTO clipboard_fts(rowid, plain_text, note) VALUES (new.rowid, new.plain_text, new.note);
            END;
            CREATE TRIGGER IF NOT EXISTS clipboard_au_note AFTER UPDATE OF note ON clipboard_items
            WHEN OLD.note IS NOT NEW.note
            BEGIN
                INSERT INTO clipboard_fts(clipboard_fts, rowid, plain_text, note) VALUES('delete', old.rowid, old.plain_text, old.note);
                INSERT INTO clipboard_fts(rowid, plain_text, note) VALUES (new.rowid, new.plain_text, new.note);
            END;
            PRAGMA user_version = {SCHEMA_VERSION};
            COMMIT;
            "#
        ))?;
        Ok(())
    }
}

/// Insert/update operations.
impl Database {
    pub fn insert_record(&mut self, record: &Record) -> Result<(), DatabaseError> {
        let txn = self.conn.transaction()?;
        txn.execute(
            "INSERT INTO clipboard_items
                (id, type, content_hash, plain_text, note, app_bundle_id,
                 created_at, last_used_at, use_count, is_pinned, size_bytes,
                 storage_ref, thumbnail_ref)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            rusqlite::params![
                record.id.to_string(),
                record.kind.as_str(),
                record.content_hash,
                record.plain_text,
                record.note,
                record.app_bundle_id,
                to_millis(record.created_at),
                to_millis(record.last_used_at),
                record.use_count as i64,
                record.is_pinned as i64,
                record.size_bytes as i64,
                record.storage_ref.as_ref().map(|p| p.to_string_lossy().to_string()),
                record.thumbnail_ref.as_ref().map(|p| p.to_string_lossy().to_string()),
            ],
        )?;
        txn.commit()?;
        Ok(())
    }

    /// Bumps `last_used_at` and `use_count` on a dedup hit. Does not touch
    /// `plain_text`/`note`, so the FTS trigger never fires for this call.
    pub fn bump_use(&mut self, id: RecordId, now: SystemTime) -> Result<(), DatabaseError> {
        let txn = self.conn.transaction()?;
        txn.execute(
            "UPDATE clipboard_items SET last_used_at = ?1, use_count = use_count + 1 WHERE id = ?2",
            rusqlite::params![to_millis(now), id.to_string()],
        )?;
        txn.commit()?;
        Ok(())
    }

    pub fn set_pin(&mut self, id: RecordId, pinned: bool) -> Result<(), DatabaseError> {
        let txn = self.conn.transaction()?;
        let changed = txn.execute(
            "UPDATE clipboard_items SET is_pinned = ?1 WHERE id = ?2",
            rusqlite::params![pinned as i64, id.to_string()],
        )?;
        txn.commit()?;
        if changed == 0 {
            return Err(DatabaseError::NotFound);
        }
        Ok(())
    }

    pub fn update_note(&mut self, id: RecordId, note: Option<&str>) -> Result<(), DatabaseError> {
        let txn = self.conn.transaction()?;
        let changed = txn.execute(
            "UPDATE clipboard_items SET note = ?1 WHERE id = ?2",
            rusqlite::params![note, id.to_string()],
        )?;
        txn.commit()?;
        if changed == 0 {
            return Err(DatabaseError::NotFound);
        }
        Ok(())
    }

    pub fn update_size(&mut self, id: RecordId, size_bytes: u64) -> Result<(), DatabaseError> {
        let txn = self.conn.transaction()?;
        txn.execute(
            "UPDATE clipboard_items SET size_bytes = ?1 WHERE id = ?2",
            rusqlite::params![size_bytes as i64, id.to_string()],
        )?;
        txn.commit()?;
        Ok(())
    }

    pub fn set_thumbnail_ref(&mut self, id: RecordId, path: Option<&Path>) -> Result<(), DatabaseError> {
        let txn = self.conn.transaction()?;
        txn.execute(
            "UPDATE clipboard_items SET thumbnail_ref = ?1 WHERE id = ?2",
            rusqlite::params![path.map(|p| p.to_string_lossy().to_string()), id.to_string()],
        )?;
        txn.commit()?;
        Ok(())
    }

    /// Deletes the row and returns it (so the caller can remove any external
    /// file *after* this commit succeeds).
    pub fn delete(&mut self, id: RecordId) -> Result<Option<Record>, DatabaseError> {
        let txn = self.conn.transaction()?;
        let record = {
            let mut stmt = txn.prepare(SELECT_COLUMNS_WHERE_ID)?;
            stmt.query_row(rusqlite::params![id.to_string()], row_to_record)
                .optional()?
        };
        if record.is_some() {
            txn.execute(
                "DELETE FROM clipboard_items WHERE id = ?1",
                rusqlite::params![id.to_string()],
            )?;
        }
        txn.commit()?;
        Ok(record)
    }

    /// Deletes every non-pinned row in one transaction and returns the
    /// deleted rows (for bounded-parallel external file cleanup by the
    /// caller).
    pub fn delete_all_except_pinned(&mut self) -> Result<Vec<Record>, DatabaseError> {
        let txn = self.conn.transaction()?;
        let deleted: Vec<Record> = {
            let mut stmt = txn.prepare(
                "SELECT id, type, content_hash, plain_text, note, app_bundle_id, created_at, \
                 last_used_at, use_count, is_pinned, size_bytes, storage_ref, thumbnail_ref \
                 FROM clipboard_items WHERE is_pinned = 0",
            )?;
            let rows = stmt.query_map([], row_to_record)?;
            rows.collect::<Result<Vec<_>, _>>()?
        };
        txn.execute("DELETE FROM clipboard_items WHERE is_pinned = 0", [])?;
        txn.commit()?;
        Ok(deleted)
    }
}

/// Read operations.
impl Database {
    pub fn find_by_id(&self, id: RecordId) -> Result<Option<Record>, DatabaseError> {
        let mut stmt = self.conn.prepare(SELECT_COLUMNS_WHERE_ID)?;
        stmt.query_row(rusqlite::params![id.to_string()], row_to_record)
            .optional()
            .map_err(Into::into)
    }

    pub fn find_by_hash(&self, hash: &str) -> Result<Option<Record>, DatabaseError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, type, content_hash, plain_text, note, app_bundle_id, created_at, \
             last_used_at, use_count, is_pinned, size_bytes, storage_ref, thumbnail_ref \
             FROM clipboard_items WHERE content_hash = ?1",
        )?;
        stmt.query_row(rusqlite::params![hash], row_to_record)
            .optional()
            .map_err(Into::into)
    }

    /// Ordered by `(is_pinned DESC, last_used_at DESC, id ASC)`.
    pub fn fetch_recent(&self, limit: i64, offset: i64) -> Result<Vec<Record>, DatabaseError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, type, content_hash, plain_text, note, app_bundle_id, created_at, \
             last_used_at, use_count, is_pinned, size_bytes, storage_ref, thumbnail_ref \
             FROM clipboard_items \
             ORDER BY is_pinned DESC, last_used_at DESC, id ASC \
             LIMIT ?1 OFFSET ?2",
        )?;
        let rows = stmt.query_map(rusqlite::params![limit, offset], row_to_record)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn count(&self) -> Result<i64, DatabaseError> {
        self.conn
            .query_row("SELECT COUNT(*) FROM clipboard_items", [], |r| r.get(0))
            .map_err(Into::into)
    }

    /// All rows, for cleanup/eviction planning. Cleanup corpora are bounded
    /// by `max_items`, so this is not unbounded in practice.
    pub fn all_records(&self) -> Result<Vec<Record>, DatabaseError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, type, content_hash, plain_text, note, app_bundle_id, created_at, \
             last_used_at, use_count, is_pinned, size_bytes, storage_ref, thumbnail_ref \
             FROM clipboard_items",
        )?;
        let rows = stmt.query_map([], row_to_record)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn checkpoint_wal(&self) -> Result<(), DatabaseError> {
        self.conn
            .execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
        Ok(())
    }
}

const SELECT_COLUMNS_WHERE_ID: &str = "SELECT id, type, content_hash, plain_text, note, app_bundle_id, created_at, \
     last_used_at, use_count, is_pinned, size_bytes, storage_ref, thumbnail_ref \
     FROM clipboard_items WHERE id = ?1";

fn configure_connection(conn: &Connection) -> Result<(), DatabaseError> {
    conn.pragma_update(None, "journal_mode", "wal")?;
    conn.pragma_update(None, "synchronous", "normal")?;
    conn.pragma_update(None, "foreign_keys", true)?;
    Ok(())
}

fn to_millis(t: SystemTime) -> i64 {
    t.duration_since(UNIX_EPOCH).unwrap_or(Duration::ZERO).as_millis() as i64
}

fn from_millis(ms: i64) -> SystemTime {
    UNIX_EPOCH + Duration::from_millis(ms.max(0) as u64)
}

fn row_to_record(row: &Row) -> rusqlite::Result<Record> {
    let id_str: String = row.get(0)?;
    let kind_str: String = row.get(1)?;
    let storage_ref: Option<String> = row.get(11)?;
    let thumbnail_ref: Option<String> = row.get(12)?;

    Ok(Record {
        id: RecordId::parse(&id_str).unwrap_or_default(),
        kind: ContentType::parse(&kind_str).unwrap_or(ContentType::Text),
        content_hash: row.get(2)?,
        plain_text: row.get(3)?,
        note: row.get(4)?,
        app_bundle_id: row.get(5)?,
        created_at: from_millis(row.get(6)?),
        last_used_at: from_millis(row.get(7)?),
        use_count: row.get::<_, i64>(8)? as u64,
        is_pinned: row.get::<_, i64>(9)? != 0,
        size_bytes: row.get::<_, i64>(10)? as u64,
        storage_ref: storage_ref.map(PathBuf::from),
        thumbnail_ref: thumbnail_ref.map(PathBuf::from),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    mod common {
        use super::*;

        pub(super) fn open_test_db() -> (Database, tempfile::TempDir) {
            let dir = tempfile::tempdir().unwrap();
            let db = Database::open(&dir.path().join("clipboard.db")).unwrap();
            (db, dir)
        }

        pub(super) fn sample_record(text: &str) -> Record {
            let now = SystemTime::now();
            Record {
                id: RecordId::new(),
                kind: ContentType::Text,
                content_hash: crate::normalize::hash_text(text),
                plain_text: text.to_string(),
                note: None,
                app_bundle_id: None,
                created_at: now,
                last_used_at: now,
                use_count: 1,
                is_pinned: false,
                size_bytes: text.len() as u64,
                storage_ref: None,
                thumbnail_ref: None,
            }
        }
    }

    use common::*;

    mod insert_record {
        use super::*;

        #[test]
        fn round_trips_through_find_by_id() {
            let (mut db, _dir) = open_test_db();
            let record = sample_record("hello world");
            db.insert_record(&record).unwrap();

            let found = db.find_by_id(record.id).unwrap().unwrap();
            assert_eq!(found.plain_text, "hello world");
            assert_eq!(found.content_hash, record.content_hash);
        }

        #[test]
        fn duplicate_hash_is_rejected_at_the_sql_layer() {
            let (mut db, _dir) = open_test_db();
            let mut a = sample_record("same");
            let mut b = sample_record("same");
            b.content_hash = a.content_hash.clone();
            a.id = RecordId::new();
            b.id = RecordId::new();

            db.insert_record(&a).unwrap();
            assert!(db.insert_record(&b).is_err());
        }
    }

    mod bump_use {
        use super::*;
        use std::time::Duration;

        #[test]
        fn increments_use_count_without_touching_text() {
            let (mut db, _dir) = open_test_db();
            let record = sample_record("bumped");
            db.insert_record(&record).unwrap();

            let later = record.last_used_at + Duration::from_secs(5);
            db.bump_use(record.id, later).unwrap();

            let found = db.find_by_id(record.id).unwrap().unwrap();
            assert_eq!(found.use_count, 2);
            assert_eq!(found.plain_text, "bumped");
        }
    }

    mod fetch_recent {
        use super::*;

        #[test]
        fn pinned_then_recency_then_id_order() {
            let (mut db, _dir) = open_test_db();
            let mut old = sample_record("old");
            old.last_used_at = UNIX_EPOCH + Duration::from_secs(10);
            let mut new_unpinned = sample_record("new");
            new_unpinned.last_used_at = UNIX_EPOCH + Duration::from_secs(20);
            let mut pinned = sample_record("pinned but old");
            pinned.last_used_at = UNIX_EPOCH + Duration::from_secs(1);
            pinned.is_pinned = true;

            db.insert_record(&old).unwrap();
            db.insert_record(&new_unpinned).unwrap();
            db.insert_record(&pinned).unwrap();

            let page = db.fetch_recent(10, 0).unwrap();
            assert_eq!(page[0].id, pinned.id);
            assert_eq!(page[1].id, new_unpinned.id);
            assert_eq!(page[2].id, old.id);
        }
    }

    mod delete {
        use super::*;

        #[test]
        fn removes_row_and_returns_it() {
            let (mut db, _dir) = open_test_db();
            let record = sample_record("to delete");
            db.insert_record(&record).unwrap();

            let deleted = db.delete(record.id).unwrap();
            assert!(deleted.is_some());
            assert!(db.find_by_id(record.id).unwrap().is_none());
        }

        #[test]
        fn missing_id_returns_none() {
            let (mut db, _dir) = open_test_db();
            assert!(db.delete(RecordId::new()).unwrap().is_none());
        }
    }

    mod delete_all_except_pinned {
        use super::*;

        #[test]
        fn keeps_only_pinned_rows() {
            let (mut db, _dir) = open_test_db();
            let mut pinned = sample_record("keep me");
            pinned.is_pinned = true;
            let unpinned = sample_record("remove me");

            db.insert_record(&pinned).unwrap();
            db.insert_record(&unpinned).unwrap();

            let deleted = db.delete_all_except_pinned().unwrap();
            assert_eq!(deleted.len(), 1);
            assert_eq!(deleted[0].id, unpinned.id);
            assert_eq!(db.count().unwrap(), 1);
        }
    }

    mod fts_consistency {
        use super::*;

        #[test]
        fn fts_row_matches_current_plain_text_after_update() {
            let (mut db, _dir) = open_test_db();
            let record = sample_record("initial content");
            db.insert_record(&record).unwrap();

            // bump_use must not disturb the FTS row.
            db.bump_use(record.id, SystemTime::now()).unwrap();

            let reader = db.open_reader().unwrap();
            let text: String = reader
                .query_row(
                    "SELECT plain_text FROM clipboard_fts WHERE rowid = \
                     (SELECT rowid FROM clipboard_items WHERE id = ?1)",
                    rusqlite::params![record.id.to_string()],
                    |r| r.get(0),
                )
                .unwrap();
            assert_eq!(text, "initial content");
        }

        #[test]
        fn matches_via_fts_after_insert() {
            let (mut db, _dir) = open_test_db();
            let record = sample_record("searchable phrase");
            db.insert_record(&record).unwrap();

            let reader = db.open_reader().unwrap();
            let count: i64 = reader
                .query_row(
                    "SELECT COUNT(*) FROM clipboard_fts WHERE clipboard_fts MATCH 'searchable'",
                    [],
                    |r| r.get(0),
                )
                .unwrap();
            assert_eq!(count, 1);
        }
    }
}
