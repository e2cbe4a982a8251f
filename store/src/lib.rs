//! Durable, content-addressed clipboard record storage.
//!
//! [`Store`] owns the SQLite database, the external blob directory, and a
//! monotonic `known_data_version` counter. It is the single writer; reads
//! may proceed concurrently through short-lived read-only connections
//! opened against the same WAL file.

pub mod blob;
pub mod cleanup;
pub mod config;
pub mod db;
pub mod events;
pub mod normalize;
pub mod record;

use blob::BlobStorage;
use blob::error::BlobError;
use cleanup::{CleanupMode, CleanupOutcome};
use config::{Settings, StoreConfig};
use db::Database;
use db::error::DatabaseError;
use events::{Event, EventBus, Subscription};
use record::{ContentType, IngestedContent, Record, RecordId};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::SystemTime;

pub mod error {
    use super::*;
    use thiserror::Error;

    #[derive(Debug, Error)]
    pub enum StoreError {
        #[error("database error: {0}")]
        Database(#[from] DatabaseError),

        #[error("blob storage error: {0}")]
        Blob(#[from] BlobError),

        #[error("record not found")]
        NotFound,

        #[error("database is corrupted; writes are blocked")]
        Corrupted,
    }
}

pub use error::StoreError;
pub type Result<T> = std::result::Result<T, StoreError>;

/// Durable content-addressed record store. All mutating operations are
/// serialized against the single write connection via `&mut self`; readers
/// (this crate's `fetch_recent`/`find_by_id`, or `search`'s FTS queries) may
/// open independent read-only connections concurrently.
pub struct Store {
    db: Mutex<Database>,
    blobs: BlobStorage,
    events: EventBus,
    data_version: AtomicU64,
    corrupted: AtomicBool,
    config: StoreConfig,
}

impl Store {
    pub fn open(config: StoreConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.base_path).map_err(BlobError::Io)?;
        let db = Database::open(&config.db_path())?;
        let blobs = BlobStorage::new(config.content_path());

        Ok(Self {
            db: Mutex::new(db),
            blobs,
            events: EventBus::new(256),
            data_version: AtomicU64::new(0),
            corrupted: AtomicBool::new(false),
            config,
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.config.base_path
    }

    pub fn known_data_version(&self) -> u64 {
        self.data_version.load(Ordering::Acquire)
    }

    pub fn is_corrupted(&self) -> bool {
        self.corrupted.load(Ordering::Acquire)
    }

    pub fn subscribe(&self) -> Subscription {
        self.events.subscribe()
    }

    /// Opens an independent read-only connection against the same database
    /// file, for the `search` crate's FTS/exact-match queries.
    pub fn open_reader(&self) -> Result<rusqlite::Connection> {
        let db = self.db.lock().unwrap();
        Ok(db.open_reader()?)
    }

    fn bump_version(&self) -> u64 {
        self.data_version.fetch_add(1, Ordering::AcqRel) + 1
    }

    fn guard_writes(&self) -> Result<()> {
        if self.is_corrupted() {
            return Err(StoreError::Corrupted);
        }
        Ok(())
    }
}

/// Ingest operations.
impl Store {
    /// Computes `content_hash`; on a dedup hit, bumps `last_used_at`/
    /// `use_count` and returns the existing record without creating a new
    /// row. Otherwise inserts, writing external payloads before the row so a
    /// failed DB write leaves no orphan row (the file itself is best-effort
    /// cleaned up).
    pub fn upsert(&self, ingested: IngestedContent, now: SystemTime) -> Result<Record> {
        self.guard_writes()?;

        let content_hash = if ingested.kind.is_text_bearing() {
            normalize::hash_text(&ingested.plain_text)
        } else {
            normalize::hash_bytes(&ingested.raw_payload)
        };

        let mut db = self.db.lock().unwrap();

        if let Some(existing) = db.find_by_hash(&content_hash)? {
            db.bump_use(existing.id, now)?;
            tracing::debug!(id = %existing.id, "upsert: dedup hit");
            drop(db);
            self.bump_version();
            let record = self.find_by_id(existing.id)?.ok_or(StoreError::NotFound)?;
            self.events.publish(Event::ItemUpdated(record.id));
            return Ok(record);
        }

        let id = RecordId::new();
        let size_bytes = if ingested.kind.is_text_bearing() {
            ingested.plain_text.len() as u64
        } else {
            ingested.raw_payload.len() as u64
        };

        // `plain_text` always stays in the row regardless (the FTS row must
        // track it per invariant 3); a large text payload is externalized by
        // also writing its bytes to a blob, same as image/file payloads.
        let (storage_ref, size_bytes) = if size_bytes >= blob::INLINE_THRESHOLD_BYTES {
            let bytes: &[u8] = if ingested.kind.is_text_bearing() {
                ingested.plain_text.as_bytes()
            } else {
                &ingested.raw_payload
            };
            let ext = extension_for(ingested.kind);
            let path = self.blobs.write(id, ext, bytes)?;
            (Some(path), size_bytes)
        } else {
            (None, size_bytes)
        };

        let record = Record {
            id,
            kind: ingested.kind,
            content_hash,
            plain_text: ingested.plain_text,
            note: ingested.note,
            app_bundle_id: ingested.app_bundle_id,
            created_at: now,
            last_used_at: now,
            use_count: 1,
            is_pinned: false,
            size_bytes,
            storage_ref: storage_ref.clone(),
            thumbnail_ref: None,
        };

        if let Err(e) = db.insert_record(&record) {
            if let Some(path) = storage_ref {
                if let Err(cleanup_err) = self.blobs.remove(&path) {
                    tracing::warn!(error = %cleanup_err, "failed to remove orphaned blob after failed insert");
                }
            }
            return Err(e.into());
        }

        drop(db);
        self.bump_version();
        tracing::debug!(id = %record.id, "upsert: new record");
        self.events.publish(Event::NewItem(record.id));
        Ok(record)
    }
}

/// Read operations.
impl Store {
    pub fn fetch_recent(&self, limit: u32, offset: u32) -> Result<Vec<Record>> {
        let db = self.db.lock().unwrap();
        Ok(db.fetch_recent(limit as i64, offset as i64)?)
    }

    pub fn find_by_id(&self, id: RecordId) -> Result<Option<Record>> {
        let db = self.db.lock().unwrap();
        Ok(db.find_by_id(id)?)
    }

    pub fn find_by_hash(&self, hash: &str) -> Result<Option<Record>> {
        let db = self.db.lock().unwrap();
        Ok(db.find_by_hash(hash)?)
    }

    /// Total record count, for deciding whether a corpus is large enough to
    /// warrant progressive fuzzy refinement.
    pub fn count(&self) -> Result<i64> {
        let db = self.db.lock().unwrap();
        Ok(db.count()?)
    }

    /// Full table scan, for building an in-memory fuzzy index from scratch.
    pub fn all_records(&self) -> Result<Vec<Record>> {
        let db = self.db.lock().unwrap();
        Ok(db.all_records()?)
    }
}

/// Mutation operations.
impl Store {
    pub fn set_pin(&self, id: RecordId, pinned: bool) -> Result<()> {
        self.guard_writes()?;
        let mut db = self.db.lock().unwrap();
        db.set_pin(id, pinned)?;
        drop(db);
        self.bump_version();
        self.events.publish(Event::ItemUpdated(id));
        Ok(())
    }

    pub fn update_note(&self, id: RecordId, note: Option<&str>) -> Result<()> {
        self.guard_writes()?;
        let mut db = self.db.lock().unwrap();
        db.update_note(id, note)?;
        drop(db);
        self.bump_version();
        self.events.publish(Event::ItemUpdated(id));
        Ok(())
    }

    pub fn set_thumbnail(&self, id: RecordId, path: Option<&Path>) -> Result<()> {
        self.guard_writes()?;
        let mut db = self.db.lock().unwrap();
        db.set_thumbnail_ref(id, path)?;
        drop(db);
        self.bump_version();
        if let Some(p) = path {
            self.events.publish(Event::ThumbnailUpdated(id, p.to_path_buf()));
        }
        Ok(())
    }

    /// Deletes the record, then best-effort removes its external file
    /// *after* the DB deletion commits. File-removal failure is logged, not
    /// surfaced: it will be swept by a later `full` cleanup pass.
    pub fn delete(&self, id: RecordId) -> Result<()> {
        self.guard_writes()?;
        let mut db = self.db.lock().unwrap();
        let deleted = db.delete(id)?;
        drop(db);
        self.bump_version();

        if let Some(record) = deleted {
            if let Some(path) = &record.storage_ref {
                if let Err(e) = self.blobs.remove(path) {
                    tracing::warn!(error = %e, id = %id, "failed to remove external file on delete");
                }
            }
            self.events.publish(Event::ItemDeleted(id));
        }
        Ok(())
    }

    /// Removes every non-pinned record. External file removal runs on a
    /// bounded worker pool (`P ≈ 8`) so it never blocks the control thread
    /// for longer than the slowest single file.
    pub fn delete_all_except_pinned(&self) -> Result<usize> {
        self.guard_writes()?;
        let mut db = self.db.lock().unwrap();
        let deleted = db.delete_all_except_pinned()?;
        drop(db);
        self.bump_version();

        let paths: Vec<_> = deleted.iter().filter_map(|r| r.storage_ref.clone()).collect();
        let pool = cleanup::bounded_pool();
        pool.install(|| {
            use rayon::prelude::*;
            paths.par_iter().for_each(|path| {
                if let Err(e) = self.blobs.remove(path) {
                    tracing::warn!(error = %e, ?path, "failed to remove external file during bulk delete");
                }
            });
        });

        for record in &deleted {
            self.events.publish(Event::ItemDeleted(record.id));
        }
        Ok(deleted.len())
    }
}

/// Maintenance operations.
impl Store {
    pub fn perform_cleanup(&self, mode: CleanupMode, settings: &Settings) -> Result<CleanupOutcome> {
        self.guard_writes()?;
        let mut db = self.db.lock().unwrap();
        let outcome = cleanup::perform_cleanup(&mut db, &self.blobs, settings, mode)?;
        drop(db);
        if outcome.evicted > 0 || outcome.orphaned_files_removed > 0 {
            self.bump_version();
        }
        Ok(outcome)
    }

    pub fn sync_external_sizes(&self) -> Result<usize> {
        self.guard_writes()?;
        let mut db = self.db.lock().unwrap();
        let reconciled = cleanup::sync_external_sizes(&mut db, &self.blobs)?;
        drop(db);
        if reconciled > 0 {
            self.bump_version();
        }
        Ok(reconciled)
    }

    pub fn mark_corrupted(&self) {
        self.corrupted.store(true, Ordering::Release);
    }
}

fn extension_for(kind: ContentType) -> &'static str {
    match kind {
        ContentType::Image => "png",
        _ => "bin",
    }
}
