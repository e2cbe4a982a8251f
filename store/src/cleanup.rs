//! Bounded eviction under `Settings`: item-count cap, inline/external
//! storage caps, orphan file sweep, and WAL checkpoint.

use crate::blob::BlobStorage;
use crate::config::Settings;
use crate::db::Database;
use crate::db::error::DatabaseError;
use crate::record::Record;
use std::collections::HashSet;
use std::path::PathBuf;

/// Cleanup's eviction loop is bounded to this many passes so a corpus that
/// is entirely pinned (and therefore never shrinks) still terminates.
pub const MAX_CLEANUP_ITERATIONS: usize = 256;

/// Concurrent external file deletions are capped at this parallelism.
pub const MAX_DELETE_PARALLELISM: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupMode {
    Light,
    Full,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CleanupOutcome {
    pub evicted: usize,
    pub orphaned_files_removed: usize,
}

pub(crate) fn bounded_pool() -> rayon::ThreadPool {
    rayon::ThreadPoolBuilder::new()
        .num_threads(MAX_DELETE_PARALLELISM)
        .build()
        .expect("bounded cleanup pool")
}

/// Runs the full eviction algorithm: repeatedly evicts the least-recently-
/// used, non-pinned, settings-eligible record until every cap is satisfied
/// or no pass makes progress.
pub fn perform_cleanup(
    db: &mut Database,
    blobs: &BlobStorage,
    settings: &Settings,
    mode: CleanupMode,
) -> Result<CleanupOutcome, DatabaseError> {
    tracing::info!(?mode, "cleanup started");
    let mut outcome = CleanupOutcome::default();
    let pool = bounded_pool();

    for _ in 0..MAX_CLEANUP_ITERATIONS {
        let records = db.all_records()?;
        let Some(victim) = pick_eviction_candidate(&records, settings) else {
            break;
        };

        let deleted = db.delete(victim.id)?;
        if let Some(record) = deleted {
            outcome.evicted += 1;
            if let Some(path) = record.storage_ref {
                pool.install(|| {
                    let _ = blobs.remove(&path);
                });
            }
        }
    }

    if mode == CleanupMode::Full {
        outcome.orphaned_files_removed = sweep_orphan_files(db, blobs)?;
        db.checkpoint_wal()?;
    }

    tracing::info!(
        evicted = outcome.evicted,
        orphans = outcome.orphaned_files_removed,
        "cleanup finished"
    );
    Ok(outcome)
}

/// Picks the single best eviction candidate for this pass, or `None` if
/// every cap is already satisfied.
fn pick_eviction_candidate(records: &[Record], settings: &Settings) -> Option<&Record> {
    let eligible = || {
        records
            .iter()
            .filter(|r| !r.is_pinned)
            .filter(|r| !settings.cleanup_images_only || r.kind == crate::record::ContentType::Image)
    };

    let non_pinned_count = records.iter().filter(|r| !r.is_pinned).count();

    let over_item_cap = records.len() as u64 > settings.max_items;

    let small_bytes: u64 = eligible().filter(|r| r.storage_ref.is_none()).map(|r| r.size_bytes).sum();
    let large_bytes: u64 = eligible().filter(|r| r.storage_ref.is_some()).map(|r| r.size_bytes).sum();

    let over_small_cap = small_bytes > settings.max_small_storage_mb * 1024 * 1024;
    let over_large_cap = large_bytes > settings.max_large_storage_mb * 1024 * 1024;

    if non_pinned_count == 0 || !(over_item_cap || over_small_cap || over_large_cap) {
        return None;
    }

    eligible().min_by_key(|r| r.last_used_at)
}

/// Removes files under `content/` that have no corresponding live record.
fn sweep_orphan_files(db: &Database, blobs: &BlobStorage) -> Result<usize, DatabaseError> {
    let referenced: HashSet<PathBuf> = db
        .all_records()?
        .into_iter()
        .filter_map(|r| r.storage_ref)
        .collect();

    let mut removed = 0;
    if let Ok(files) = blobs.list() {
        for file in files {
            if !referenced.contains(&file) {
                if blobs.remove(&file).is_ok() {
                    removed += 1;
                } else {
                    tracing::warn!(?file, "failed to remove orphan file");
                }
            }
        }
    }
    Ok(removed)
}

/// Reconciles `size_bytes` with the actual size on disk for every externally
/// stored record (invariant 6).
pub fn sync_external_sizes(db: &mut Database, blobs: &BlobStorage) -> Result<usize, DatabaseError> {
    let mut reconciled = 0;
    for record in db.all_records()? {
        let Some(path) = record.storage_ref.as_ref() else {
            continue;
        };
        match blobs.size_of(path) {
            Ok(actual) if actual != record.size_bytes => {
                db.update_size(record.id, actual)?;
                reconciled += 1;
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(?path, error = %e, "could not stat external file"),
        }
    }
    Ok(reconciled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::hash_text;
    use crate::record::{ContentType, RecordId};
    use std::time::{Duration, SystemTime};

    fn make(text: &str, pinned: bool, last_used_at: SystemTime) -> Record {
        Record {
            id: RecordId::new(),
            kind: ContentType::Text,
            content_hash: hash_text(text),
            plain_text: text.to_string(),
            note: None,
            app_bundle_id: None,
            created_at: last_used_at,
            last_used_at,
            use_count: 1,
            is_pinned: pinned,
            size_bytes: text.len() as u64,
            storage_ref: None,
            thumbnail_ref: None,
        }
    }

    mod perform_cleanup {
        use super::*;

        #[test]
        fn evicts_oldest_unpinned_when_over_item_cap() {
            let dir = tempfile::tempdir().unwrap();
            let mut db = Database::open(&dir.path().join("c.db")).unwrap();
            let blobs = BlobStorage::new(dir.path().join("content"));

            let base = SystemTime::now();
            let old = make("old", false, base);
            let newer = make("newer", false, base + Duration::from_secs(10));
            db.insert_record(&old).unwrap();
            db.insert_record(&newer).unwrap();

            let mut settings = Settings::default();
            settings.max_items = 1;

            let outcome = perform_cleanup(&mut db, &blobs, &settings, CleanupMode::Light).unwrap();
            assert_eq!(outcome.evicted, 1);
            assert!(db.find_by_id(old.id).unwrap().is_none());
            assert!(db.find_by_id(newer.id).unwrap().is_some());
        }

        #[test]
        fn never_evicts_pinned_even_when_corpus_is_all_pinned() {
            let dir = tempfile::tempdir().unwrap();
            let mut db = Database::open(&dir.path().join("c.db")).unwrap();
            let blobs = BlobStorage::new(dir.path().join("content"));

            let base = SystemTime::now();
            for i in 0..5 {
                let r = make(&format!("pinned {i}"), true, base + Duration::from_secs(i));
                db.insert_record(&r).unwrap();
            }

            let mut settings = Settings::default();
            settings.max_items = 1;

            let outcome = perform_cleanup(&mut db, &blobs, &settings, CleanupMode::Light).unwrap();
            assert_eq!(outcome.evicted, 0);
            assert_eq!(db.count().unwrap(), 5);
        }
    }
}
