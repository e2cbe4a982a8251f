//! Two in-memory inverted character-posting indices: the full-corpus index
//! and a smaller, denser variant specialized for 1-2 character queries.

pub mod posting;
pub mod short;
pub mod slot;
pub mod snapshot;

pub use posting::{PostingIndex, ScoredCandidate};
pub use short::ShortFuzzyIndex;
pub use slot::{CharsetBitmap, Slot};
pub use snapshot::IndexSource;

use clip_store::record::Record;

/// Builds the slot for a single record, for incremental index updates.
pub fn slot_for(record: &Record) -> Slot {
    Slot::new(
        record.id,
        &record.plain_text,
        record.note.as_deref(),
        record.last_used_at,
        record.is_pinned,
    )
}

/// Builds the slot list for a fresh index from a full table scan.
pub fn slots_from_records<'a>(records: impl Iterator<Item = &'a Record>) -> Vec<Slot> {
    records.map(slot_for).collect()
}

/// Acquires a full-corpus index for the current `known_data_version`: tries
/// the disk snapshot first, verifies it, and falls back to a database
/// rebuild (persisting the result) on any validation failure.
pub fn acquire_full_index(
    snapshot_path: &std::path::Path,
    checksum_path: &std::path::Path,
    records: &[Record],
) -> (PostingIndex, IndexSource) {
    if let Some(index) = snapshot::load(snapshot_path, checksum_path) {
        return (index, IndexSource::DiskCache);
    }

    let slots = slots_from_records(records.iter());
    let index = PostingIndex::from_slots(slots);
    if let Err(e) = snapshot::persist(&index, snapshot_path, checksum_path) {
        tracing::warn!(error = %e, "failed to persist fuzzy index snapshot");
    }
    (index, IndexSource::Database)
}
