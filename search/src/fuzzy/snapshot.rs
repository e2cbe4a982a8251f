//! Disk-cached snapshot of a [`PostingIndex`]: postcard-encoded payload plus
//! a SHA-256 sidecar checksum, persisted atomically (temp file, fsync,
//! rename, checksum written after the payload).

use crate::fuzzy::posting::PostingIndex;
use crate::fuzzy::slot::Slot;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::Write;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexSource {
    DiskCache,
    Database,
}

#[derive(Serialize, Deserialize)]
pub struct FuzzyIndexSnapshot {
    pub slots: Vec<Slot>,
    pub postings: HashMap<char, Vec<u32>>,
}

impl FuzzyIndexSnapshot {
    pub fn from_index(index: &PostingIndex) -> Self {
        Self {
            slots: index.live_slots().cloned().collect(),
            postings: index.postings().clone(),
        }
    }

    /// True if every posting in the *deserialized* map references a slot
    /// index that actually exists. Must be checked before `into_index`:
    /// `PostingIndex::from_slots` re-derives postings from `slots` alone, so
    /// an index built from this snapshot is always internally consistent
    /// regardless of what `postings` originally said — checking the rebuilt
    /// index instead of this raw map would never catch a corrupt snapshot.
    pub fn postings_in_range(&self) -> bool {
        self.postings
            .values()
            .flatten()
            .all(|&idx| (idx as usize) < self.slots.len())
    }

    pub fn into_index(self) -> PostingIndex {
        PostingIndex::from_slots(self.slots)
    }
}

/// Attempts to load and validate a snapshot at `snapshot_path`, verifying it
/// against the sidecar checksum at `checksum_path` and rejecting it if any
/// posting references an out-of-range slot. Returns `None` on any failure
/// (missing files, checksum mismatch, corrupt payload, bad postings) —
/// callers fall back to a database rebuild.
pub fn load(snapshot_path: &Path, checksum_path: &Path) -> Option<PostingIndex> {
    let payload = std::fs::read(snapshot_path).ok()?;
    let expected_checksum = std::fs::read_to_string(checksum_path).ok()?;
    let actual_checksum = hex_sha256(&payload);

    if expected_checksum.trim() != actual_checksum {
        return None;
    }

    let snapshot: FuzzyIndexSnapshot = postcard::from_bytes(&payload).ok()?;
    if !snapshot.postings_in_range() {
        return None;
    }

    Some(snapshot.into_index())
}

/// Persists `index` to `snapshot_path`, writing the payload to a temp file
/// in the same directory, fsyncing, and renaming into place before writing
/// the sidecar checksum — so a reader never observes a checksum that
/// doesn't match the bytes on disk.
pub fn persist(index: &PostingIndex, snapshot_path: &Path, checksum_path: &Path) -> std::io::Result<()> {
    let snapshot = FuzzyIndexSnapshot::from_index(index);
    let payload = postcard::to_allocvec(&snapshot).map_err(|e| {
        std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())
    })?;

    if let Some(parent) = snapshot_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let temp_path = snapshot_path.with_extension("tmp");
    {
        let mut f = std::fs::File::create(&temp_path)?;
        f.write_all(&payload)?;
        f.sync_all()?;
    }
    std::fs::rename(&temp_path, snapshot_path)?;

    let checksum = hex_sha256(&payload);
    std::fs::write(checksum_path, checksum)?;
    Ok(())
}

fn hex_sha256(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    let mut s = String::with_capacity(digest.len() * 2);
    use std::fmt::Write as _;
    for b in digest {
        let _ = write!(s, "{:02x}", b);
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use clip_store::record::RecordId;
    use std::time::SystemTime;

    fn sample_index() -> PostingIndex {
        let mut index = PostingIndex::new();
        index.insert(Slot::new(RecordId::new(), "hello world", None, SystemTime::now(), false));
        index.insert(Slot::new(RecordId::new(), "goodbye", None, SystemTime::now(), true));
        index
    }

    mod persist_and_load {
        use super::*;

        #[test]
        fn round_trips_posting_sets_modulo_slot_numbering() {
            let dir = tempfile::tempdir().unwrap();
            let snapshot_path = dir.path().join("index.plist");
            let checksum_path = dir.path().join("index.sha256");

            let original = sample_index();
            persist(&original, &snapshot_path, &checksum_path).unwrap();

            let loaded = load(&snapshot_path, &checksum_path).unwrap();
            assert_eq!(loaded.len(), original.len());
        }

        #[test]
        fn corrupted_payload_with_stale_checksum_is_rejected() {
            let dir = tempfile::tempdir().unwrap();
            let snapshot_path = dir.path().join("index.plist");
            let checksum_path = dir.path().join("index.sha256");

            persist(&sample_index(), &snapshot_path, &checksum_path).unwrap();

            // Corrupt the payload but leave the (now stale) checksum file alone.
            let mut bytes = std::fs::read(&snapshot_path).unwrap();
            if let Some(b) = bytes.first_mut() {
                *b = b.wrapping_add(1);
            }
            std::fs::write(&snapshot_path, bytes).unwrap();

            assert!(load(&snapshot_path, &checksum_path).is_none());
        }

        #[test]
        fn missing_sidecar_is_rejected() {
            let dir = tempfile::tempdir().unwrap();
            let snapshot_path = dir.path().join("index.plist");
            let checksum_path = dir.path().join("index.sha256");
            persist(&sample_index(), &snapshot_path, &checksum_path).unwrap();
            std::fs::remove_file(&checksum_path).unwrap();
            assert!(load(&snapshot_path, &checksum_path).is_none());
        }

        /// A checksum that matches the bytes on disk isn't enough: the
        /// decoded postings must also point at slots that actually exist.
        /// This writes a self-consistent (checksum-wise) but semantically
        /// corrupt snapshot directly, rather than flipping a byte, so the
        /// rejection is attributable to `postings_in_range` and not to the
        /// checksum check above it.
        #[test]
        fn out_of_range_posting_with_matching_checksum_is_rejected() {
            let dir = tempfile::tempdir().unwrap();
            let snapshot_path = dir.path().join("index.plist");
            let checksum_path = dir.path().join("index.sha256");

            let mut postings = HashMap::new();
            postings.insert('a', vec![0, 99]); // only slot 0 exists below
            let snapshot = FuzzyIndexSnapshot {
                slots: vec![Slot::new(RecordId::new(), "a", None, SystemTime::now(), false)],
                postings,
            };
            let payload = postcard::to_allocvec(&snapshot).unwrap();
            std::fs::write(&snapshot_path, &payload).unwrap();
            std::fs::write(&checksum_path, hex_sha256(&payload)).unwrap();

            assert!(load(&snapshot_path, &checksum_path).is_none());
        }
    }
}
