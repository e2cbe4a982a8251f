//! External blob storage: the `content/<uuid>` file layout for payloads at
//! or above the inline threshold.

use crate::record::RecordId;
use std::io::Write;
use std::path::{Path, PathBuf};

pub mod error {
    use thiserror::Error;

    #[derive(Debug, Error)]
    pub enum BlobError {
        #[error("IO error: {0}")]
        Io(#[from] std::io::Error),

        #[error("resolved path escapes the content directory")]
        PathViolation,
    }
}

use error::BlobError;

/// Payloads at or above this size are stored externally rather than inline
/// in the database row.
pub const INLINE_THRESHOLD_BYTES: u64 = 512 * 1024;

pub struct BlobStorage {
    content_path: PathBuf,
}

impl BlobStorage {
    pub fn new(content_path: PathBuf) -> Self {
        Self { content_path }
    }

    pub fn content_dir(&self) -> &Path {
        &self.content_path
    }

    /// Writes `bytes` to a new external file for `id` and returns its path.
    /// Writes to a temp file in the same directory first, then renames, so a
    /// crash mid-write never leaves a half-written file at the final path.
    pub fn write(&self, id: RecordId, ext: &str, bytes: &[u8]) -> Result<PathBuf, BlobError> {
        std::fs::create_dir_all(&self.content_path)?;

        let final_path = self.final_path(id, ext);
        let temp_path = self.content_path.join(format!("{id}.tmp"));

        {
            let mut f = std::fs::File::create(&temp_path)?;
            f.write_all(bytes)?;
            f.sync_all()?;
        }
        std::fs::rename(&temp_path, &final_path)?;

        Ok(final_path)
    }

    /// Removes the blob file at `path`, after checking it resolves under the
    /// content directory. Best-effort: missing files are not an error.
    pub fn remove(&self, path: &Path) -> Result<(), BlobError> {
        self.verify_confined(path)?;
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn size_of(&self, path: &Path) -> Result<u64, BlobError> {
        self.verify_confined(path)?;
        Ok(std::fs::metadata(path)?.len())
    }

    /// Lists every file directly under the content directory.
    pub fn list(&self) -> Result<Vec<PathBuf>, BlobError> {
        if !self.content_path.exists() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        for entry in std::fs::read_dir(&self.content_path)? {
            out.push(entry?.path());
        }
        Ok(out)
    }

    fn final_path(&self, id: RecordId, ext: &str) -> PathBuf {
        if ext.is_empty() {
            self.content_path.join(format!("{id}.bin"))
        } else {
            self.content_path.join(format!("{id}.{ext}"))
        }
    }

    /// Invariant 4: every `storage_ref` must resolve under `content/`, with
    /// no `..` traversal and no symlink escape.
    fn verify_confined(&self, path: &Path) -> Result<(), BlobError> {
        let base = dunce_canonicalize(&self.content_path)?;
        let candidate = match dunce_canonicalize(path) {
            Ok(p) => p,
            // A file that doesn't exist yet can't be canonicalized; fall
            // back to syntactic containment under the (canonical) base.
            Err(_) => {
                if !path.starts_with(&self.content_path) {
                    return Err(BlobError::PathViolation);
                }
                return Ok(());
            }
        };
        if candidate.starts_with(&base) {
            Ok(())
        } else {
            Err(BlobError::PathViolation)
        }
    }
}

fn dunce_canonicalize(path: &Path) -> std::io::Result<PathBuf> {
    std::fs::canonicalize(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    mod write {
        use super::*;

        #[test]
        fn writes_bytes_and_resolves_under_content_dir() {
            let dir = tempfile::tempdir().unwrap();
            let storage = BlobStorage::new(dir.path().join("content"));
            let id = RecordId::new();
            let path = storage.write(id, "bin", b"hello").unwrap();
            assert!(path.starts_with(dir.path().join("content")));
            assert_eq!(std::fs::read(&path).unwrap(), b"hello");
        }
    }

    mod remove {
        use super::*;

        #[test]
        fn missing_file_is_not_an_error() {
            let dir = tempfile::tempdir().unwrap();
            let storage = BlobStorage::new(dir.path().join("content"));
            std::fs::create_dir_all(storage.content_dir()).unwrap();
            let missing = storage.content_dir().join("nope.bin");
            assert!(storage.remove(&missing).is_ok());
        }

        #[test]
        fn rejects_path_outside_content_dir() {
            let dir = tempfile::tempdir().unwrap();
            let storage = BlobStorage::new(dir.path().join("content"));
            std::fs::create_dir_all(storage.content_dir()).unwrap();
            let outside = dir.path().join("escape.bin");
            std::fs::write(&outside, b"x").unwrap();
            assert!(matches!(storage.remove(&outside), Err(BlobError::PathViolation)));
        }
    }
}
