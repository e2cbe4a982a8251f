//! Error kinds surfaced by the search crate.

use thiserror::Error;

/// Variants map 1:1 onto the error-kind list consumed by the reactive
/// controller.
#[derive(Debug, Error, Clone)]
pub enum SearchError {
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("search timed out")]
    Timeout,

    #[error("search was cancelled")]
    Cancelled,

    #[error("storage is busy")]
    StorageBusy,

    #[error("storage is corrupted")]
    StorageCorrupted,

    #[error("external IO error: {0}")]
    ExternalIo(String),

    #[error("storage_ref path violation")]
    PathViolation,
}

impl From<rusqlite::Error> for SearchError {
    fn from(e: rusqlite::Error) -> Self {
        match &e {
            rusqlite::Error::SqliteFailure(code, _)
                if code.code == rusqlite::ErrorCode::DatabaseBusy =>
            {
                SearchError::StorageBusy
            }
            _ => SearchError::ExternalIo(e.to_string()),
        }
    }
}

impl From<clip_store::StoreError> for SearchError {
    fn from(e: clip_store::StoreError) -> Self {
        SearchError::ExternalIo(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SearchError>;
