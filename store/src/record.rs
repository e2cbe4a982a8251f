//! The stored unit and the boundary type fed by the ingest collaborator.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::SystemTime;

/// Stable identifier for a [`Record`], UUID-shaped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordId(uuid::Uuid);

impl RecordId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> uuid::Uuid {
        self.0
    }

    pub fn parse(s: &str) -> Option<Self> {
        uuid::Uuid::parse_str(s).ok().map(Self)
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Content shape of a record; drives the inline/external storage decision
/// and the dedup hash basis (text-normalized vs. raw bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentType {
    Text,
    Rtf,
    Html,
    Image,
    File,
}

impl ContentType {
    /// Text-bearing types hash their normalized `plain_text`; image/file
    /// types hash their raw payload bytes.
    pub fn is_text_bearing(self) -> bool {
        matches!(self, ContentType::Text | ContentType::Rtf | ContentType::Html)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ContentType::Text => "text",
            ContentType::Rtf => "rtf",
            ContentType::Html => "html",
            ContentType::Image => "image",
            ContentType::File => "file",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "text" => Some(ContentType::Text),
            "rtf" => Some(ContentType::Rtf),
            "html" => Some(ContentType::Html),
            "image" => Some(ContentType::Image),
            "file" => Some(ContentType::File),
            _ => None,
        }
    }
}

/// A single clipboard history entry, as persisted by [`crate::Store`].
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub id: RecordId,
    pub kind: ContentType,
    pub content_hash: String,
    pub plain_text: String,
    pub note: Option<String>,
    pub app_bundle_id: Option<String>,
    pub created_at: SystemTime,
    pub last_used_at: SystemTime,
    pub use_count: u64,
    pub is_pinned: bool,
    pub size_bytes: u64,
    pub storage_ref: Option<PathBuf>,
    pub thumbnail_ref: Option<PathBuf>,
}

/// Content handed to [`crate::Store::upsert`] by the (external) clipboard
/// polling / content-extraction collaborator.
#[derive(Debug, Clone)]
pub struct IngestedContent {
    pub kind: ContentType,
    pub plain_text: String,
    pub note: Option<String>,
    pub app_bundle_id: Option<String>,
    /// Raw bytes backing the record. For text-bearing types this is usually
    /// empty — `upsert` externalizes large text by writing `plain_text`'s own
    /// bytes instead. For image/file types these are the bytes written to
    /// the external blob.
    pub raw_payload: Vec<u8>,
}
