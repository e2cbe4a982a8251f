//! Request/response shapes for a single search.

use clip_store::record::{ContentType, Record};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchMode {
    Exact,
    #[default]
    Fuzzy,
    FuzzyPlus,
    Regex,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    Recent,
    #[default]
    Relevance,
}

#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub query: String,
    pub mode: SearchMode,
    pub sort: SortOrder,
    pub app_filter: Option<String>,
    pub type_filter: Option<ContentType>,
    pub force_full_fuzzy: bool,
    pub limit: u32,
    pub offset: u32,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            mode: SearchMode::Fuzzy,
            sort: SortOrder::Relevance,
            app_filter: None,
            type_filter: None,
            force_full_fuzzy: false,
            limit: 50,
            offset: 0,
        }
    }

    /// Input constraint from the search API contract: `limit` must be
    /// clamped to `[1, 500]`.
    pub fn clamped_limit(&self) -> u32 {
        self.limit.clamp(1, 500)
    }
}

/// A page of search results. `total = -1` means "unknown; caller should
/// refine" — the marker used by progressive prefilter pages.
#[derive(Debug, Clone)]
pub struct SearchResultPage {
    pub items: Vec<Record>,
    pub total: i64,
    pub has_more: bool,
    pub is_prefilter: bool,
    pub elapsed_ms: f64,
}

impl SearchResultPage {
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            total: 0,
            has_more: false,
            is_prefilter: false,
            elapsed_ms: 0.0,
        }
    }
}
