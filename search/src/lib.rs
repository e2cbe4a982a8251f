//! In-memory fuzzy indices and the FTS/exact-match glue layered over a
//! [`clip_store::Store`]: the tiered search pipeline, the progressive
//! prefilter/refine orchestrator, and the reactive front end a UI binds to.

pub mod cache;
pub mod cancellation;
pub mod controller;
pub mod engine;
pub mod error;
pub mod fulltext;
pub mod fuzzy;
pub mod query;

pub use cancellation::CancellationToken;
pub use controller::{ControllerState, QueryController};
pub use engine::SearchEngine;
pub use error::{Result, SearchError};
pub use query::{SearchMode, SearchRequest, SearchResultPage, SortOrder};
