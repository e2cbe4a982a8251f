//! Orchestrates the tiered search pipeline: caching, the 5 s deadline +
//! cooperative cancellation, and the prefilter-then-refine state machine for
//! the fuzzy modes.

use crate::cache::{CountCacheKey, RecentItemsCache, TotalCountCache};
use crate::cancellation::CancellationToken;
use crate::error::SearchError;
use crate::fulltext::{self, Filters};
use crate::fuzzy::short::MAX_SHORT_QUERY_LEN;
use crate::fuzzy::{self, IndexSource, PostingIndex, ScoredCandidate, ShortFuzzyIndex};
use crate::query::{SearchMode, SearchRequest, SearchResultPage, SortOrder};
use clip_store::config::StoreConfig;
use clip_store::record::{ContentType, Record, RecordId};
use clip_store::Store;
use regex::Regex;
use std::cmp::Ordering;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const SEARCH_DEADLINE: Duration = Duration::from_secs(5);
const RECENT_CACHE_CAPACITY: usize = 2000;
const CACHE_TTL: Duration = Duration::from_secs(30);
/// "Large corpora only" threshold from the progressive-refinement rule;
/// below this, a full fuzzy build is cheap enough to run inline.
const LARGE_CORPUS_THRESHOLD: usize = 500;
const BUSY_RETRY_INITIAL: Duration = Duration::from_millis(10);
const BUSY_RETRY_CEILING: Duration = Duration::from_millis(500);
const BUSY_RETRY_ATTEMPTS: u32 = 8;
/// Shortest literal prefix worth narrowing a regex search by; shorter than
/// this, a substring scan barely prunes anything and isn't worth the round
/// trip.
const MIN_LITERAL_PREFIX_LEN: usize = 3;
/// Candidate cap for the LIKE-narrowed regex path. Large enough that real
/// corpora are rarely capped, but bounded so a near-universal prefix (a
/// single common word) can't degrade back into an effectively unbounded
/// scan.
const REGEX_PREFIX_CANDIDATE_CAP: u32 = 5_000;

#[derive(Default)]
struct FullIndexState {
    index: Option<PostingIndex>,
    source: Option<IndexSource>,
    /// `known_data_version` the in-memory index currently reflects.
    tracked_version: u64,
    building: bool,
}

/// Orchestrates `fulltext`/`fuzzy` against a [`Store`], with caching,
/// deadlines, and the progressive prefilter/refine state machine for fuzzy
/// searches over large corpora.
pub struct SearchEngine {
    store: Arc<Store>,
    config: StoreConfig,
    recent_cache: RecentItemsCache,
    count_cache: TotalCountCache,
    full_index: Arc<Mutex<FullIndexState>>,
    short_index: Mutex<Option<(ShortFuzzyIndex, u64)>>,
}

impl SearchEngine {
    pub fn open(store: Arc<Store>, config: StoreConfig) -> Self {
        Self {
            store,
            config,
            recent_cache: RecentItemsCache::new(RECENT_CACHE_CAPACITY, CACHE_TTL),
            count_cache: TotalCountCache::new(CACHE_TTL),
            full_index: Arc::new(Mutex::new(FullIndexState::default())),
            short_index: Mutex::new(None),
        }
    }

    /// Drops cached state. The engine has no threads to join: background
    /// index builds hold their own `Arc` clones and finish on their own.
    pub fn close(&self) {
        self.invalidate_cache();
    }

    pub fn invalidate_cache(&self) {
        self.recent_cache.invalidate();
        self.count_cache.invalidate();
    }

    /// Debug introspection, for tests: where the live full index came from.
    pub fn debug_index_source(&self) -> Option<IndexSource> {
        self.full_index.lock().unwrap().source
    }

    pub fn debug_tombstone_ratio(&self) -> Option<f64> {
        self.full_index.lock().unwrap().index.as_ref().map(|i| i.tombstone_ratio())
    }

    pub fn debug_is_building(&self) -> bool {
        self.full_index.lock().unwrap().building
    }

    /// Patches a freshly upserted record into any live in-memory index
    /// in-place, rather than waiting for the next rebuild.
    pub fn handle_record_upserted(&self, id: RecordId) {
        let Ok(Some(record)) = self.store.find_by_id(id) else {
            return;
        };
        let slot = fuzzy::slot_for(&record);
        let current_version = self.store.known_data_version();

        let mut full = self.full_index.lock().unwrap();
        if let Some(index) = full.index.as_mut() {
            index.insert(slot.clone());
            full.tracked_version = current_version;
        }
        drop(full);

        let mut short = self.short_index.lock().unwrap();
        if let Some((index, version)) = short.as_mut() {
            index.insert(slot);
            *version = current_version;
        }
        drop(short);

        self.invalidate_cache();
    }

    /// Tombstones a deleted record in any live index. `rebuild()` only
    /// recompacts already-in-memory slots (no database round trip), so the
    /// stale-ratio rebuild runs inline rather than on a worker thread.
    pub fn handle_record_deleted(&self, id: RecordId) {
        let current_version = self.store.known_data_version();

        let mut full = self.full_index.lock().unwrap();
        if let Some(index) = full.index.as_mut() {
            index.remove(id);
            if index.needs_rebuild() {
                index.rebuild();
            }
            full.tracked_version = current_version;
        }
        drop(full);

        let mut short = self.short_index.lock().unwrap();
        if let Some((index, version)) = short.as_mut() {
            index.remove(id);
            if index.needs_rebuild() {
                index.rebuild();
            }
            *version = current_version;
        }
        drop(short);

        self.invalidate_cache();
    }

    pub fn search(&self, request: &SearchRequest, cancel: &CancellationToken) -> Result<SearchResultPage, SearchError> {
        let start = Instant::now();
        self.check_deadline(start)?;

        if request.query.trim().is_empty() {
            return self.search_recent(request, start);
        }

        match request.mode {
            SearchMode::Regex => self.search_regex(request, cancel, start),
            SearchMode::Exact => self.search_exact(request, cancel, start),
            SearchMode::Fuzzy | SearchMode::FuzzyPlus => self.search_fuzzy_dispatch(request, cancel, start),
        }
    }

    fn check_deadline(&self, start: Instant) -> Result<(), SearchError> {
        if start.elapsed() > SEARCH_DEADLINE {
            Err(SearchError::Timeout)
        } else {
            Ok(())
        }
    }

    fn hydrate(&self, ids: &[RecordId]) -> Result<Vec<Record>, SearchError> {
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(record) = self.store.find_by_id(*id)? {
                out.push(record);
            }
        }
        Ok(out)
    }

    // ---- empty-query path: recent-items cache ----

    fn search_recent(&self, request: &SearchRequest, start: Instant) -> Result<SearchResultPage, SearchError> {
        let data_version = self.store.known_data_version();
        let limit = request.clamped_limit() as usize;
        let offset = request.offset as usize;
        let has_filters = request.app_filter.is_some() || request.type_filter.is_some();

        let (candidates, total) = if has_filters {
            let all = self.store.all_records()?;
            let mut filtered: Vec<Record> = all
                .into_iter()
                .filter(|r| record_matches_filters(r, &request.app_filter, request.type_filter))
                .collect();
            sort_records_recent(&mut filtered);
            let total = filtered.len() as i64;
            (filtered, total)
        } else if offset + limit <= RECENT_CACHE_CAPACITY {
            let records = match self.recent_cache.get(data_version) {
                Some(cached) => cached,
                None => {
                    let fetched = self.store.fetch_recent(RECENT_CACHE_CAPACITY as u32, 0)?;
                    self.recent_cache.set(fetched.clone(), data_version);
                    fetched
                }
            };
            (records, self.store.count()?)
        } else {
            let fetched = self.store.fetch_recent((offset + limit) as u32, 0)?;
            (fetched, self.store.count()?)
        };

        let page: Vec<Record> = candidates.into_iter().skip(offset).take(limit).collect();
        let has_more = (offset + page.len()) < total as usize;
        Ok(SearchResultPage {
            items: page,
            total,
            has_more,
            is_prefilter: false,
            elapsed_ms: elapsed_ms(start),
        })
    }

    // ---- exact/BM25 + LIKE fallback ----

    fn search_exact(&self, request: &SearchRequest, _cancel: &CancellationToken, start: Instant) -> Result<SearchResultPage, SearchError> {
        let conn = self.store.open_reader()?;
        let filters = Filters {
            app_bundle_id: request.app_filter.clone(),
            content_type: request.type_filter,
        };
        let limit = request.clamped_limit();

        let mut ids = retry_on_busy(|| fulltext::search_fts(&conn, &request.query, request.sort, &filters, limit, request.offset))?;
        let mut used_like = false;
        if ids.is_empty() {
            ids = retry_on_busy(|| fulltext::search_like(&conn, &request.query, request.sort, &filters, limit, request.offset))?;
            used_like = true;
        }
        self.check_deadline(start)?;

        let key = CountCacheKey {
            query: request.query.clone(),
            app_filter: request.app_filter.clone(),
            type_filter: request.type_filter,
        };
        let data_version = self.store.known_data_version();
        let total = match self.count_cache.get(&key, data_version) {
            Some(t) => t,
            None => {
                let t = if used_like {
                    retry_on_busy(|| fulltext::count_like(&conn, &request.query, &filters))?
                } else {
                    retry_on_busy(|| fulltext::count_fts(&conn, &request.query, &filters))?
                };
                self.count_cache.set(key, t, data_version);
                t
            }
        };

        let items = self.hydrate(&ids)?;
        let has_more = (request.offset as i64 + items.len() as i64) < total;
        Ok(SearchResultPage {
            items,
            total,
            has_more,
            is_prefilter: false,
            elapsed_ms: elapsed_ms(start),
        })
    }

    // ---- regex: FTS/LIKE-narrowed when the pattern has a literal prefix,
    // else a recent-items scan bounded by limit+offset ----

    fn search_regex(&self, request: &SearchRequest, cancel: &CancellationToken, start: Instant) -> Result<SearchResultPage, SearchError> {
        let re = Regex::new(&request.query).map_err(|e| SearchError::InvalidQuery(e.to_string()))?;
        self.check_deadline(start)?;

        let offset = request.offset as usize;
        let limit = request.clamped_limit() as usize;

        let candidates = match literal_prefix(&request.query) {
            Some(prefix) => {
                let conn = self.store.open_reader()?;
                let filters = Filters {
                    app_bundle_id: request.app_filter.clone(),
                    content_type: request.type_filter,
                };
                let ids = retry_on_busy(|| {
                    fulltext::search_like(&conn, &prefix, SortOrder::Recent, &filters, REGEX_PREFIX_CANDIDATE_CAP, 0)
                })?;
                self.hydrate(&ids)?
            }
            None => self.store.fetch_recent((offset + limit) as u32, 0)?,
        };

        let mut matched: Vec<Record> = Vec::new();
        for (i, record) in candidates.into_iter().enumerate() {
            if i % crate::cancellation::CANCELLATION_CHECK_INTERVAL == 0 {
                self.check_deadline(start)?;
                if cancel.is_cancelled() {
                    return Err(SearchError::Cancelled);
                }
            }
            if !record_matches_filters(&record, &request.app_filter, request.type_filter) {
                continue;
            }
            let text_matches = re.is_match(&record.plain_text)
                || record.note.as_deref().map(|n| re.is_match(n)).unwrap_or(false);
            if text_matches {
                matched.push(record);
            }
        }

        sort_records_recent(&mut matched);
        let total = matched.len() as i64;
        let page: Vec<Record> = matched.into_iter().skip(offset).take(limit).collect();
        let has_more = (offset + page.len()) < total as usize;
        Ok(SearchResultPage {
            items: page,
            total,
            has_more,
            is_prefilter: false,
            elapsed_ms: elapsed_ms(start),
        })
    }

    // ---- fuzzy / fuzzy_plus ----

    fn search_fuzzy_dispatch(&self, request: &SearchRequest, cancel: &CancellationToken, start: Instant) -> Result<SearchResultPage, SearchError> {
        self.check_deadline(start)?;

        if request.query.chars().count() <= MAX_SHORT_QUERY_LEN {
            return self.search_fuzzy_short(request, cancel, start);
        }

        let total_records = self.store.count()? as usize;
        let large_corpus = total_records > LARGE_CORPUS_THRESHOLD;

        if large_corpus && request.offset == 0 && !request.force_full_fuzzy {
            return self.search_fuzzy_prefilter(request, start);
        }

        self.search_fuzzy_full(request, cancel, start)
    }

    fn search_fuzzy_short(&self, request: &SearchRequest, cancel: &CancellationToken, start: Instant) -> Result<SearchResultPage, SearchError> {
        self.ensure_short_index()?;
        let candidates = {
            let guard = self.short_index.lock().unwrap();
            let (index, _) = guard.as_ref().expect("ensure_short_index just populated this");
            index.search(&request.query, cancel)
        };
        if cancel.is_cancelled() {
            return Err(SearchError::Cancelled);
        }
        self.assemble_page(candidates, request, start, false)
    }

    fn ensure_short_index(&self) -> Result<(), SearchError> {
        let current_version = self.store.known_data_version();
        {
            let guard = self.short_index.lock().unwrap();
            if let Some((_, v)) = guard.as_ref() {
                if *v == current_version {
                    return Ok(());
                }
            }
        }
        let records = self.store.all_records()?;
        let slots = fuzzy::slots_from_records(records.iter());
        let index = ShortFuzzyIndex::from_slots(slots);
        *self.short_index.lock().unwrap() = Some((index, current_version));
        Ok(())
    }

    /// Fast FTS-based candidate page with `total = -1`; kicks off (or
    /// reuses) a background full-index build for the authoritative follow-up.
    fn search_fuzzy_prefilter(&self, request: &SearchRequest, start: Instant) -> Result<SearchResultPage, SearchError> {
        let conn = self.store.open_reader()?;
        let filters = Filters {
            app_bundle_id: request.app_filter.clone(),
            content_type: request.type_filter,
        };
        let limit = request.clamped_limit();

        let mut ids = retry_on_busy(|| fulltext::search_fts(&conn, &request.query, request.sort, &filters, limit, 0))?;
        if ids.is_empty() {
            ids = retry_on_busy(|| fulltext::search_like(&conn, &request.query, request.sort, &filters, limit, 0))?;
        }
        let items = self.hydrate(&ids)?;

        self.spawn_background_full_index_build();

        Ok(SearchResultPage {
            items,
            total: -1,
            has_more: true,
            is_prefilter: true,
            elapsed_ms: elapsed_ms(start),
        })
    }

    fn spawn_background_full_index_build(&self) {
        {
            let mut state = self.full_index.lock().unwrap();
            if state.building {
                return;
            }
            state.building = true;
        }

        let store = Arc::clone(&self.store);
        let full_index = Arc::clone(&self.full_index);
        let snapshot_path = self.config.fullindex_path();
        let checksum_path = self.config.fullindex_checksum_path();

        std::thread::spawn(move || {
            let target_version = store.known_data_version();
            let result = store.all_records();
            let mut state = full_index.lock().unwrap();
            state.building = false;
            match result {
                Ok(records) => {
                    let (index, source) = fuzzy::acquire_full_index(&snapshot_path, &checksum_path, &records);
                    state.index = Some(index);
                    state.source = Some(source);
                    state.tracked_version = target_version;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "background fuzzy index build failed; serving last good index");
                }
            }
        });
    }

    fn search_fuzzy_full(&self, request: &SearchRequest, cancel: &CancellationToken, start: Instant) -> Result<SearchResultPage, SearchError> {
        self.ensure_full_index_sync(cancel, start)?;

        let candidates = {
            let guard = self.full_index.lock().unwrap();
            let index = guard
                .index
                .as_ref()
                .ok_or_else(|| SearchError::ExternalIo("fuzzy index unavailable".to_string()))?;
            match request.mode {
                SearchMode::FuzzyPlus => index.search_fuzzy_plus(&request.query, cancel),
                _ => index.search_fuzzy(&request.query, cancel),
            }
        };
        if cancel.is_cancelled() {
            return Err(SearchError::Cancelled);
        }
        self.assemble_page(candidates, request, start, false)
    }

    /// Loads (or rebuilds) the full index synchronously, blocking the caller.
    /// Used when authoritative results are required now: `force_full_fuzzy`
    /// follow-ups and small corpora that never go through the prefilter path.
    fn ensure_full_index_sync(&self, cancel: &CancellationToken, start: Instant) -> Result<(), SearchError> {
        self.check_deadline(start)?;
        let current_version = self.store.known_data_version();
        {
            let state = self.full_index.lock().unwrap();
            if state.index.is_some() && state.tracked_version == current_version {
                return Ok(());
            }
        }
        if cancel.is_cancelled() {
            return Err(SearchError::Cancelled);
        }

        let records = self.store.all_records()?;
        self.check_deadline(start)?;
        let (index, source) = fuzzy::acquire_full_index(&self.config.fullindex_path(), &self.config.fullindex_checksum_path(), &records);

        let mut state = self.full_index.lock().unwrap();
        state.index = Some(index);
        state.source = Some(source);
        state.tracked_version = current_version;
        Ok(())
    }

    fn assemble_page(
        &self,
        mut candidates: Vec<ScoredCandidate>,
        request: &SearchRequest,
        start: Instant,
        is_prefilter: bool,
    ) -> Result<SearchResultPage, SearchError> {
        sort_candidates(&mut candidates, request.sort);

        let offset = request.offset as usize;
        let limit = request.clamped_limit() as usize;
        let page_ids: Vec<RecordId> = candidates.iter().skip(offset).take(limit).map(|c| c.record_id).collect();
        let items = self.hydrate(&page_ids)?;
        let has_more = (offset + items.len()) < candidates.len();

        Ok(SearchResultPage {
            items,
            total: if is_prefilter { -1 } else { candidates.len() as i64 },
            has_more,
            is_prefilter,
            elapsed_ms: elapsed_ms(start),
        })
    }
}

/// Extracts a leading run of literal characters from a regex pattern, for
/// narrowing through a substring scan before the full match. Conservative by
/// design: it only accepts alphanumerics/spaces/underscores as literal and
/// stops at the first character that could be a regex metacharacter or an
/// escape, so it may return a shorter prefix than is theoretically safe but
/// never an incorrect one. Returns `None` below `MIN_LITERAL_PREFIX_LEN`.
fn literal_prefix(pattern: &str) -> Option<String> {
    let body = pattern.strip_prefix('^').unwrap_or(pattern);
    let prefix: String = body
        .chars()
        .take_while(|c| c.is_alphanumeric() || *c == ' ' || *c == '_')
        .collect();

    if prefix.chars().count() >= MIN_LITERAL_PREFIX_LEN {
        Some(prefix)
    } else {
        None
    }
}

fn record_matches_filters(record: &Record, app_filter: &Option<String>, type_filter: Option<ContentType>) -> bool {
    if let Some(app) = app_filter {
        if record.app_bundle_id.as_deref() != Some(app.as_str()) {
            return false;
        }
    }
    if let Some(kind) = type_filter {
        if record.kind != kind {
            return false;
        }
    }
    true
}

/// Pinned first, then `last_used_at DESC, id ASC` — the same tie-break
/// `fetch_recent`'s SQL uses, applied to an in-memory list.
fn sort_records_recent(records: &mut [Record]) {
    records.sort_by(|a, b| {
        b.is_pinned
            .cmp(&a.is_pinned)
            .then_with(|| b.last_used_at.cmp(&a.last_used_at))
            .then_with(|| a.id.cmp(&b.id))
    });
}

/// Pinned first; within each pin-class, `relevance` orders by score then
/// recency then id, `recent` ignores score entirely.
fn sort_candidates(candidates: &mut [ScoredCandidate], sort: SortOrder) {
    candidates.sort_by(|a, b| {
        b.is_pinned.cmp(&a.is_pinned).then_with(|| match sort {
            SortOrder::Relevance => b
                .score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| b.last_used_at.cmp(&a.last_used_at))
                .then_with(|| a.record_id.cmp(&b.record_id)),
            SortOrder::Recent => b.last_used_at.cmp(&a.last_used_at).then_with(|| a.record_id.cmp(&b.record_id)),
        })
    });
}

/// Retries a storage-busy classified operation with bounded exponential
/// backoff (10 ms doubling up to ~500 ms), matching `storage_busy`'s
/// documented retry policy.
fn retry_on_busy<T>(mut f: impl FnMut() -> Result<T, SearchError>) -> Result<T, SearchError> {
    let mut backoff = BUSY_RETRY_INITIAL;
    for attempt in 0..BUSY_RETRY_ATTEMPTS {
        match f() {
            Ok(v) => return Ok(v),
            Err(SearchError::StorageBusy) if attempt + 1 < BUSY_RETRY_ATTEMPTS => {
                std::thread::sleep(backoff);
                backoff = (backoff * 2).min(BUSY_RETRY_CEILING);
            }
            Err(e) => return Err(e),
        }
    }
    f()
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}
