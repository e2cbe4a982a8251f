//! Reactive front end: a single-threaded cooperative component that owns
//! the observable search state the UI binds to, debouncing keystrokes and
//! driving the prefilter/refine pipeline against a [`SearchEngine`].

use crate::cancellation::CancellationToken;
use crate::engine::SearchEngine;
use crate::error::SearchError;
use crate::query::{SearchMode, SearchRequest, SortOrder};
use clip_store::record::{ContentType, Record, RecordId};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::time::Duration;

const DEBOUNCE_INTERVAL: Duration = Duration::from_millis(150);
const PAGE_SIZE: u32 = 50;

enum ControllerMessage {
    Debounced(u64),
}

/// Observable state a UI binds to. Mutated only on the thread that calls
/// into [`QueryController`] — the debounce timer thread only posts a
/// message, it never touches this directly.
#[derive(Debug, Clone, Default)]
pub struct ControllerState {
    pub items: Vec<Record>,
    pub query: String,
    pub mode: SearchMode,
    pub sort: SortOrder,
    pub loading: bool,
    pub selected_id: Option<RecordId>,
    pub loaded_count: u32,
    pub total_count: i64,
    pub can_load_more: bool,
    pub last_error: Option<String>,
}

pub struct QueryController {
    engine: Arc<SearchEngine>,
    state: ControllerState,
    search_version: AtomicU64,
    debounce_generation: Arc<AtomicU64>,
    debounce_interval: Duration,
    debounce_tx: Sender<ControllerMessage>,
    debounce_rx: Receiver<ControllerMessage>,
    active_cancel: Option<CancellationToken>,
    is_prefiltered: bool,
}

impl QueryController {
    pub fn new(engine: Arc<SearchEngine>) -> Self {
        Self::with_debounce(engine, DEBOUNCE_INTERVAL)
    }

    /// `debounce = Duration::ZERO` is the test-mode shortcut named in
    /// spec.md §4.5.
    pub fn with_debounce(engine: Arc<SearchEngine>, debounce_interval: Duration) -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            engine,
            state: ControllerState::default(),
            search_version: AtomicU64::new(0),
            debounce_generation: Arc::new(AtomicU64::new(0)),
            debounce_interval,
            debounce_tx: tx,
            debounce_rx: rx,
            active_cancel: None,
            is_prefiltered: false,
        }
    }

    pub fn state(&self) -> &ControllerState {
        &self.state
    }

    /// Sets the query and schedules a debounced search. Any prior pending
    /// timer becomes a no-op (its generation no longer matches).
    pub fn set_query(&mut self, query: impl Into<String>) {
        self.state.query = query.into();
        self.state.loading = true;

        let generation = self.debounce_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let tx = self.debounce_tx.clone();
        let interval = self.debounce_interval;
        let own_generation = Arc::clone(&self.debounce_generation);

        std::thread::spawn(move || {
            if !interval.is_zero() {
                std::thread::sleep(interval);
            }
            if own_generation.load(Ordering::SeqCst) == generation {
                let _ = tx.send(ControllerMessage::Debounced(generation));
            }
        });
    }

    /// Drains any debounce messages that have arrived and commits the
    /// corresponding search. Stale messages (superseded by a later
    /// keystroke) are dropped without running a search.
    pub fn tick(&mut self) {
        while let Ok(ControllerMessage::Debounced(generation)) = self.debounce_rx.try_recv() {
            if self.debounce_generation.load(Ordering::SeqCst) == generation {
                self.run_committed_search();
            }
        }
    }

    fn run_committed_search(&mut self) {
        let version = self.search_version.fetch_add(1, Ordering::SeqCst) + 1;
        let cancel = CancellationToken::new();
        self.active_cancel = Some(cancel.clone());

        if self.state.query.trim().is_empty() {
            self.commit_recent(version, &cancel);
            return;
        }

        let request = SearchRequest {
            query: self.state.query.clone(),
            mode: self.state.mode,
            sort: self.state.sort,
            app_filter: None,
            type_filter: None,
            force_full_fuzzy: false,
            limit: PAGE_SIZE,
            offset: 0,
        };
        self.run_search_and_commit(request, version, &cancel);
    }

    fn commit_recent(&mut self, version: u64, cancel: &CancellationToken) {
        let request = SearchRequest {
            query: String::new(),
            mode: self.state.mode,
            sort: self.state.sort,
            app_filter: None,
            type_filter: None,
            force_full_fuzzy: false,
            limit: PAGE_SIZE,
            offset: 0,
        };
        self.run_search_and_commit(request, version, cancel);
    }

    fn run_search_and_commit(&mut self, request: SearchRequest, version: u64, cancel: &CancellationToken) {
        if self.search_version.load(Ordering::SeqCst) != version {
            return;
        }
        match self.engine.search(&request, cancel) {
            Ok(page) => {
                if self.search_version.load(Ordering::SeqCst) != version {
                    return;
                }
                self.is_prefiltered = page.is_prefilter;
                self.state.items = page.items;
                self.state.loaded_count = self.state.items.len() as u32;
                self.state.total_count = page.total;
                self.state.can_load_more = page.has_more;
                self.state.loading = page.is_prefilter;
                self.state.last_error = None;
                self.reconcile_selection();

                if page.is_prefilter {
                    let mut refine = request;
                    refine.force_full_fuzzy = true;
                    self.run_search_and_commit(refine, version, cancel);
                }
            }
            Err(SearchError::Cancelled) => {}
            Err(e) => {
                self.state.loading = false;
                self.state.last_error = Some(e.to_string());
            }
        }
    }

    /// Only valid when `can_load_more && !loading`. When the current page
    /// came from a prefilter, pagination must re-run a full fuzzy search
    /// over `0..loaded+page_size`, not just fetch the next slice, so the
    /// appended items share the authoritative ordering.
    pub fn load_more(&mut self) {
        if !self.state.can_load_more || self.state.loading {
            return;
        }
        let version = self.search_version.load(Ordering::SeqCst);
        let cancel = self.active_cancel.clone().unwrap_or_default();

        let force_full_fuzzy = self.is_prefiltered
            && matches!(self.state.mode, SearchMode::Fuzzy | SearchMode::FuzzyPlus);

        let (offset, limit) = if force_full_fuzzy {
            (0, self.state.loaded_count + PAGE_SIZE)
        } else {
            (self.state.loaded_count, PAGE_SIZE)
        };

        let request = SearchRequest {
            query: self.state.query.clone(),
            mode: self.state.mode,
            sort: self.state.sort,
            app_filter: None,
            type_filter: None,
            force_full_fuzzy,
            limit,
            offset,
        };

        self.state.loading = true;
        match self.engine.search(&request, &cancel) {
            Ok(page) if self.search_version.load(Ordering::SeqCst) == version => {
                self.is_prefiltered = page.is_prefilter;
                if force_full_fuzzy {
                    self.state.items = page.items;
                } else {
                    self.state.items.extend(page.items);
                }
                self.state.loaded_count = self.state.items.len() as u32;
                self.state.total_count = page.total;
                self.state.can_load_more = page.has_more;
                self.state.loading = false;
                self.reconcile_selection();
            }
            Ok(_) => {}
            Err(SearchError::Cancelled) => {
                self.state.loading = false;
            }
            Err(e) => {
                self.state.loading = false;
                self.state.last_error = Some(e.to_string());
            }
        }
    }

    /// If the selected id fell out of the committed list (e.g. it was
    /// deleted), falls back to the first item, or clears selection if the
    /// list is empty.
    fn reconcile_selection(&mut self) {
        if self.state.items.is_empty() {
            self.state.selected_id = None;
            return;
        }
        if let Some(id) = self.state.selected_id {
            if self.state.items.iter().any(|r| r.id == id) {
                return;
            }
        }
        self.state.selected_id = Some(self.state.items[0].id);
    }

    /// `next` with no/absent selection jumps to the first item; wraps from
    /// the last item back to the first. Empty list is a no-op.
    pub fn highlight_next(&mut self) {
        self.highlight(1);
    }

    /// `previous` with no/absent selection jumps to the last item; wraps
    /// from the first item back to the last. Empty list is a no-op.
    pub fn highlight_previous(&mut self) {
        self.highlight(-1);
    }

    fn highlight(&mut self, direction: i32) {
        if self.state.items.is_empty() {
            return;
        }
        let current_index = self
            .state
            .selected_id
            .and_then(|id| self.state.items.iter().position(|r| r.id == id));

        let next_index = match (current_index, direction) {
            (None, 1) => 0,
            (None, -1) => self.state.items.len() - 1,
            (Some(i), 1) => (i + 1) % self.state.items.len(),
            (Some(i), -1) => (i + self.state.items.len() - 1) % self.state.items.len(),
            _ => unreachable!(),
        };
        self.state.selected_id = Some(self.state.items[next_index].id);
    }

    /// Call after `Store::delete` for the currently selected item: moves
    /// selection to the item that took its place, the previous item if it
    /// was last, or clears selection if the list is now empty.
    pub fn handle_item_removed_from_list(&mut self, removed_index: usize) {
        if self.state.items.is_empty() {
            self.state.selected_id = None;
        } else {
            let fallback = removed_index.min(self.state.items.len() - 1);
            self.state.selected_id = Some(self.state.items[fallback].id);
        }
    }

    pub fn set_type_filter(&mut self, _type_filter: Option<ContentType>) {
        self.set_query(self.state.query.clone());
    }
}
