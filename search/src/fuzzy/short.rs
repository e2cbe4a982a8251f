//! Specialized index for 1-2 character queries: direct character-posting
//! intersection instead of the full charset-gated subsequence scan, always
//! run against the full (never prefiltered) history.

use crate::cancellation::CancellationToken;
use crate::fuzzy::posting::{PostingIndex, ScoredCandidate};
use crate::fuzzy::slot::Slot;
use clip_store::record::RecordId;
use std::collections::HashSet;

/// Short-query searches are never meaningfully narrowed by a prefilter, so
/// this only accepts queries at or below this length.
pub const MAX_SHORT_QUERY_LEN: usize = 2;

#[derive(Default)]
pub struct ShortFuzzyIndex {
    inner: PostingIndex,
}

impl ShortFuzzyIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_slots(slots: Vec<Slot>) -> Self {
        Self {
            inner: PostingIndex::from_slots(slots),
        }
    }

    pub fn insert(&mut self, slot: Slot) {
        self.inner.insert(slot);
    }

    pub fn remove(&mut self, record_id: RecordId) {
        self.inner.remove(record_id);
    }

    pub fn needs_rebuild(&self) -> bool {
        self.inner.needs_rebuild()
    }

    pub fn rebuild(&mut self) {
        self.inner.rebuild();
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn inner(&self) -> &PostingIndex {
        &self.inner
    }

    /// Intersects the posting lists of `query`'s distinct characters
    /// directly, then confirms order with the shared subsequence check.
    pub fn search(&self, query: &str, cancel: &CancellationToken) -> Vec<ScoredCandidate> {
        let query = query.to_lowercase();
        debug_assert!(query.chars().count() <= MAX_SHORT_QUERY_LEN);

        let mut chars = query.chars();
        let Some(first) = chars.next() else {
            return Vec::new();
        };

        let mut candidates: HashSet<u32> = self
            .inner
            .posting_list(first)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .collect();

        for c in chars {
            let list: HashSet<u32> = self
                .inner
                .posting_list(c)
                .cloned()
                .unwrap_or_default()
                .into_iter()
                .collect();
            candidates = candidates.intersection(&list).copied().collect();
        }

        let mut out = Vec::new();
        for idx in candidates {
            if cancel.is_cancelled() {
                return Vec::new();
            }
            let Some(slot) = self.inner.slot_at(idx) else {
                continue;
            };
            if let Some((first_pos, gap_count)) =
                crate::fuzzy::posting::subsequence_match(&slot.haystack, &query)
            {
                let mut score = 1.0 / (1.0 + gap_count as f64);
                if first_pos == 0 {
                    score += 0.1;
                }
                out.push(ScoredCandidate {
                    record_id: slot.record_id,
                    score,
                    is_pinned: slot.is_pinned,
                    last_used_at: slot.last_used_at,
                });
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::SystemTime;

    fn slot(text: &str) -> Slot {
        Slot::new(RecordId::new(), text, None, SystemTime::now(), false)
    }

    #[test]
    fn intersects_postings_for_both_characters() {
        let mut index = ShortFuzzyIndex::new();
        let target = slot("zz_target_oldest");
        let target_id = target.record_id;
        index.insert(target);
        index.insert(slot("nothing relevant"));
        let cancel = CancellationToken::new();
        let results = index.search("zz", &cancel);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].record_id, target_id);
    }

    #[test]
    fn single_character_query_matches_any_containing_slot() {
        let mut index = ShortFuzzyIndex::new();
        index.insert(slot("alpha"));
        index.insert(slot("beta"));
        let cancel = CancellationToken::new();
        assert_eq!(index.search("a", &cancel).len(), 2);
    }
}
