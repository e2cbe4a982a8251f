//! The character-posting inverted index and the subsequence-based scoring
//! used by both fuzzy variants.

use crate::cancellation::{CancellationToken, CANCELLATION_CHECK_INTERVAL};
use crate::fuzzy::slot::{CharsetBitmap, Slot};
use clip_store::record::RecordId;
use std::collections::HashMap;
use std::time::SystemTime;

const LEFT_ANCHOR_BONUS: f64 = 0.1;
const ORDER_BONUS: f64 = 0.15;

/// A scored candidate before hydration from `Store`.
#[derive(Debug, Clone)]
pub struct ScoredCandidate {
    pub record_id: RecordId,
    pub score: f64,
    pub is_pinned: bool,
    pub last_used_at: SystemTime,
}

/// In-memory inverted index over a slot arena. Deleted slots are tombstoned
/// (set to `None`) rather than removed immediately, so live indices don't
/// need to shift postings on every delete; a rebuild compacts them once the
/// tombstone ratio crosses the threshold.
#[derive(Default)]
pub struct PostingIndex {
    slots: Vec<Option<Slot>>,
    postings: HashMap<char, Vec<u32>>,
    by_record: HashMap<RecordId, u32>,
    tombstones: usize,
}

impl PostingIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_slots(slots: Vec<Slot>) -> Self {
        let mut index = Self::new();
        for slot in slots {
            index.insert(slot);
        }
        index
    }

    pub fn len(&self) -> usize {
        self.slots.len() - self.tombstones
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn tombstone_ratio(&self) -> f64 {
        if self.slots.is_empty() {
            0.0
        } else {
            self.tombstones as f64 / self.slots.len() as f64
        }
    }

    /// When tombstones exceed ~25% of slots, a background rebuild should be
    /// scheduled (the caller drives this; the index only reports the need).
    pub fn needs_rebuild(&self) -> bool {
        self.tombstone_ratio() > 0.25
    }

    /// Appends a new slot, or updates it in place if the record is already
    /// present (re-indexing on content change).
    pub fn insert(&mut self, slot: Slot) {
        if let Some(&idx) = self.by_record.get(&slot.record_id) {
            self.remove_postings_for(idx as usize);
            self.index_postings(idx, &slot);
            self.slots[idx as usize] = Some(slot);
            return;
        }

        let idx = self.slots.len() as u32;
        self.index_postings(idx, &slot);
        self.by_record.insert(slot.record_id, idx);
        self.slots.push(Some(slot));
    }

    /// Tombstones the slot for `record_id`, if present.
    pub fn remove(&mut self, record_id: RecordId) {
        if let Some(idx) = self.by_record.remove(&record_id) {
            self.remove_postings_for(idx as usize);
            self.slots[idx as usize] = None;
            self.tombstones += 1;
        }
    }

    pub fn contains(&self, record_id: RecordId) -> bool {
        self.by_record.contains_key(&record_id)
    }

    /// Compacts tombstoned slots, reassigning slot indices and rebuilding
    /// postings from scratch. Posting sets after a rebuild are identical to
    /// a fresh `from_slots` build modulo slot numbering.
    pub fn rebuild(&mut self) {
        let live: Vec<Slot> = self.slots.drain(..).flatten().collect();
        *self = Self::from_slots(live);
    }

    /// All live slots, for persisting a snapshot.
    pub fn live_slots(&self) -> impl Iterator<Item = &Slot> {
        self.slots.iter().flatten()
    }

    /// The raw posting table, for snapshot serialization.
    pub fn postings(&self) -> &HashMap<char, Vec<u32>> {
        &self.postings
    }

    pub(crate) fn posting_list(&self, c: char) -> Option<&Vec<u32>> {
        self.postings.get(&c)
    }

    pub(crate) fn slot_at(&self, idx: u32) -> Option<&Slot> {
        self.slots.get(idx as usize).and_then(|s| s.as_ref())
    }

    fn index_postings(&mut self, idx: u32, slot: &Slot) {
        let mut seen = std::collections::HashSet::new();
        for c in slot.haystack.chars() {
            if seen.insert(c) {
                self.postings.entry(c).or_default().push(idx);
            }
        }
    }

    fn remove_postings_for(&mut self, idx: usize) {
        for list in self.postings.values_mut() {
            list.retain(|&i| i as usize != idx);
        }
    }

    /// Candidate gating: slots whose charset is a superset of the query's,
    /// intersected via the posting list of the query's rarest character.
    fn candidate_indices(&self, query: &str) -> Vec<u32> {
        let query_charset = CharsetBitmap::from_str(query);
        let Some(first_char) = query.chars().next() else {
            return Vec::new();
        };

        let seed: Vec<u32> = self
            .postings
            .get(&first_char)
            .cloned()
            .unwrap_or_default();

        seed.into_iter()
            .filter(|&idx| {
                self.slots
                    .get(idx as usize)
                    .and_then(|s| s.as_ref())
                    .map(|s| s.charset.is_superset_of(&query_charset))
                    .unwrap_or(false)
            })
            .collect()
    }

    /// "Subsequence-in-order" fuzzy match: `query`'s lowercased characters
    /// must appear in a candidate's haystack in order, not necessarily
    /// contiguous.
    pub fn search_fuzzy(&self, query: &str, cancel: &CancellationToken) -> Vec<ScoredCandidate> {
        let query = query.to_lowercase();
        let mut out = Vec::new();

        for (checked, idx) in self.candidate_indices(&query).into_iter().enumerate() {
            if checked % CANCELLATION_CHECK_INTERVAL == 0 && cancel.is_cancelled() {
                return Vec::new();
            }
            let Some(slot) = self.slots[idx as usize].as_ref() else {
                continue;
            };
            if let Some((first_pos, gap_count)) = subsequence_match(&slot.haystack, &query) {
                let mut score = 1.0 / (1.0 + gap_count as f64);
                if first_pos == 0 {
                    score += LEFT_ANCHOR_BONUS;
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

    /// Whitespace-tokenized variant: every token must independently match
    /// by subsequence; score is the mean of token scores, with a bonus when
    /// tokens' first matches appear in left-to-right order.
    pub fn search_fuzzy_plus(&self, query: &str, cancel: &CancellationToken) -> Vec<ScoredCandidate> {
        let query = query.to_lowercase();
        let tokens: Vec<&str> = query.split_whitespace().collect();
        if tokens.is_empty() {
            return Vec::new();
        }

        // Gate candidates on the rarest token's leading character, then
        // verify all tokens against the full haystack.
        let candidates = self.candidate_indices(tokens[0]);
        let mut out = Vec::new();

        for (checked, idx) in candidates.into_iter().enumerate() {
            if checked % CANCELLATION_CHECK_INTERVAL == 0 && cancel.is_cancelled() {
                return Vec::new();
            }
            let Some(slot) = self.slots[idx as usize].as_ref() else {
                continue;
            };

            let mut token_scores = Vec::with_capacity(tokens.len());
            let mut positions = Vec::with_capacity(tokens.len());
            let mut all_matched = true;

            for token in &tokens {
                match subsequence_match(&slot.haystack, token) {
                    Some((pos, gap_count)) => {
                        token_scores.push(1.0 / (1.0 + gap_count as f64));
                        positions.push(pos);
                    }
                    None => {
                        all_matched = false;
                        break;
                    }
                }
            }

            if !all_matched {
                continue;
            }

            let mean: f64 = token_scores.iter().sum::<f64>() / token_scores.len() as f64;
            let ordered = positions.windows(2).all(|w| w[0] <= w[1]);
            let score = if ordered { mean + ORDER_BONUS } else { mean };

            out.push(ScoredCandidate {
                record_id: slot.record_id,
                score,
                is_pinned: slot.is_pinned,
                last_used_at: slot.last_used_at,
            });
        }
        out
    }
}

/// Finds `needle`'s characters in `haystack` in order. Returns the index of
/// the first match and the total count of skipped characters between
/// consecutive matches ("gaps"), or `None` if `needle` doesn't fully match.
pub(crate) fn subsequence_match(haystack: &str, needle: &str) -> Option<(usize, usize)> {
    if needle.is_empty() {
        return None;
    }

    let hay: Vec<char> = haystack.chars().collect();
    let mut hi = 0;
    let mut first_match = None;
    let mut last_match: Option<usize> = None;
    let mut gap_count = 0;

    for nc in needle.chars() {
        let mut found = None;
        while hi < hay.len() {
            if hay[hi] == nc {
                found = Some(hi);
                break;
            }
            hi += 1;
        }
        let pos = found?;
        if first_match.is_none() {
            first_match = Some(pos);
        }
        if let Some(last) = last_match {
            gap_count += pos - last - 1;
        }
        last_match = Some(pos);
        hi = pos + 1;
    }

    Some((first_match.unwrap(), gap_count))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clip_store::record::RecordId;

    fn slot(text: &str) -> Slot {
        Slot::new(RecordId::new(), text, None, SystemTime::now(), false)
    }

    mod subsequence_match {
        use super::*;

        #[test]
        fn contiguous_match_has_zero_gaps() {
            let (pos, gaps) = subsequence_match("hello world", "hello").unwrap();
            assert_eq!(pos, 0);
            assert_eq!(gaps, 0);
        }

        #[test]
        fn scattered_match_counts_gaps() {
            let (pos, gaps) = subsequence_match("hello world", "hwd").unwrap();
            assert_eq!(pos, 0);
            assert!(gaps > 0);
        }

        #[test]
        fn missing_character_fails() {
            assert!(subsequence_match("hello", "z").is_none());
        }

        #[test]
        fn out_of_order_characters_fail() {
            assert!(subsequence_match("ab", "ba").is_none());
        }
    }

    mod search_fuzzy {
        use super::*;

        #[test]
        fn left_anchored_match_scores_higher() {
            let mut index = PostingIndex::new();
            index.insert(slot("zzebra"));
            index.insert(slot("a zzebra appears"));
            let cancel = CancellationToken::new();
            let mut results = index.search_fuzzy("zz", &cancel);
            results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap());
            assert!(results[0].score >= results[1].score);
        }

        #[test]
        fn rebuild_preserves_live_matches() {
            let mut index = PostingIndex::new();
            let keep = slot("keep me findable");
            let keep_id = keep.record_id;
            let drop = slot("drop me findable");
            index.insert(keep);
            index.insert(drop.clone());
            index.remove(drop.record_id);
            index.rebuild();

            let cancel = CancellationToken::new();
            let results = index.search_fuzzy("findable", &cancel);
            assert_eq!(results.len(), 1);
            assert_eq!(results[0].record_id, keep_id);
        }
    }

    mod search_fuzzy_plus {
        use super::*;

        #[test]
        fn every_token_must_match() {
            let mut index = PostingIndex::new();
            index.insert(slot("alpha beta gamma"));
            let cancel = CancellationToken::new();
            assert_eq!(index.search_fuzzy_plus("alpha zzz", &cancel).len(), 0);
            assert_eq!(index.search_fuzzy_plus("alph bta", &cancel).len(), 1);
        }

        #[test]
        fn left_to_right_token_order_gets_a_bonus() {
            let mut index = PostingIndex::new();
            index.insert(slot("alpha beta"));
            index.insert(slot("beta alpha"));
            let cancel = CancellationToken::new();
            let mut results = index.search_fuzzy_plus("alpha beta", &cancel);
            results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap());
            assert!(results[0].score > results[1].score);
        }
    }
}
