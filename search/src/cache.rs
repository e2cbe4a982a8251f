//! Small TTL-bound caches fronting `fetch_recent` and FTS total counts.
//!
//! Neither cache reaches for a generic LRU crate: both need invalidation
//! keyed to `known_data_version` in addition to a wall-clock TTL, which a
//! plain LRU doesn't model, so these are hand-rolled the same way the
//! storage layer's event bus is.

use clip_store::record::{ContentType, Record};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

struct Entry<T> {
    value: T,
    inserted_at: Instant,
    data_version: u64,
}

/// Caches the empty-query `fetch_recent` page (capacity 2000, 30s TTL).
pub struct RecentItemsCache {
    capacity: usize,
    ttl: Duration,
    entry: Mutex<Option<Entry<Vec<Record>>>>,
}

impl RecentItemsCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            capacity,
            ttl,
            entry: Mutex::new(None),
        }
    }

    pub fn get(&self, current_data_version: u64) -> Option<Vec<Record>> {
        let guard = self.entry.lock().unwrap();
        let entry = guard.as_ref()?;
        if entry.data_version != current_data_version {
            return None;
        }
        if entry.inserted_at.elapsed() > self.ttl {
            return None;
        }
        Some(entry.value.clone())
    }

    pub fn set(&self, mut items: Vec<Record>, data_version: u64) {
        items.truncate(self.capacity);
        let mut guard = self.entry.lock().unwrap();
        *guard = Some(Entry {
            value: items,
            inserted_at: Instant::now(),
            data_version,
        });
    }

    pub fn invalidate(&self) {
        *self.entry.lock().unwrap() = None;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CountCacheKey {
    pub query: String,
    pub app_filter: Option<String>,
    pub type_filter: Option<ContentType>,
}

/// Caches FTS total counts keyed by `(query, filters)` (30s TTL).
/// Invalidated wholesale on any data change or pin change, since a count
/// cache entry has no cheap way to know whether a given commit affected it.
pub struct TotalCountCache {
    ttl: Duration,
    entries: Mutex<HashMap<CountCacheKey, Entry<i64>>>,
}

impl TotalCountCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, key: &CountCacheKey, current_data_version: u64) -> Option<i64> {
        let entries = self.entries.lock().unwrap();
        let entry = entries.get(key)?;
        if entry.data_version != current_data_version || entry.inserted_at.elapsed() > self.ttl {
            return None;
        }
        Some(entry.value)
    }

    pub fn set(&self, key: CountCacheKey, total: i64, data_version: u64) {
        let mut entries = self.entries.lock().unwrap();
        entries.insert(
            key,
            Entry {
                value: total,
                inserted_at: Instant::now(),
                data_version,
            },
        );
    }

    pub fn invalidate(&self) {
        self.entries.lock().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod recent_items_cache {
        use super::*;

        #[test]
        fn hit_within_ttl_and_matching_version() {
            let cache = RecentItemsCache::new(10, Duration::from_secs(30));
            cache.set(vec![], 1);
            assert!(cache.get(1).is_some());
        }

        #[test]
        fn miss_when_data_version_advanced() {
            let cache = RecentItemsCache::new(10, Duration::from_secs(30));
            cache.set(vec![], 1);
            assert!(cache.get(2).is_none());
        }

        #[test]
        fn miss_after_ttl_elapses() {
            let cache = RecentItemsCache::new(10, Duration::from_millis(1));
            cache.set(vec![], 1);
            std::thread::sleep(Duration::from_millis(20));
            assert!(cache.get(1).is_none());
        }

        #[test]
        fn invalidate_clears_unconditionally() {
            let cache = RecentItemsCache::new(10, Duration::from_secs(30));
            cache.set(vec![], 1);
            cache.invalidate();
            assert!(cache.get(1).is_none());
        }
    }

    mod total_count_cache {
        use super::*;

        fn key(q: &str) -> CountCacheKey {
            CountCacheKey {
                query: q.to_string(),
                app_filter: None,
                type_filter: None,
            }
        }

        #[test]
        fn distinct_keys_do_not_collide() {
            let cache = TotalCountCache::new(Duration::from_secs(30));
            cache.set(key("a"), 1, 1);
            cache.set(key("b"), 2, 1);
            assert_eq!(cache.get(&key("a"), 1), Some(1));
            assert_eq!(cache.get(&key("b"), 1), Some(2));
        }

        #[test]
        fn invalidate_on_pin_change_drops_everything() {
            let cache = TotalCountCache::new(Duration::from_secs(30));
            cache.set(key("a"), 1, 1);
            cache.invalidate();
            assert!(cache.get(&key("a"), 1).is_none());
        }
    }
}
