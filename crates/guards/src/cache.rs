//! Bounded tool-data cache with TTL and entry-count eviction.
//!
//! Eviction runs on insert: TTL-expired entries drop first; if the cache is
//! still over its cap, the least-recently-inserted entries go next. Reads
//! never mutate insertion order — this is deliberately *not* an LRU.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

struct Entry<V> {
    value: V,
    inserted_at: Instant,
    seq: u64,
}

/// A TTL + max-entries cache behind a single lock. Contention is negligible
/// at expected load; keep it simple.
pub struct BoundedTtlCache<K, V> {
    inner: Mutex<Inner<K, V>>,
    ttl: Duration,
    max_entries: usize,
}

struct Inner<K, V> {
    map: HashMap<K, Entry<V>>,
    next_seq: u64,
}

impl<K: Eq + Hash + Clone, V: Clone> BoundedTtlCache<K, V> {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                map: HashMap::new(),
                next_seq: 0,
            }),
            ttl,
            max_entries,
        }
    }

    pub fn insert(&self, key: K, value: V) {
        let mut inner = self.inner.lock();
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.map.insert(
            key,
            Entry {
                value,
                inserted_at: Instant::now(),
                seq,
            },
        );

        // Pass 1: drop expired entries.
        let ttl = self.ttl;
        inner.map.retain(|_, e| e.inserted_at.elapsed() < ttl);

        // Pass 2: still over cap -> drop by least-recently-inserted.
        while inner.map.len() > self.max_entries {
            let Some(oldest) = inner
                .map
                .iter()
                .min_by_key(|(_, e)| e.seq)
                .map(|(k, _)| k.clone())
            else {
                break;
            };
            inner.map.remove(&oldest);
        }
    }

    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        let inner = self.inner.lock();
        inner.map.get(key).and_then(|e| {
            if e.inserted_at.elapsed() < self.ttl {
                Some(e.value.clone())
            } else {
                None
            }
        })
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.inner.lock().map.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_get() {
        let cache = BoundedTtlCache::new(Duration::from_secs(60), 10);
        cache.insert("AAPL", "227.50".to_string());
        assert_eq!(cache.get("AAPL").as_deref(), Some("227.50"));
        assert_eq!(cache.get("MSFT"), None);
    }

    #[test]
    fn over_cap_drops_least_recently_inserted() {
        let cache = BoundedTtlCache::new(Duration::from_secs(60), 3);
        for i in 0..5 {
            cache.insert(i, i);
        }
        assert_eq!(cache.len(), 3);
        assert_eq!(cache.get(&0), None);
        assert_eq!(cache.get(&1), None);
        assert_eq!(cache.get(&4), Some(4));
    }

    #[test]
    fn expired_entries_are_invisible_and_evicted_first() {
        let cache = BoundedTtlCache::new(Duration::from_millis(0), 3);
        cache.insert("k", 1);
        assert_eq!(cache.get("k"), None);
        // Next insert sweeps the expired entry before applying the cap.
        cache.insert("k2", 2);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn reinsert_refreshes_recency() {
        let cache = BoundedTtlCache::new(Duration::from_secs(60), 2);
        cache.insert("a", 1);
        cache.insert("b", 2);
        cache.insert("a", 3); // refreshed — "b" is now oldest
        cache.insert("c", 4);
        assert_eq!(cache.get("b"), None);
        assert_eq!(cache.get("a"), Some(3));
        assert_eq!(cache.get("c"), Some(4));
    }
}
