// Time-boxed result cache backing the request queue.
// A keyed request that succeeded recently is answered from here without
// touching the queue or re-running its operation.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::RwLock;

// Counters for cache traffic, snapshot via ResultCache::stats
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub items_count: usize,
    pub hit_count: usize,
    pub miss_count: usize,
    pub store_count: usize,
    pub expired_count: usize,
}

struct CacheEntry<T> {
    value: T,
    stored_at: Instant,
}

// String-keyed store of recent successful results. Entries older than
// `timeout` count as absent; the read that finds a stale entry deletes it,
// there is no background sweeper.
pub struct ResultCache<T> {
    store: DashMap<String, CacheEntry<T>>,
    timeout: Duration,
    stats: RwLock<CacheStats>,
}

impl<T: Clone> ResultCache<T> {
    pub fn new(timeout: Duration) -> Self {
        Self {
            store: DashMap::new(),
            timeout,
            stats: RwLock::new(CacheStats::default()),
        }
    }

    pub fn get(&self, key: &str) -> Option<T> {
        // The shard guard must drop before the remove below.
        let expired = match self.store.get(key) {
            Some(entry) => {
                if entry.stored_at.elapsed() < self.timeout {
                    self.stats.write().hit_count += 1;
                    return Some(entry.value.clone());
                }
                true
            }
            None => false,
        };

        if expired {
            self.store.remove(key);
        }

        let mut stats = self.stats.write();
        if expired {
            stats.expired_count += 1;
        }
        stats.miss_count += 1;
        None
    }

    // Overwrites any previous entry for the key and restarts its clock.
    pub fn store(&self, key: String, value: T) {
        self.store.insert(
            key,
            CacheEntry {
                value,
                stored_at: Instant::now(),
            },
        );
        self.stats.write().store_count += 1;
    }

    pub fn remove(&self, key: &str) -> bool {
        self.store.remove(key).is_some()
    }

    pub fn clear(&self) {
        self.store.clear();
    }

    pub fn stats(&self) -> CacheStats {
        let mut stats = self.stats.read().clone();
        stats.items_count = self.store.len();
        stats
    }
}
