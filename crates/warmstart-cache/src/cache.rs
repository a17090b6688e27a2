//! Bounded caches that can be snapshotted
//!
//! [`BoundedCache`] is the view the snapshot engine needs of a cache: its
//! size, a pass over its keys, a bounded pass over its hottest keys, and
//! insertion for reloading. [`LruCache`] is an implementation that ranks
//! keys by a logical access clock.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};

/// Single-pass sequence of keys selected for a save.
///
/// Dropping the iterator releases whatever it holds.
pub type KeyIter<K> = Box<dyn Iterator<Item = K> + Send>;

/// Cache contents as seen by the snapshot engine
pub trait BoundedCache<K, V>: Send + Sync {
    /// Current number of entries
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every key, in the cache's own order
    fn keys(&self) -> KeyIter<K>;

    /// At most `n` keys, most valuable first by the cache's ranking
    fn hot_keys(&self, n: usize) -> KeyIter<K>;

    /// Insert an entry, evicting as the cache sees fit
    fn put(&self, key: K, value: V);
}

/// Individual cache entry with LRU tracking
struct CacheEntry<V> {
    value: V,
    /// Last access time for LRU eviction
    last_access: AtomicU64,
}

impl<V> CacheEntry<V> {
    fn new(value: V, clock: u64) -> Self {
        Self {
            value,
            last_access: AtomicU64::new(clock),
        }
    }

    fn touch(&self, clock: u64) {
        self.last_access.store(clock, Ordering::Relaxed);
    }

    fn last_access(&self) -> u64 {
        self.last_access.load(Ordering::Relaxed)
    }
}

/// Cache statistics for monitoring
#[derive(Debug, Default)]
pub struct CacheStats {
    /// Number of cache hits
    pub hits: AtomicU64,
    /// Number of cache misses
    pub misses: AtomicU64,
    /// Number of entries evicted
    pub evictions: AtomicU64,
}

impl CacheStats {
    /// Calculate hit ratio (0.0 to 1.0)
    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total == 0 {
            return 0.0;
        }
        hits as f64 / total as f64
    }
}

/// LRU cache bounded by entry count
pub struct LruCache<K, V> {
    /// Cached entries protected by RwLock
    entries: RwLock<HashMap<K, CacheEntry<V>>>,
    /// Maximum number of entries
    capacity: usize,
    /// Logical clock for LRU ordering
    clock: AtomicU64,
    /// Cache statistics
    stats: CacheStats,
}

impl<K, V> LruCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Create a new cache holding at most `capacity` entries
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
            clock: AtomicU64::new(0),
            stats: CacheStats::default(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Get cache statistics
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Advance the logical clock and return the new value
    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Look up an entry, marking it as recently used
    pub fn get(&self, key: &K) -> Option<V> {
        let entries = self.entries.read();
        if let Some(entry) = entries.get(key) {
            entry.touch(self.tick());
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            Some(entry.value.clone())
        } else {
            self.stats.misses.fetch_add(1, Ordering::Relaxed);
            None
        }
    }

    /// Insert an entry, evicting the least recently used ones at capacity
    pub fn insert(&self, key: K, value: V) {
        let clock = self.tick();
        let mut entries = self.entries.write();

        if !entries.contains_key(&key) {
            while entries.len() >= self.capacity {
                let Some(evict_key) = Self::find_lru_entry(&entries) else {
                    break;
                };
                entries.remove(&evict_key);
                self.stats.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }

        entries.insert(key, CacheEntry::new(value, clock));
    }

    /// Remove an entry from the cache
    pub fn invalidate(&self, key: &K) -> Option<V> {
        self.entries.write().remove(key).map(|entry| entry.value)
    }

    /// Check if a key is cached, without touching it
    pub fn contains(&self, key: &K) -> bool {
        self.entries.read().contains_key(key)
    }

    /// Clear all entries from the cache
    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// Find the least recently used key
    fn find_lru_entry(entries: &HashMap<K, CacheEntry<V>>) -> Option<K> {
        entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_access())
            .map(|(key, _)| key.clone())
    }

    /// Keys ordered from most to least recently used, truncated to `n`
    fn most_recent(&self, n: usize) -> Vec<K> {
        let entries = self.entries.read();
        let mut ranked: Vec<(u64, &K)> = entries
            .iter()
            .map(|(key, entry)| (entry.last_access(), key))
            .collect();
        if n < ranked.len() {
            ranked.select_nth_unstable_by(n, |a, b| b.0.cmp(&a.0));
            ranked.truncate(n);
        }
        ranked.sort_unstable_by(|a, b| b.0.cmp(&a.0));
        ranked.into_iter().map(|(_, key)| key.clone()).collect()
    }
}

impl<K, V> BoundedCache<K, V> for LruCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync,
{
    fn len(&self) -> usize {
        self.entries.read().len()
    }

    fn keys(&self) -> KeyIter<K> {
        // copy the key set so a save never holds the lock
        let keys: Vec<K> = self.entries.read().keys().cloned().collect();
        Box::new(keys.into_iter())
    }

    fn hot_keys(&self, n: usize) -> KeyIter<K> {
        Box::new(self.most_recent(n).into_iter())
    }

    fn put(&self, key: K, value: V) {
        self.insert(key, value);
    }
}
