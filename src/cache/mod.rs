//! Bounded caches shared across the encoder and the query pipeline
//!
//! Three layers: a generic thread-safe LRU, an embedding cache keyed by a
//! blake3 digest of the prefixed text, and the persisted approximate cache of
//! final query responses.

mod responses;
mod vectors;

pub use responses::{QueryCache, QueryCacheEntry, Vote};
pub use vectors::VectorCache;

use std::collections::HashMap;
use std::collections::VecDeque;
use std::hash::Hash;
use std::sync::Mutex;

/// Usage statistics for a cache instance
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub size: usize,
    pub capacity: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

struct LruInner<K, V> {
    map: HashMap<K, V>,
    order: VecDeque<K>,
    hits: u64,
    misses: u64,
}

/// Thread-safe least-recently-used cache.
///
/// A mutex guards all operations; readers and writers never interleave.
/// Eviction removes the least recently accessed entry once the capacity is
/// exceeded.
pub struct LruCache<K, V> {
    inner: Mutex<LruInner<K, V>>,
    capacity: usize,
}

impl<K: Eq + Hash + Clone, V: Clone> LruCache<K, V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(LruInner {
                map: HashMap::new(),
                order: VecDeque::new(),
                hits: 0,
                misses: 0,
            }),
            capacity,
        }
    }

    /// Fetch a value, marking it most recently used.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.lock().expect("lru cache poisoned");
        if let Some(value) = inner.map.get(key).cloned() {
            inner.order.retain(|k| k != key);
            inner.order.push_back(key.clone());
            inner.hits += 1;
            Some(value)
        } else {
            inner.misses += 1;
            None
        }
    }

    /// Insert or refresh a value, evicting the least recently used entry when
    /// the cache is over capacity.
    pub fn put(&self, key: K, value: V) {
        let mut inner = self.inner.lock().expect("lru cache poisoned");
        if inner.map.contains_key(&key) {
            inner.order.retain(|k| k != &key);
        }
        inner.order.push_back(key.clone());
        inner.map.insert(key, value);

        if inner.map.len() > self.capacity {
            if let Some(evicted) = inner.order.pop_front() {
                inner.map.remove(&evicted);
                tracing::debug!("LRU cache evicted an entry");
            }
        }
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock().expect("lru cache poisoned");
        inner.map.clear();
        inner.order.clear();
        inner.hits = 0;
        inner.misses = 0;
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().expect("lru cache poisoned");
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            size: inner.map.len(),
            capacity: self.capacity,
        }
    }
}
