//! Embedding memoization keyed by a digest of the prefixed text

use super::{CacheStats, LruCache};

/// Cache of computed embeddings.
///
/// Keys are blake3 digests of `prefix | text`, so the same text embedded with
/// different instruction prefixes ("passage: " vs "query: ") occupies distinct
/// entries. Values are the unit-normalized vectors returned by the embedding
/// port.
pub struct VectorCache {
    lru: LruCache<String, Vec<f32>>,
}

impl VectorCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            lru: LruCache::new(capacity),
        }
    }

    fn key(text: &str, prefix: &str) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(prefix.as_bytes());
        hasher.update(b"|");
        hasher.update(text.as_bytes());
        hasher.finalize().to_hex().to_string()
    }

    pub fn get(&self, text: &str, prefix: &str) -> Option<Vec<f32>> {
        self.lru.get(&Self::key(text, prefix))
    }

    pub fn put(&self, text: &str, prefix: &str, embedding: Vec<f32>) {
        self.lru.put(Self::key(text, prefix), embedding);
    }

    pub fn stats(&self) -> CacheStats {
        self.lru.stats()
    }
}

impl Default for VectorCache {
    /// Default capacity mirrors the embedding cache of the reference
    /// deployment: 2000 entries.
    fn default() -> Self {
        Self::new(2000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_discriminates_entries() {
        let cache = VectorCache::new(10);
        cache.put("bonjour", "passage: ", vec![1.0, 0.0]);
        cache.put("bonjour", "query: ", vec![0.0, 1.0]);

        assert_eq!(cache.get("bonjour", "passage: "), Some(vec![1.0, 0.0]));
        assert_eq!(cache.get("bonjour", "query: "), Some(vec![0.0, 1.0]));
    }

    #[test]
    fn test_miss_returns_none() {
        let cache = VectorCache::new(10);
        assert_eq!(cache.get("absent", "passage: "), None);
    }
}
