//! Persistence for document trees: finished artifacts and resumable partials
//!
//! One JSON file per document under the store directory. A `.partial` file
//! with the same schema signals an interrupted encode: its presence means
//! "resume here, do not restart from scratch", and it is deleted once the
//! finished tree has been written. Loaded trees are held in a bounded LRU so
//! concurrent queries over the same documents share one read-only copy.

use super::DocumentTree;
use crate::cache::{CacheStats, LruCache};
use crate::error::{FolioError, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Default number of fully processed documents kept in memory.
pub const DEFAULT_MEMORY_CAPACITY: usize = 30;

pub struct TreeStore {
    dir: PathBuf,
    memory: LruCache<String, Arc<DocumentTree>>,
}

impl TreeStore {
    /// Open a store rooted at `dir`, creating the directory if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        Self::with_capacity(dir, DEFAULT_MEMORY_CAPACITY)
    }

    pub fn with_capacity(dir: impl Into<PathBuf>, capacity: usize) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| FolioError::Io {
            source: e,
            context: format!("Failed to create tree store directory: {:?}", dir),
        })?;
        Ok(Self {
            dir,
            memory: LruCache::new(capacity),
        })
    }

    pub fn tree_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    pub fn partial_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.partial"))
    }

    /// Load a finished tree, from memory if cached, from disk otherwise.
    pub fn load(&self, key: &str) -> Result<Arc<DocumentTree>> {
        if let Some(tree) = self.memory.get(&key.to_string()) {
            tracing::debug!("Tree for '{}' served from memory cache", key);
            return Ok(tree);
        }

        let path = self.tree_path(key);
        if !path.exists() {
            return Err(FolioError::TreeNotFound {
                file: key.to_string(),
            });
        }

        let tree = Arc::new(read_tree(&path)?);
        self.memory.put(key.to_string(), Arc::clone(&tree));
        tracing::info!("Tree for '{}' loaded from disk", key);
        Ok(tree)
    }

    /// Write a finished tree to disk and refresh the memory cache.
    pub fn save(&self, key: &str, tree: &DocumentTree) -> Result<()> {
        write_tree(&self.tree_path(key), tree)?;
        self.memory.put(key.to_string(), Arc::new(tree.clone()));
        tracing::info!("Tree for '{}' saved", key);
        Ok(())
    }

    /// Whether an interrupted encode left a partial file for this document.
    pub fn has_partial(&self, key: &str) -> bool {
        self.partial_path(key).exists()
    }

    /// Load partial encoder state. Read or parse failures are logged and
    /// treated as "no usable partial": encoding then restarts from page 0.
    pub fn load_partial(&self, key: &str) -> Option<DocumentTree> {
        let path = self.partial_path(key);
        if !path.exists() {
            return None;
        }
        match read_tree(&path) {
            Ok(tree) => {
                tracing::info!("Partial state found for '{}', resuming", key);
                Some(tree)
            }
            Err(e) => {
                tracing::warn!("Unusable partial state for '{}': {}", key, e);
                None
            }
        }
    }

    pub fn save_partial(&self, key: &str, tree: &DocumentTree) -> Result<()> {
        write_tree(&self.partial_path(key), tree)?;
        tracing::debug!("Partial state for '{}' saved", key);
        Ok(())
    }

    /// Delete the partial file after a successful encode. A missing file is
    /// not an error.
    pub fn remove_partial(&self, key: &str) -> Result<()> {
        let path = self.partial_path(key);
        match std::fs::remove_file(&path) {
            Ok(()) => {
                tracing::debug!("Partial state for '{}' removed", key);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(FolioError::Io {
                source: e,
                context: format!("Failed to remove partial file: {:?}", path),
            }),
        }
    }

    pub fn memory_stats(&self) -> CacheStats {
        self.memory.stats()
    }
}

fn read_tree(path: &Path) -> Result<DocumentTree> {
    let content = std::fs::read_to_string(path).map_err(|e| FolioError::Io {
        source: e,
        context: format!("Failed to read tree file: {:?}", path),
    })?;
    serde_json::from_str(&content).map_err(|e| FolioError::Json {
        source: e,
        context: format!("Failed to parse tree file: {:?}", path),
    })
}

fn write_tree(path: &Path, tree: &DocumentTree) -> Result<()> {
    let content = serde_json::to_string(tree).map_err(|e| FolioError::Json {
        source: e,
        context: format!("Failed to serialize tree: {}", tree.file_name),
    })?;
    std::fs::write(path, content).map_err(|e| FolioError::Io {
        source: e,
        context: format!("Failed to write tree file: {:?}", path),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::Node;
    use tempfile::TempDir;

    fn sample_tree() -> DocumentTree {
        let mut tree = DocumentTree::new("livre.pdf");
        tree.levels = vec![vec![Node {
            text: "page un".to_string(),
            page_range: "Page 1".to_string(),
            start_page: 1,
            end_page: 1,
        }]];
        tree.vectors = vec![vec![vec![0.1, 0.2]]];
        tree.root_summary = Some("résumé".to_string());
        tree
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = TreeStore::open(dir.path()).unwrap();

        store.save("livre", &sample_tree()).unwrap();
        let loaded = store.load("livre").unwrap();

        assert_eq!(loaded.file_name, "livre.pdf");
        assert_eq!(loaded.root_summary.as_deref(), Some("résumé"));
        assert_eq!(loaded.vectors[0][0], vec![0.1, 0.2]);
    }

    #[test]
    fn test_load_missing_tree() {
        let dir = TempDir::new().unwrap();
        let store = TreeStore::open(dir.path()).unwrap();

        match store.load("absent") {
            Err(FolioError::TreeNotFound { file }) => assert_eq!(file, "absent"),
            other => panic!("expected TreeNotFound, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_memory_cache_hit() {
        let dir = TempDir::new().unwrap();
        let store = TreeStore::open(dir.path()).unwrap();

        store.save("livre", &sample_tree()).unwrap();
        store.load("livre").unwrap();
        store.load("livre").unwrap();

        assert!(store.memory_stats().hits >= 2);
    }

    #[test]
    fn test_partial_lifecycle() {
        let dir = TempDir::new().unwrap();
        let store = TreeStore::open(dir.path()).unwrap();

        assert!(!store.has_partial("livre"));
        assert!(store.load_partial("livre").is_none());

        store.save_partial("livre", &sample_tree()).unwrap();
        assert!(store.has_partial("livre"));
        assert!(store.load_partial("livre").is_some());

        store.remove_partial("livre").unwrap();
        assert!(!store.has_partial("livre"));

        // Removing twice is not an error
        store.remove_partial("livre").unwrap();
    }

    #[test]
    fn test_corrupt_partial_is_ignored() {
        let dir = TempDir::new().unwrap();
        let store = TreeStore::open(dir.path()).unwrap();

        std::fs::write(store.partial_path("livre"), "not json").unwrap();
        assert!(store.load_partial("livre").is_none());
    }
}
