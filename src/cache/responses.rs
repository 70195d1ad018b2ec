//! Persisted approximate cache of final query responses
//!
//! A query hits the cache when a stored entry's query text contains all of the
//! new query's keywords and the cosine similarity between the two query
//! embeddings clears a high threshold (0.98 by default). Entries are never
//! mutated after creation except for their vote counters.

use crate::error::{FolioError, Result};
use crate::ports::cosine_similarity;
use crate::text::contains_all_keywords;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryCacheEntry {
    pub id: Uuid,
    pub query: String,
    pub keywords: Vec<String>,
    pub embedding: Vec<f32>,
    pub response: String,
    pub upvotes: u32,
    pub downvotes: u32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vote {
    Up,
    Down,
}

/// On-disk store of answered queries, JSON-serialized as a single file.
pub struct QueryCache {
    path: PathBuf,
    entries: Mutex<Vec<QueryCacheEntry>>,
}

impl QueryCache {
    /// Open the cache at `path`, loading existing entries if the file exists.
    pub fn open(path: PathBuf) -> Result<Self> {
        let entries = if path.exists() {
            let content = std::fs::read_to_string(&path).map_err(|e| FolioError::Io {
                source: e,
                context: format!("Failed to read query cache: {:?}", path),
            })?;
            serde_json::from_str(&content).map_err(|e| FolioError::Json {
                source: e,
                context: format!("Failed to parse query cache: {:?}", path),
            })?
        } else {
            Vec::new()
        };

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    /// Find the best cached response for a query.
    ///
    /// Linear scan: a candidate qualifies only if its stored query text
    /// contains every keyword of the new query; among qualifying candidates
    /// the highest cosine score wins, and only if it exceeds `threshold`.
    pub fn search_similar(
        &self,
        query_embedding: &[f32],
        keywords: &[String],
        threshold: f32,
    ) -> Option<QueryCacheEntry> {
        let entries = self.entries.lock().expect("query cache poisoned");

        let mut best_score = 0.0f32;
        let mut best: Option<&QueryCacheEntry> = None;

        for entry in entries.iter() {
            if !contains_all_keywords(&entry.query, keywords) {
                continue;
            }
            let score = cosine_similarity(&entry.embedding, query_embedding);
            if score > best_score {
                best_score = score;
                best = Some(entry);
            }
        }

        if best_score > threshold {
            tracing::info!("Query cache hit (score: {:.4})", best_score);
            best.cloned()
        } else {
            None
        }
    }

    /// Store a freshly generated answer and persist the cache.
    pub fn save(
        &self,
        query: &str,
        keywords: &[String],
        embedding: Vec<f32>,
        response: &str,
    ) -> Result<Uuid> {
        let entry = QueryCacheEntry {
            id: Uuid::new_v4(),
            query: query.to_string(),
            keywords: keywords.to_vec(),
            embedding,
            response: response.to_string(),
            upvotes: 0,
            downvotes: 0,
            created_at: Utc::now(),
        };
        let id = entry.id;

        {
            let mut entries = self.entries.lock().expect("query cache poisoned");
            entries.push(entry);
        }
        self.persist()?;
        Ok(id)
    }

    /// Record a vote on a cached answer. Returns false when the id is unknown.
    pub fn vote(&self, id: Uuid, vote: Vote) -> Result<bool> {
        let found = {
            let mut entries = self.entries.lock().expect("query cache poisoned");
            match entries.iter_mut().find(|e| e.id == id) {
                Some(entry) => {
                    match vote {
                        Vote::Up => entry.upvotes += 1,
                        Vote::Down => entry.downvotes += 1,
                    }
                    true
                }
                None => false,
            }
        };

        if found {
            self.persist()?;
        }
        Ok(found)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("query cache poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn persist(&self) -> Result<()> {
        let entries = self.entries.lock().expect("query cache poisoned");
        let content = serde_json::to_string(&*entries).map_err(|e| FolioError::Json {
            source: e,
            context: "Failed to serialize query cache".to_string(),
        })?;
        std::fs::write(&self.path, content).map_err(|e| FolioError::Io {
            source: e,
            context: format!("Failed to write query cache: {:?}", self.path),
        })?;
        Ok(())
    }
}
