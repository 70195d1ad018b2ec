//! Hierarchical document tree: the persisted artifact of the encoder
//!
//! Level 0 holds one node per source page; each level above it halves the node
//! count by pairwise summarization until a single root node remains. Vectors
//! run parallel to levels, one embedding per node at the same index.

mod store;

pub use store::TreeStore;

use crate::error::{FolioError, Result};
use serde::{Deserialize, Serialize};

/// One node of the hierarchy: a passage (level 0) or a summary (levels above).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub text: String,
    pub page_range: String,
    pub start_page: u32,
    pub end_page: u32,
}

/// A corrected source page, kept for resumability and re-encoding.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    pub page_number: u32,
    pub text: String,
}

/// The full summary hierarchy for one document.
///
/// Serialized as plain JSON with nested float arrays: portability over
/// compactness. The same schema serves both the finished artifact and the
/// mid-construction partial state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentTree {
    pub file_name: String,
    #[serde(default)]
    pub pages: Vec<Page>,
    /// Text of the root node, set only once reduction has finished.
    #[serde(rename = "description")]
    pub root_summary: Option<String>,
    /// Level 0 first; each following level has ceil(previous / 2) nodes.
    #[serde(rename = "descriptions", default)]
    pub levels: Vec<Vec<Node>>,
    /// One embedding per node, parallel to `levels`.
    #[serde(rename = "descriptionsVectorized", default)]
    pub vectors: Vec<Vec<Vec<f32>>>,
}

impl DocumentTree {
    pub fn new(file_name: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            pages: Vec::new(),
            root_summary: None,
            levels: Vec::new(),
            vectors: Vec::new(),
        }
    }

    /// Whether reduction has completed down to a single root node.
    pub fn is_complete(&self) -> bool {
        self.root_summary.is_some()
            && self
                .levels
                .last()
                .is_some_and(|level| level.len() == 1)
    }

    pub fn leaf_count(&self) -> usize {
        self.levels.first().map_or(0, |level| level.len())
    }

    /// Verify the structural invariants: strict halving between levels,
    /// termination at one node, and level/vector parallelism.
    pub fn validate(&self) -> Result<()> {
        if self.levels.len() != self.vectors.len() {
            return Err(FolioError::InvalidTree(format!(
                "{} levels but {} vector levels",
                self.levels.len(),
                self.vectors.len()
            )));
        }

        for (i, (level, vecs)) in self.levels.iter().zip(self.vectors.iter()).enumerate() {
            if level.len() != vecs.len() {
                return Err(FolioError::InvalidTree(format!(
                    "level {} has {} nodes but {} vectors",
                    i,
                    level.len(),
                    vecs.len()
                )));
            }
            if i + 1 < self.levels.len() {
                let expected = level.len().div_ceil(2);
                let actual = self.levels[i + 1].len();
                if actual != expected {
                    return Err(FolioError::InvalidTree(format!(
                        "level {} has {} nodes, expected ceil({}/2) = {}",
                        i + 1,
                        actual,
                        level.len(),
                        expected
                    )));
                }
            }
        }

        Ok(())
    }
}
