//! FastEmbed implementation of the embedding port
//!
//! Local, offline embedding generation. Models are downloaded on demand to
//! `~/.cache/huggingface/` on first use; the default multilingual model is
//! what the instruction prefixes ("passage: " / "query: ") were tuned for.

use crate::error::{FolioError, Result};
use crate::ports::EmbeddingPort;
use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use std::sync::Arc;

pub struct FastEmbedProvider {
    model: Arc<TextEmbedding>,
    model_name: String,
    dimension: usize,
}

impl FastEmbedProvider {
    pub fn new(model_name: &str) -> Result<Self> {
        let embedding_model = match model_name {
            "multilingual-e5-small" => EmbeddingModel::MultilingualE5Small,
            "multilingual-e5-base" => EmbeddingModel::MultilingualE5Base,
            "multilingual-e5-large" => EmbeddingModel::MultilingualE5Large,
            _ => {
                return Err(FolioError::Embedding(format!(
                    "Unsupported model: {}. Supported: multilingual-e5-small, \
                     multilingual-e5-base, multilingual-e5-large",
                    model_name
                )));
            }
        };

        let dimension = match embedding_model {
            EmbeddingModel::MultilingualE5Large => 1024,
            EmbeddingModel::MultilingualE5Base => 768,
            _ => 384,
        };

        tracing::info!(
            "Initializing embedding model: {} ({}D, downloaded if not cached)",
            model_name,
            dimension
        );

        let init_options = InitOptions::new(embedding_model).with_show_download_progress(true);
        let model = TextEmbedding::try_new(init_options)
            .map_err(|e| FolioError::Embedding(e.to_string()))?;

        Ok(Self {
            model: Arc::new(model),
            model_name: model_name.to_string(),
            dimension,
        })
    }

    /// Create a provider with the default model (multilingual-e5-small).
    pub fn with_default_model() -> Result<Self> {
        Self::new("multilingual-e5-small")
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }
}

#[async_trait]
impl EmbeddingPort for FastEmbedProvider {
    async fn embed(&self, text: &str, prefix: &str) -> Result<Vec<f32>> {
        if text.is_empty() {
            return Err(FolioError::Embedding("Empty text".to_string()));
        }

        let input = format!("{prefix}{text}");
        let embeddings = self
            .model
            .embed(vec![input], None)
            .map_err(|e| FolioError::Embedding(e.to_string()))?;

        let embedding = embeddings
            .into_iter()
            .next()
            .ok_or_else(|| FolioError::Embedding("No embeddings generated".to_string()))?;

        if embedding.len() != self.dimension {
            return Err(FolioError::Embedding(format!(
                "Dimension mismatch: expected {}, got {}",
                self.dimension,
                embedding.len()
            )));
        }

        Ok(embedding)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
