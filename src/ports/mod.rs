//! Ports to the external embedding, language and vision models
//!
//! The engine never talks to a vendor SDK directly; everything flows through
//! these narrow traits. Retry and fail-open policy is the responsibility of
//! each calling component, not of the port.

mod fastembed_provider;

pub use fastembed_provider::FastEmbedProvider;

use crate::error::Result;
use async_trait::async_trait;

/// Instruction prefix for document passages at embedding time.
pub const PASSAGE_PREFIX: &str = "passage: ";

/// Instruction prefix for user queries at embedding time.
pub const QUERY_PREFIX: &str = "query: ";

/// Port to an embedding model.
///
/// Implementations must be deterministic for identical input and must return
/// unit-length vectors: all downstream similarity math is a plain dot product
/// over normalized embeddings.
#[async_trait]
pub trait EmbeddingPort: Send + Sync {
    /// Embed `text` with the given instruction prefix prepended.
    async fn embed(&self, text: &str, prefix: &str) -> Result<Vec<f32>>;

    /// The dimensionality of the embeddings produced.
    fn dimension(&self) -> usize;
}

/// One generation request to the language model.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub prompt: String,
    pub system: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl GenerateRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            system: None,
            temperature: 0.1,
            max_tokens: 4096,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    /// Override the default sampling parameters, typically from `LlmConfig`.
    pub fn with_sampling(mut self, temperature: f32, max_tokens: u32) -> Self {
        self.temperature = temperature;
        self.max_tokens = max_tokens;
        self
    }
}

/// Port to a text-generation model. Calls may fail transiently; callers decide
/// whether that is fatal or fail-open.
#[async_trait]
pub trait LanguageModelPort: Send + Sync {
    async fn generate(&self, request: GenerateRequest) -> Result<String>;
}

/// Optional port to a vision model used to describe embedded illustrations.
#[async_trait]
pub trait VisionPort: Send + Sync {
    /// Describe the image at `image_path`, given the surrounding page text as
    /// context.
    async fn describe(&self, image_path: &str, context: &str) -> Result<String>;
}

/// Cosine similarity between two vectors.
///
/// Magnitudes are recomputed rather than assumed so that scores stay in
/// [-1, 1] even if a port returns an unnormalized vector.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }
    dot / (mag_a * mag_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_identical() {
        let v = vec![0.6, 0.8];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_zero_vector() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }
}
