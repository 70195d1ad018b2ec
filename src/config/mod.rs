//! Configuration management for Folio
//!
//! Loading, validation and defaults for the encoder and the query pipeline.
//! The loaded `Config` is part of the context object handed to every pipeline
//! stage at startup; nothing reads configuration through global state.

use crate::error::{FolioError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

mod validator;

pub use validator::ConfigValidator;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "_meta")]
    pub meta: MetaConfig,
    pub storage: StorageConfig,
    pub embedding: EmbeddingConfig,
    pub llm: LlmConfig,
    pub encoder: EncoderConfig,
    pub query: QueryConfig,
}

/// Metadata about the configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaConfig {
    pub schema_version: String,
    #[serde(default = "current_timestamp")]
    pub created_at: String,
    #[serde(default = "current_timestamp")]
    pub last_modified: String,
}

fn current_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding encoded trees, partial files and the query cache
    pub data_dir: PathBuf,
    /// Full processed documents kept in memory
    pub tree_cache_capacity: usize,
    /// Memoized embeddings kept in memory
    pub vector_cache_capacity: usize,
}

/// Embedding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub model: String,
    pub passage_prefix: String,
    pub query_prefix: String,
}

/// Language-model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub provider: String,
    pub api_key_env: String,
    /// Model used for answer generation and merging
    pub model: String,
    /// Cheaper model used for OCR correction and relevance filtering
    pub filter_model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// Encoder configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncoderConfig {
    /// Describe embedded illustrations through the vision port
    pub illustration: bool,
    /// Word cap requested from the model for each combined summary
    pub summary_max_words: usize,
}

/// Query pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Candidates kept after scoring, before relevance filtering
    pub max_matches: usize,
    /// Passages judged per relevance-filter LLM call
    pub filter_batch_size: usize,
    /// Concurrent relevance-filter calls
    pub filter_concurrency: usize,
    /// Estimated-token cap per documentation batch
    pub batch_token_budget: f64,
    /// Estimated-token cap per merge sub-batch
    pub merge_token_budget: f64,
    /// Cosine similarity a cached query must clear to be reused
    pub cache_similarity_threshold: f32,
    /// Keep an entire filter batch when its verdict cannot be parsed.
    /// Trades precision for availability; flip to drop such batches instead.
    pub filter_fail_open: bool,
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(FolioError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| FolioError::Io {
            source: e,
            context: format!("Failed to read config file: {:?}", path),
        })?;
        let mut config: Config = toml::from_str(&content)?;

        config.apply_env_overrides();
        ConfigValidator::validate(&config)?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| FolioError::Io {
            source: e,
            context: format!("Failed to write config file: {:?}", path),
        })?;
        Ok(())
    }

    /// Apply environment variable overrides.
    /// Environment variables in format: FOLIO_SECTION__KEY=value
    pub fn apply_env_overrides(&mut self) {
        for (key, value) in std::env::vars() {
            if let Some(config_key) = key.strip_prefix("FOLIO_") {
                if let Err(e) = self.set_value_from_env(config_key, &value) {
                    tracing::warn!("Failed to apply env override {}: {}", key, e);
                }
            }
        }
    }

    fn set_value_from_env(&mut self, path: &str, value: &str) -> Result<()> {
        match path {
            "LLM__MODEL" => {
                self.llm.model = value.to_string();
            }
            "LLM__FILTER_MODEL" => {
                self.llm.filter_model = value.to_string();
            }
            "EMBEDDING__MODEL" => {
                self.embedding.model = value.to_string();
            }
            "ENCODER__ILLUSTRATION" => {
                self.encoder.illustration =
                    value.parse().map_err(|_| FolioError::InvalidConfigValue {
                        path: path.to_string(),
                        message: format!("Cannot parse '{}' as boolean", value),
                    })?;
            }
            "QUERY__MAX_MATCHES" => {
                self.query.max_matches =
                    value.parse().map_err(|_| FolioError::InvalidConfigValue {
                        path: path.to_string(),
                        message: format!("Cannot parse '{}' as integer", value),
                    })?;
            }
            _ => {
                tracing::debug!("Unknown env config key: {}", path);
            }
        }
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| FolioError::Config("Cannot determine config directory".to_string()))?;

        Ok(config_dir.join("folio").join("config.toml"))
    }

    /// Get the default data directory
    pub fn default_data_dir() -> Result<PathBuf> {
        let home_dir = dirs::home_dir()
            .ok_or_else(|| FolioError::Config("Cannot determine home directory".to_string()))?;

        Ok(home_dir.join(".folio"))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            meta: MetaConfig {
                schema_version: "1.0.0".to_string(),
                created_at: current_timestamp(),
                last_modified: current_timestamp(),
            },
            storage: StorageConfig {
                data_dir: PathBuf::from("~/.folio"),
                tree_cache_capacity: 30,
                vector_cache_capacity: 2000,
            },
            embedding: EmbeddingConfig {
                model: "multilingual-e5-small".to_string(),
                passage_prefix: crate::ports::PASSAGE_PREFIX.to_string(),
                query_prefix: crate::ports::QUERY_PREFIX.to_string(),
            },
            llm: LlmConfig {
                provider: "openai".to_string(),
                api_key_env: "FOLIO_API_KEY".to_string(),
                model: "gpt-4o".to_string(),
                filter_model: "gpt-4o-mini".to_string(),
                temperature: 0.1,
                max_tokens: 4096,
            },
            encoder: EncoderConfig {
                illustration: false,
                summary_max_words: 500,
            },
            query: QueryConfig {
                max_matches: 30,
                filter_batch_size: 5,
                filter_concurrency: 5,
                batch_token_budget: 14000.0,
                merge_token_budget: 14000.0,
                cache_similarity_threshold: 0.98,
                filter_fail_open: true,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_is_valid() {
        assert!(ConfigValidator::validate(&Config::default()).is_ok());
    }

    #[test]
    fn test_default_prefixes_match_port_constants() {
        let config = Config::default();
        assert_eq!(config.embedding.passage_prefix, crate::ports::PASSAGE_PREFIX);
        assert_eq!(config.embedding.query_prefix, crate::ports::QUERY_PREFIX);
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");

        let config = Config::default();
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.query.max_matches, config.query.max_matches);
        assert_eq!(loaded.embedding.model, config.embedding.model);
    }

    #[test]
    fn test_load_missing_file() {
        let result = Config::load(Path::new("/nonexistent/config.toml"));
        assert!(matches!(result, Err(FolioError::ConfigNotFound { .. })));
    }
}
