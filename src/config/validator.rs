//! Configuration validation

use super::Config;
use crate::error::{FolioError, Result, ValidationError};

pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate a configuration, collecting every violation before failing.
    pub fn validate(config: &Config) -> Result<()> {
        let mut errors = Vec::new();

        Self::validate_storage(config, &mut errors);
        Self::validate_embedding(config, &mut errors);
        Self::validate_llm(config, &mut errors);
        Self::validate_query(config, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(FolioError::ConfigValidation { errors })
        }
    }

    fn validate_storage(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.storage.tree_cache_capacity == 0 {
            errors.push(ValidationError::new(
                "storage.tree_cache_capacity",
                "must be at least 1",
            ));
        }
        if config.storage.vector_cache_capacity == 0 {
            errors.push(ValidationError::new(
                "storage.vector_cache_capacity",
                "must be at least 1",
            ));
        }
    }

    fn validate_embedding(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.embedding.model.is_empty() {
            errors.push(ValidationError::new("embedding.model", "must not be empty"));
        }
    }

    fn validate_llm(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.llm.model.is_empty() {
            errors.push(ValidationError::new("llm.model", "must not be empty"));
        }
        if !(0.0..=2.0).contains(&config.llm.temperature) {
            errors.push(ValidationError::new(
                "llm.temperature",
                "must be between 0.0 and 2.0",
            ));
        }
        if config.llm.max_tokens == 0 {
            errors.push(ValidationError::new("llm.max_tokens", "must be at least 1"));
        }
    }

    fn validate_query(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.query.max_matches == 0 {
            errors.push(ValidationError::new("query.max_matches", "must be at least 1"));
        }
        if config.query.filter_batch_size == 0 {
            errors.push(ValidationError::new(
                "query.filter_batch_size",
                "must be at least 1",
            ));
        }
        if config.query.filter_concurrency == 0 {
            errors.push(ValidationError::new(
                "query.filter_concurrency",
                "must be at least 1",
            ));
        }
        if config.query.batch_token_budget <= 0.0 {
            errors.push(ValidationError::new(
                "query.batch_token_budget",
                "must be positive",
            ));
        }
        if config.query.merge_token_budget <= 0.0 {
            errors.push(ValidationError::new(
                "query.merge_token_budget",
                "must be positive",
            ));
        }
        if !(0.0..=1.0).contains(&config.query.cache_similarity_threshold) {
            errors.push(ValidationError::new(
                "query.cache_similarity_threshold",
                "must be between 0.0 and 1.0",
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_passes() {
        assert!(ConfigValidator::validate(&Config::default()).is_ok());
    }

    #[test]
    fn test_collects_multiple_errors() {
        let mut config = Config::default();
        config.query.max_matches = 0;
        config.query.filter_batch_size = 0;
        config.llm.temperature = 5.0;

        match ConfigValidator::validate(&config) {
            Err(FolioError::ConfigValidation { errors }) => {
                assert_eq!(errors.len(), 3);
            }
            other => panic!("expected validation failure, got {:?}", other),
        }
    }

    #[test]
    fn test_threshold_out_of_range() {
        let mut config = Config::default();
        config.query.cache_similarity_threshold = 1.5;
        assert!(ConfigValidator::validate(&config).is_err());
    }
}
