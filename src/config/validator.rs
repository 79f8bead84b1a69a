use crate::config::Config;
use crate::error::{Result, SourcegateError, ValidationError};
use std::collections::HashSet;

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration, collecting every problem before failing
    pub fn validate(config: &Config) -> Result<()> {
        let mut errors = Vec::new();

        Self::validate_schema_version(config, &mut errors);
        Self::validate_storage(config, &mut errors);
        Self::validate_index(config, &mut errors);
        Self::validate_chunking(config, &mut errors);
        Self::validate_embedding(config, &mut errors);
        Self::validate_llm(config, &mut errors);
        Self::validate_retrieval(config, &mut errors);
        Self::validate_sources(config, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(SourcegateError::ConfigValidation { errors })
        }
    }

    fn validate_schema_version(config: &Config, errors: &mut Vec<ValidationError>) {
        let version = &config.meta.schema_version;
        if version != "1.0.0" {
            errors.push(ValidationError::new(
                "_meta.schema_version",
                format!("Unsupported schema version: {}", version),
            ));
        }
    }

    fn validate_storage(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.storage.data_dir.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "storage.data_dir",
                "Data directory cannot be empty",
            ));
        }
    }

    fn validate_index(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.index.cache_capacity == 0 {
            errors.push(ValidationError::new(
                "index.cache_capacity",
                "Cache capacity must be greater than 0",
            ));
        }
    }

    fn validate_chunking(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.chunking.max_chars == 0 {
            errors.push(ValidationError::new(
                "chunking.max_chars",
                "Maximum chunk size must be greater than 0",
            ));
        }

        // Overlap as large as the chunk itself would make every chunk a copy of the last
        if config.chunking.overlap_chars >= config.chunking.max_chars {
            errors.push(ValidationError::new(
                "chunking.overlap_chars",
                format!(
                    "Overlap ({}) must be smaller than max_chars ({})",
                    config.chunking.overlap_chars, config.chunking.max_chars
                ),
            ));
        }
    }

    fn validate_embedding(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.embedding.batch_size == 0 {
            errors.push(ValidationError::new(
                "embedding.batch_size",
                "Batch size must be greater than 0",
            ));
        }

        if config.embedding.model.is_empty() {
            errors.push(ValidationError::new(
                "embedding.model",
                "Model name cannot be empty",
            ));
        }
    }

    fn validate_llm(config: &Config, errors: &mut Vec<ValidationError>) {
        // If LLM is enabled, validate API key environment variable is set
        if config.llm.enabled {
            let env_var = &config.llm.api_key_env;
            match std::env::var(env_var) {
                Ok(key) if key.is_empty() => {
                    errors.push(ValidationError::new(
                        "llm.api_key_env",
                        format!("Environment variable {} is empty", env_var),
                    ));
                }
                Ok(_) => {}
                Err(_) => {
                    errors.push(ValidationError::new(
                        "llm.api_key_env",
                        format!("Environment variable {} is not set", env_var),
                    ));
                }
            }
        }

        let temp = config.llm.temperature;
        if !(0.0..=2.0).contains(&temp) {
            errors.push(ValidationError::new(
                "llm.temperature",
                format!("Temperature must be between 0.0 and 2.0, got {}", temp),
            ));
        }

        let provider = &config.llm.provider;
        let valid_providers = ["openai", "groq", "ollama"];
        if !valid_providers.contains(&provider.as_str()) {
            errors.push(ValidationError::new(
                "llm.provider",
                format!(
                    "Provider must be one of {:?}, got '{}'",
                    valid_providers, provider
                ),
            ));
        }

        if config.llm.timeout_secs == 0 {
            errors.push(ValidationError::new(
                "llm.timeout_secs",
                "Timeout must be greater than 0",
            ));
        }
    }

    fn validate_retrieval(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.retrieval.top_k_per_source == 0 {
            errors.push(ValidationError::new(
                "retrieval.top_k_per_source",
                "top_k_per_source must be greater than 0",
            ));
        }

        if config.retrieval.final_top_n == 0 {
            errors.push(ValidationError::new(
                "retrieval.final_top_n",
                "final_top_n must be greater than 0",
            ));
        }
    }

    fn validate_sources(config: &Config, errors: &mut Vec<ValidationError>) {
        let mut seen = HashSet::new();
        for source in &config.sources.all {
            if source.trim().is_empty() {
                errors.push(ValidationError::new(
                    "sources.all",
                    "Source keys cannot be empty",
                ));
            } else if !seen.insert(source.as_str()) {
                errors.push(ValidationError::new(
                    "sources.all",
                    format!("Duplicate source key: {}", source),
                ));
            }
        }
    }
}
