use anyhow::{bail, Context, Result};
use std::env;
use std::str::FromStr;

pub const DEFAULT_EMBEDDING_MODEL: &str = "all-MiniLM-L6-v2";
pub const DEFAULT_LLM_PROVIDER: &str = "openrouter";
pub const DEFAULT_LLM_MODEL: &str = "openai/gpt-3.5-turbo";
pub const DEFAULT_OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";
pub const DEFAULT_QDRANT_URL: &str = "http://localhost:6334";
pub const DEFAULT_COLLECTION_NAME: &str = "syllabus_documents";
pub const DEFAULT_CHUNK_SIZE: usize = 1000;
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;
pub const DEFAULT_TOP_K: usize = 6;
pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1:8501";

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Local embedding model name
    pub embedding_model: String,
    pub llm_provider: String,
    pub llm_model: String,
    pub openrouter_api_key: Option<String>,
    pub openrouter_base_url: String,
    pub qdrant_url: String,
    pub qdrant_api_key: Option<String>,
    /// Collection holding every uploaded document
    pub collection_name: String,
    /// Maximum chunk length in characters
    pub chunk_size: usize,
    /// Characters shared between neighbouring chunks
    pub chunk_overlap: usize,
    /// Number of chunks handed to the language model
    pub top_k: usize,
    pub bind_address: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            llm_provider: DEFAULT_LLM_PROVIDER.to_string(),
            llm_model: DEFAULT_LLM_MODEL.to_string(),
            openrouter_api_key: None,
            openrouter_base_url: DEFAULT_OPENROUTER_BASE_URL.to_string(),
            qdrant_url: DEFAULT_QDRANT_URL.to_string(),
            qdrant_api_key: None,
            collection_name: DEFAULT_COLLECTION_NAME.to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
            top_k: DEFAULT_TOP_K,
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
        }
    }
}

impl AppConfig {
    /// Create a new configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = AppConfig::default();
        let string = |key: &str, default: String| lookup(key).unwrap_or(default);
        let optional = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Ok(AppConfig {
            embedding_model: string("EMBEDDING_MODEL_NAME", defaults.embedding_model),
            llm_provider: string("LLM_PROVIDER", defaults.llm_provider),
            llm_model: string("LLM_MODEL", defaults.llm_model),
            openrouter_api_key: optional("OPENROUTER_API_KEY"),
            openrouter_base_url: string("OPENROUTER_BASE_URL", defaults.openrouter_base_url),
            qdrant_url: string("QDRANT_URL", defaults.qdrant_url),
            qdrant_api_key: optional("QDRANT_API_KEY"),
            collection_name: string("COLLECTION_NAME", defaults.collection_name),
            chunk_size: parse_var(&lookup, "CHUNK_SIZE", defaults.chunk_size)?,
            chunk_overlap: parse_var(&lookup, "CHUNK_OVERLAP", defaults.chunk_overlap)?,
            top_k: parse_var(&lookup, "TOP_K_RESULTS", defaults.top_k)?,
            bind_address: string("BIND_ADDRESS", defaults.bind_address),
        })
    }

    /// Check that the configuration can drive the whole pipeline
    pub fn validate(&self) -> Result<()> {
        if self.llm_provider != DEFAULT_LLM_PROVIDER {
            bail!(
                "Unsupported LLM_PROVIDER '{}'. This project supports 'openrouter' only.",
                self.llm_provider
            );
        }

        if self.openrouter_api_key.is_none() {
            bail!(
                "OPENROUTER_API_KEY is required when using OpenRouter LLM. \
                 Please set it in your .env file."
            );
        }

        if self.chunk_size == 0 {
            bail!("CHUNK_SIZE must be greater than zero");
        }

        if self.chunk_overlap >= self.chunk_size {
            bail!(
                "CHUNK_OVERLAP ({}) must be smaller than CHUNK_SIZE ({})",
                self.chunk_overlap,
                self.chunk_size
            );
        }

        if self.top_k == 0 {
            bail!("TOP_K_RESULTS must be greater than zero");
        }

        Ok(())
    }

    /// Lines describing the current settings
    pub fn describe(&self) -> Vec<String> {
        vec![
            format!("Embeddings: fastembed ({})", self.embedding_model),
            format!("LLM Provider: {}", self.llm_provider),
            format!("LLM Model: {}", self.llm_model),
        ]
    }
}

fn parse_var<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid value for {}: '{}'", key, raw)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> Result<AppConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.embedding_model, "all-MiniLM-L6-v2");
        assert_eq!(config.llm_model, "openai/gpt-3.5-turbo");
        assert_eq!(config.collection_name, "syllabus_documents");
        assert_eq!(config.chunk_size, 1000);
        assert_eq!(config.chunk_overlap, 200);
        assert_eq!(config.top_k, 6);
        assert!(config.openrouter_api_key.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("LLM_MODEL", "z-ai/glm-4.5"),
            ("CHUNK_SIZE", "500"),
            ("CHUNK_OVERLAP", " 50 "),
            ("TOP_K_RESULTS", "3"),
            ("OPENROUTER_API_KEY", "sk-test"),
        ])
        .unwrap();
        assert_eq!(config.llm_model, "z-ai/glm-4.5");
        assert_eq!(config.chunk_size, 500);
        assert_eq!(config.chunk_overlap, 50);
        assert_eq!(config.top_k, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_number_names_variable() {
        let err = config_from(&[("CHUNK_SIZE", "big")]).unwrap_err();
        assert!(err.to_string().contains("CHUNK_SIZE"));
    }

    #[test]
    fn test_validate_requires_api_key() {
        let config = config_from(&[("OPENROUTER_API_KEY", "  ")]).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("OPENROUTER_API_KEY"));
    }

    #[test]
    fn test_validate_rejects_other_providers() {
        let config = config_from(&[("LLM_PROVIDER", "openai"), ("OPENROUTER_API_KEY", "k")]).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("openai"));
    }

    #[test]
    fn test_validate_rejects_overlap_not_smaller_than_size() {
        let config = config_from(&[
            ("OPENROUTER_API_KEY", "k"),
            ("CHUNK_SIZE", "100"),
            ("CHUNK_OVERLAP", "100"),
        ])
        .unwrap();
        assert!(config.validate().is_err());
    }
}
