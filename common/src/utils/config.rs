use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::error::AppError;

#[derive(Clone, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackendKind {
    OpenAI,
    Hashed,
}

#[derive(Clone, Deserialize, Debug)]
pub struct AppConfig {
    #[serde(default)]
    pub openai_api_key: String,
    #[serde(default = "default_base_url")]
    pub openai_base_url: String,
    #[serde(default = "default_chat_model")]
    pub chat_model: String,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default = "default_embedding_dimensions")]
    pub embedding_dimensions: u32,
    #[serde(default = "default_embedding_backend")]
    pub embedding_backend: EmbeddingBackendKind,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    #[serde(default = "default_max_conversation_history")]
    pub max_conversation_history: usize,
    #[serde(default = "default_max_file_size_mb")]
    pub max_file_size_mb: u64,
    #[serde(default = "default_persist_root_path")]
    pub persist_root_path: String,
    #[serde(default = "default_retrieval_k")]
    pub retrieval_k: u8,
    #[serde(default = "default_namespace")]
    pub surrealdb_namespace: String,
    #[serde(default = "default_database")]
    pub surrealdb_database: String,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_chat_model() -> String {
    "gpt-4".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_embedding_dimensions() -> u32 {
    1536
}

fn default_embedding_backend() -> EmbeddingBackendKind {
    EmbeddingBackendKind::Hashed
}

fn default_chunk_size() -> usize {
    1000
}

fn default_chunk_overlap() -> usize {
    200
}

fn default_max_conversation_history() -> usize {
    3
}

fn default_max_file_size_mb() -> u64 {
    200
}

fn default_persist_root_path() -> String {
    "./data/knowledge_bases".to_string()
}

fn default_retrieval_k() -> u8 {
    4
}

fn default_namespace() -> String {
    "docqa".to_string()
}

fn default_database() -> String {
    "main".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            openai_api_key: String::new(),
            openai_base_url: default_base_url(),
            chat_model: default_chat_model(),
            embedding_model: default_embedding_model(),
            embedding_dimensions: default_embedding_dimensions(),
            embedding_backend: default_embedding_backend(),
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            max_conversation_history: default_max_conversation_history(),
            max_file_size_mb: default_max_file_size_mb(),
            persist_root_path: default_persist_root_path(),
            retrieval_k: default_retrieval_k(),
            surrealdb_namespace: default_namespace(),
            surrealdb_database: default_database(),
        }
    }
}

impl AppConfig {
    /// Checks cross-field constraints before any I/O happens.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.chunk_overlap >= self.chunk_size {
            return Err(AppError::Validation(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }

        if self.max_conversation_history == 0 {
            return Err(AppError::Validation(
                "max_conversation_history must be at least 1".to_string(),
            ));
        }

        if self.retrieval_k == 0 {
            return Err(AppError::Validation(
                "retrieval_k must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

pub fn get_config() -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::default())
        .build()?;

    config.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = AppConfig::default();

        assert_eq!(config.chunk_size, 1000);
        assert_eq!(config.chunk_overlap, 200);
        assert_eq!(config.max_conversation_history, 3);
        assert_eq!(config.max_file_size_mb, 200);
        assert_eq!(config.retrieval_k, 4);
        assert_eq!(config.chat_model, "gpt-4");
        assert_eq!(config.embedding_backend, EmbeddingBackendKind::Hashed);
    }

    #[test]
    fn test_validate_rejects_overlap_not_below_size() {
        let config = AppConfig {
            chunk_size: 100,
            chunk_overlap: 100,
            ..Default::default()
        };

        assert!(matches!(
            config.validate(),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn test_validate_rejects_zero_history() {
        let config = AppConfig {
            max_conversation_history: 0,
            ..Default::default()
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_accepts_defaults() {
        assert!(AppConfig::default().validate().is_ok());
    }
}
