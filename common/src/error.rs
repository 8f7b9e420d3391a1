use async_openai::error::OpenAIError;
use thiserror::Error;
use tokio::task::JoinError;

use crate::{storage::kb_store::KnowledgeBaseError, utils::upload::UploadValidationError};

// Core internal errors
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] surrealdb::Error),
    #[error("OpenAI error: {0}")]
    OpenAI(#[from] OpenAIError),
    #[error("Knowledge base error: {0}")]
    KnowledgeBase(#[from] KnowledgeBaseError),
    #[error("Upload rejected: {0}")]
    Upload(#[from] UploadValidationError),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Extraction error: {0}")]
    Extraction(String),
    #[error("Task join error: {0}")]
    Join(#[from] JoinError),
    #[error("IoError: {0}")]
    Io(#[from] std::io::Error),
    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
    #[error("Internal service error: {0}")]
    InternalError(String),
}
