use async_openai::error::OpenAIError;
use thiserror::Error;
use tokio::task::JoinError;

/// Core internal error type. Variants line up with the error taxonomy every
/// handler and background worker classifies failures into (`NotFound`,
/// `Auth`, `BadRequest`-shaped `Validation`, `Busy`, `Conflict`, `Provider`-shaped
/// `OpenAI`/`Storage`, `Timeout`, `Internal`); never carries enough detail for a
/// caller to enumerate documents or users.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] surrealdb::Error),
    #[error("OpenAI error: {0}")]
    OpenAI(#[from] OpenAIError),
    #[error("Blob storage error: {0}")]
    Storage(#[from] object_store::Error),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Authorization error: {0}")]
    Auth(String),
    #[error("Busy: retry after {retry_after_secs}s")]
    Busy { retry_after_secs: u64 },
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Timeout: {0}")]
    Timeout(String),
    #[error("LLM parsing error: {0}")]
    LLMParsing(String),
    #[error("Task join error: {0}")]
    Join(#[from] JoinError),
    #[error("IoError: {0}")]
    Io(#[from] std::io::Error),
    #[error("Reqwest error: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
    #[error("Ingestion processing error: {0}")]
    Processing(String),
    #[error("Internal service error: {0}")]
    InternalError(String),
}

impl AppError {
    /// Whether retrying the operation that produced this error is worth attempting.
    /// Validation and auth failures are never retriable; everything else may be transient.
    pub fn is_retriable(&self) -> bool {
        !matches!(self, AppError::Validation(_) | AppError::Auth(_))
    }
}
