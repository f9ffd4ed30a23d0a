//! Error types for the Parley domain.
//!
//! Each bounded context has its own closed `thiserror` enum; callers
//! match on kinds instead of inspecting strings.

use thiserror::Error;

/// Errors from the external language-model provider.
///
/// The retryable/fatal split drives the orchestrator's retry policy:
/// `Retryable` errors are retried with backoff, `Fatal` ones escalate
/// immediately.
#[derive(Debug, Clone, Error)]
pub enum ModelError {
    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Provider returned server error (status {status_code}): {message}")]
    ServerError { status_code: u16, message: String },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Malformed request rejected by provider: {0}")]
    InvalidRequest(String),

    #[error("Provider returned an empty response")]
    EmptyResponse,

    #[error("Provider not configured: {0}")]
    NotConfigured(String),
}

impl ModelError {
    /// Whether the orchestrator may retry this error with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::Network(_) | Self::ServerError { .. }
        )
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("Conversation not found: {0}")]
    ConversationNotFound(String),

    #[error("Document not found: {0}")]
    DocumentNotFound(String),
}

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("Invalid chunker configuration: chunk_size {chunk_size} must exceed overlap {overlap}")]
    InvalidConfiguration { chunk_size: usize, overlap: usize },

    #[error("Text extraction failed for '{filename}': {reason}")]
    ExtractionFailed { filename: String, reason: String },

    #[error("Unsupported document format: {0}")]
    UnsupportedFormat(String),

    #[error("Storage error during retrieval: {0}")]
    Storage(#[from] StorageError),

    #[error("Embedding error during ingestion: {0}")]
    Embedding(#[from] EmbeddingError),
}

/// Errors from the embedding provider.
///
/// During retrieval these are soft: the turn degrades to no grounding
/// context. During document ingestion they mark the document `failed`.
#[derive(Debug, Clone, Error)]
pub enum EmbeddingError {
    #[error("Embedding provider unavailable: {0}")]
    Unavailable(String),

    #[error("Embedding generation failed: {0}")]
    GenerationFailed(String),
}

/// Errors surfaced by the turn orchestrator to its caller.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Conversation not found: {0}")]
    ConversationNotFound(String),

    #[error("Model unavailable after {attempts} attempts: {last_error}")]
    ModelUnavailable { attempts: u32, last_error: ModelError },

    #[error("Model rejected the request: {0}")]
    ModelRejected(ModelError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}
