//! Document and Fragment domain types.
//!
//! Documents pass through `pending → chunking → ready` during ingestion,
//! with `failed` as the terminal error state. Only `ready` documents are
//! eligible for retrieval.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for an uploaded document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentId(pub String);

impl DocumentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Default for DocumentId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for DocumentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Processing status of a document during chunking and embedding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    Pending,
    Chunking,
    Ready,
    /// Terminal error state; the document is never retried.
    Failed,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Chunking => "chunking",
            Self::Ready => "ready",
            Self::Failed => "failed",
        }
    }
}

impl std::str::FromStr for ProcessingStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "chunking" => Ok(Self::Chunking),
            "ready" => Ok(Self::Ready),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown processing status: {other}")),
        }
    }
}

/// An uploaded source document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub user_id: String,
    pub filename: String,
    pub storage_path: String,
    pub status: ProcessingStatus,
    pub created_at: DateTime<Utc>,
}

impl Document {
    /// Create a freshly uploaded document in `pending` state.
    pub fn new(
        user_id: impl Into<String>,
        filename: impl Into<String>,
        storage_path: impl Into<String>,
    ) -> Self {
        Self {
            id: DocumentId::new(),
            user_id: user_id.into(),
            filename: filename.into(),
            storage_path: storage_path.into(),
            status: ProcessingStatus::Pending,
            created_at: Utc::now(),
        }
    }
}

/// A slice of a document's extracted text with its embedding vector.
/// Immutable once created; ordered within the document by `position`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fragment {
    pub id: String,
    pub document_id: DocumentId,
    pub content: String,
    /// Fixed-dimensionality embedding, persisted as an f32 blob.
    pub embedding: Vec<f32>,
    /// Position index within the document, for stable ordering.
    pub position: i64,
}

impl Fragment {
    pub fn new(
        document_id: DocumentId,
        content: impl Into<String>,
        embedding: Vec<f32>,
        position: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            document_id,
            content: content.into(),
            embedding,
            position,
        }
    }
}
