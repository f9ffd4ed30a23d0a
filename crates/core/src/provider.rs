//! ModelProvider trait — the abstraction over the upstream LLM API.
//!
//! The orchestrator calls `complete()` with a role-tagged message list
//! and gets back the reply text plus the usage the provider reported.
//! One production implementation (OpenAI-compatible HTTP) and one
//! deterministic mock live in `parley-providers`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::conversation::{Role, Turn};
use crate::error::ModelError;

/// A role-tagged message in the wire format sent to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

impl From<&Turn> for ChatMessage {
    fn from(turn: &Turn) -> Self {
        Self {
            role: turn.role,
            content: turn.content.clone(),
        }
    }
}

/// A completed model response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Completion {
    /// The generated reply text.
    pub content: String,

    /// Which model actually responded.
    pub model: String,

    /// Total token usage reported by the provider (prompt + completion).
    /// Zero when the provider omits usage.
    pub total_tokens: i64,
}

/// The model-call collaborator.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// A human-readable name for this provider.
    fn name(&self) -> &str;

    /// Send the role-tagged messages and get a complete reply.
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
    ) -> std::result::Result<Completion, ModelError>;
}
