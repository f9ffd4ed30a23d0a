//! Conversation and Turn domain types.
//!
//! A conversation is an ordered sequence of turns keyed by a strictly
//! increasing sequence number. The sequence number, not the timestamp,
//! is the ordering authority for context construction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a conversation (chat session).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The role of a turn's author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The end user
    User,
    /// The assistant reply generated by the model
    Assistant,
    /// System instructions
    System,
}

impl Role {
    /// The wire-format role string sent to the model API.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            "system" => Ok(Self::System),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// The operational mode of a conversation, fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationMode {
    /// Free chat with no document grounding.
    Open,
    /// Retrieval runs on every turn against the linked documents.
    Grounded,
}

impl ConversationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Grounded => "grounded",
        }
    }
}

impl std::str::FromStr for ConversationMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "open" => Ok(Self::Open),
            "grounded" => Ok(Self::Grounded),
            other => Err(format!("unknown conversation mode: {other}")),
        }
    }
}

/// A single turn in a conversation. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    /// Unique turn ID
    pub id: String,

    /// Owning conversation
    pub conversation_id: ConversationId,

    /// Position within the conversation. Strictly increasing, starts at 1.
    pub sequence_number: i64,

    /// Who authored this turn
    pub role: Role,

    /// The text content
    pub content: String,

    /// Which model produced this turn (assistant turns only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Timestamp
    pub created_at: DateTime<Utc>,
}

impl Turn {
    /// Create a user turn with the given sequence number.
    pub fn user(
        conversation_id: ConversationId,
        sequence_number: i64,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            conversation_id,
            sequence_number,
            role: Role::User,
            content: content.into(),
            model: None,
            created_at: Utc::now(),
        }
    }

    /// Create an assistant turn tagged with the model that produced it.
    pub fn assistant(
        conversation_id: ConversationId,
        sequence_number: i64,
        content: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            conversation_id,
            sequence_number,
            role: Role::Assistant,
            content: content.into(),
            model: Some(model.into()),
            created_at: Utc::now(),
        }
    }
}

/// A chat session owning an ordered sequence of turns.
///
/// Turns are stored separately; this struct carries the session metadata
/// the storage layer persists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    /// Unique conversation ID
    pub id: ConversationId,

    /// Owning user
    pub user_id: String,

    /// Display title
    pub title: String,

    /// Fixed at creation; determines whether retrieval runs per turn
    pub mode: ConversationMode,

    /// Cumulative model-reported token usage across assistant replies
    pub token_count: i64,

    /// When the last turn was added
    pub last_updated_at: DateTime<Utc>,
}

impl Conversation {
    /// Create a new conversation for a user.
    pub fn new(user_id: impl Into<String>, mode: ConversationMode) -> Self {
        Self {
            id: ConversationId::new(),
            user_id: user_id.into(),
            title: "New Chat".to_string(),
            mode,
            token_count: 0,
            last_updated_at: Utc::now(),
        }
    }
}
