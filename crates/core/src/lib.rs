//! Core domain types and traits for Parley.
//!
//! This crate defines the vocabulary shared by every other crate:
//! conversations and turns, documents and fragments, the provider
//! traits for the external model and embedding services, and the
//! closed error taxonomy.

pub mod conversation;
pub mod document;
pub mod embedding;
pub mod error;
pub mod provider;

pub use conversation::{Conversation, ConversationId, ConversationMode, Role, Turn};
pub use document::{Document, DocumentId, Fragment, ProcessingStatus};
pub use embedding::EmbeddingProvider;
pub use error::{EmbeddingError, EngineError, ModelError, RetrievalError, StorageError};
pub use provider::{ChatMessage, Completion, ModelProvider};
