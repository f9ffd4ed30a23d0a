//! Turn orchestration for Parley.
//!
//! The [`Engine`] owns the full lifecycle of a conversation: creation
//! with document linking, the per-turn pipeline (persist, retrieve,
//! select context, call the model, persist the reply), and deletion
//! with orphaned-document cleanup.

pub mod lock;
pub mod orchestrator;

pub use orchestrator::{ChatExchange, Engine, EngineSettings};
