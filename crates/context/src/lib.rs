//! Context window management for Parley.
//!
//! Two pieces: a character-heuristic token estimator and the sliding
//! window that decides which turns fit the model's budget.

pub mod token;
pub mod window;

pub use token::{estimate_tokens, estimate_turn_tokens};
pub use window::ContextWindow;
