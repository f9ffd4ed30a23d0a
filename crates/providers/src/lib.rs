//! Provider implementations for Parley.
//!
//! The production providers speak the OpenAI-compatible wire format,
//! which covers Groq, OpenAI, OpenRouter, Ollama, vLLM, and most other
//! hosted endpoints. The [`mock`] module holds deterministic test
//! doubles used across the workspace.

pub mod mock;
pub mod openai_compat;

pub use mock::{HashEmbedder, MockModelProvider};
pub use openai_compat::{OpenAiCompatEmbedder, OpenAiCompatProvider};
