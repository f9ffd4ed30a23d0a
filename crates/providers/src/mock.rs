//! Deterministic test doubles for the provider traits.
//!
//! Used by unit tests across the workspace; kept in the library so
//! downstream crates can script model behavior without a network.

use std::collections::VecDeque;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Mutex;

use async_trait::async_trait;
use parley_core::{ChatMessage, Completion, EmbeddingError, EmbeddingProvider, ModelError,
    ModelProvider};

/// A model provider that replays a scripted sequence of outcomes.
///
/// Each `complete()` call consumes the next scripted outcome; once the
/// script is exhausted the last outcome repeats. Records every call so
/// tests can assert on retry behavior.
pub struct MockModelProvider {
    script: Mutex<VecDeque<std::result::Result<Completion, ModelError>>>,
    last: Mutex<Option<std::result::Result<Completion, ModelError>>>,
    call_count: Mutex<usize>,
    last_messages: Mutex<Vec<ChatMessage>>,
}

impl MockModelProvider {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            last: Mutex::new(None),
            call_count: Mutex::new(0),
            last_messages: Mutex::new(Vec::new()),
        }
    }

    /// A provider that always replies with the given text.
    pub fn always(reply: impl Into<String>) -> Self {
        Self::new().then_reply(reply)
    }

    /// Queue a successful completion.
    pub fn then_reply(self, content: impl Into<String>) -> Self {
        self.script.lock().unwrap().push_back(Ok(Completion {
            content: content.into(),
            model: "mock-model".into(),
            total_tokens: 10,
        }));
        self
    }

    /// Queue a failure.
    pub fn then_fail(self, error: ModelError) -> Self {
        self.script.lock().unwrap().push_back(Err(error));
        self
    }

    /// How many times `complete()` has been called.
    pub fn calls(&self) -> usize {
        *self.call_count.lock().unwrap()
    }

    /// The message list from the most recent `complete()` call.
    pub fn last_messages(&self) -> Vec<ChatMessage> {
        self.last_messages.lock().unwrap().clone()
    }
}

impl Default for MockModelProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ModelProvider for MockModelProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
    ) -> std::result::Result<Completion, ModelError> {
        *self.call_count.lock().unwrap() += 1;
        *self.last_messages.lock().unwrap() = messages;

        let mut last = self.last.lock().unwrap();
        if let Some(outcome) = self.script.lock().unwrap().pop_front() {
            *last = Some(outcome.clone());
            return outcome;
        }
        last.clone()
            .unwrap_or(Err(ModelError::NotConfigured("Empty mock script".into())))
    }
}

/// A deterministic embedder that derives vectors from a hash of the
/// input text. Same text, same vector; different texts almost surely
/// differ. No semantic meaning, but enough structure for ranking tests.
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    fn name(&self) -> &str {
        "hash"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, EmbeddingError> {
        let vector = (0..self.dimension)
            .map(|i| {
                let mut hasher = DefaultHasher::new();
                text.hash(&mut hasher);
                i.hash(&mut hasher);
                // Map the hash onto [-1, 1].
                (hasher.finish() % 2000) as f32 / 1000.0 - 1.0
            })
            .collect();
        Ok(vector)
    }
}
