//! Per-conversation serialization.
//!
//! Two concurrent sends into the same conversation must not interleave:
//! both would read the same next sequence number and one insert would
//! violate the uniqueness constraint. Each conversation gets its own
//! async mutex; different conversations proceed in parallel.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use parley_core::ConversationId;
use tokio::sync::OwnedMutexGuard;

/// A map of per-conversation locks. Cheap to clone; clones share state.
#[derive(Clone, Default)]
pub struct ConversationLocks {
    inner: Arc<Mutex<HashMap<ConversationId, Arc<tokio::sync::Mutex<()>>>>>,
}

impl ConversationLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for one conversation, creating it on first use.
    /// The guard is owned so it can be held across await points.
    pub async fn acquire(&self, id: &ConversationId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().expect("lock map poisoned");
            map.entry(id.clone())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    /// Drop the lock entry for a deleted conversation.
    pub fn remove(&self, id: &ConversationId) {
        self.inner.lock().expect("lock map poisoned").remove(id);
    }
}
