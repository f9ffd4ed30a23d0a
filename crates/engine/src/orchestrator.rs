//! The turn orchestrator.
//!
//! `send_message` runs the per-turn pipeline under the conversation's
//! lock: persist the user turn, retrieve grounding context (grounded
//! mode only, failures degrade to no context), select the history
//! window, call the model with retries, persist the reply and the
//! reported usage. A failed model call leaves the user turn in place;
//! on the next send the model sees the full history including it.

use std::sync::Arc;
use std::time::Duration;

use parley_config::AppConfig;
use parley_context::ContextWindow;
use parley_core::{
    ChatMessage, Completion, Conversation, ConversationId, ConversationMode, DocumentId,
    EmbeddingProvider, EngineError, ModelError, ModelProvider, Turn,
};
use parley_retrieval::retrieve_context;
use parley_storage::Store;
use tracing::{debug, info, warn};

use crate::lock::ConversationLocks;

/// Derived titles keep this many characters of the first message.
const TITLE_MAX_CHARS: usize = 50;

/// Orchestrator tuning knobs, usually derived from [`AppConfig`].
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// System instructions prepended to every model call.
    pub system_prompt: String,

    /// How many top-scored fragments make up the grounding context.
    pub top_k: usize,

    /// Days a pre-conversation upload stays eligible for linking.
    pub pending_upload_ttl_days: i64,

    /// Total model call attempts per turn, including the first.
    pub max_attempts: u32,

    /// Base delay before the first retry; doubles each attempt.
    pub backoff: Duration,
}

impl EngineSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            system_prompt: config.model.system_prompt.clone(),
            top_k: config.retrieval.top_k,
            pending_upload_ttl_days: config.retrieval.pending_upload_ttl_days,
            max_attempts: 3,
            backoff: Duration::from_secs(1),
        }
    }
}

/// The result of one completed turn.
#[derive(Debug, Clone)]
pub struct ChatExchange {
    pub user_turn: Turn,
    pub assistant_turn: Turn,
    /// Whether document context was injected into this turn.
    pub grounded: bool,
}

/// The conversation engine. Cheap to clone; clones share the store,
/// providers, and lock map.
#[derive(Clone)]
pub struct Engine {
    store: Store,
    model: Arc<dyn ModelProvider>,
    embedder: Arc<dyn EmbeddingProvider>,
    window: ContextWindow,
    settings: EngineSettings,
    locks: ConversationLocks,
}

impl Engine {
    pub fn new(
        store: Store,
        model: Arc<dyn ModelProvider>,
        embedder: Arc<dyn EmbeddingProvider>,
        window: ContextWindow,
        settings: EngineSettings,
    ) -> Self {
        Self {
            store,
            model,
            embedder,
            window,
            settings,
            locks: ConversationLocks::new(),
        }
    }

    /// Create a conversation. In grounded mode the given documents are
    /// linked, along with any pending uploads the user made before this
    /// conversation existed.
    pub async fn create_conversation(
        &self,
        user_id: &str,
        mode: ConversationMode,
        document_ids: &[DocumentId],
    ) -> Result<Conversation, EngineError> {
        self.store.ensure_user(user_id).await?;

        let conversation = Conversation::new(user_id, mode);
        self.store.create_conversation(&conversation).await?;

        if mode == ConversationMode::Grounded {
            for doc_id in document_ids {
                // Unknown or foreign documents are skipped, not fatal.
                match self.store.get_document(doc_id).await? {
                    Some(doc) if doc.user_id == user_id => {
                        self.store.link_document(&conversation.id, doc_id).await?;
                    }
                    _ => {
                        warn!(
                            conversation = %conversation.id,
                            document = %doc_id,
                            "Skipping unknown document at creation"
                        );
                    }
                }
            }
            let pending = self
                .store
                .take_pending_uploads(user_id, self.settings.pending_upload_ttl_days)
                .await?;
            for doc_id in &pending {
                self.store.link_document(&conversation.id, doc_id).await?;
            }
            if !pending.is_empty() {
                info!(
                    conversation = %conversation.id,
                    count = pending.len(),
                    "Linked pending uploads"
                );
            }
        }

        info!(conversation = %conversation.id, user = user_id, mode = mode.as_str(), "Conversation created");
        Ok(conversation)
    }

    /// All of a user's conversations, most recently updated first.
    pub async fn list_conversations(&self, user_id: &str) -> Result<Vec<Conversation>, EngineError> {
        Ok(self.store.list_conversations(user_id).await?)
    }

    /// A conversation with its full turn history.
    pub async fn history(
        &self,
        id: &ConversationId,
    ) -> Result<(Conversation, Vec<Turn>), EngineError> {
        let conversation = self
            .store
            .get_conversation(id)
            .await?
            .ok_or_else(|| EngineError::ConversationNotFound(id.to_string()))?;
        let turns = self.store.turns_for_conversation(id).await?;
        Ok((conversation, turns))
    }

    /// Delete a conversation, its turns, and any documents no other
    /// conversation still links. Stored files of deleted documents are
    /// removed best-effort.
    pub async fn delete_conversation(&self, id: &ConversationId) -> Result<(), EngineError> {
        let _guard = self.locks.acquire(id).await;

        let documents = self.store.documents_for_conversation(id).await?;
        let orphaned = self.store.delete_orphaned_documents(id).await?;

        for doc in documents.iter().filter(|d| orphaned.contains(&d.id)) {
            if let Err(e) = tokio::fs::remove_file(&doc.storage_path).await {
                warn!(path = %doc.storage_path, error = %e, "Could not remove stored file");
            }
        }

        if !self.store.delete_conversation(id).await? {
            return Err(EngineError::ConversationNotFound(id.to_string()));
        }

        self.locks.remove(id);
        info!(conversation = %id, orphaned = orphaned.len(), "Conversation deleted");
        Ok(())
    }

    /// Run one full turn: persist the user message, build the model
    /// context, get a reply, persist it.
    pub async fn send_message(
        &self,
        id: &ConversationId,
        content: &str,
    ) -> Result<ChatExchange, EngineError> {
        let _guard = self.locks.acquire(id).await;

        let conversation = self
            .store
            .get_conversation(id)
            .await?
            .ok_or_else(|| EngineError::ConversationNotFound(id.to_string()))?;

        // The user turn is durable before anything fallible runs.
        let sequence = self.store.next_sequence_number(id).await?;
        let user_turn = Turn::user(id.clone(), sequence, content);
        self.store.append_turn(&user_turn).await?;

        if sequence == 1 {
            let title: String = content.chars().take(TITLE_MAX_CHARS).collect();
            self.store.set_conversation_title(id, title.trim()).await?;
        }

        let grounding = if conversation.mode == ConversationMode::Grounded {
            match retrieve_context(
                &self.store,
                self.embedder.as_ref(),
                id,
                content,
                self.settings.top_k,
            )
            .await
            {
                Ok(context) => context,
                Err(e) => {
                    warn!(conversation = %id, error = %e, "Retrieval failed, continuing without grounding");
                    None
                }
            }
        } else {
            None
        };
        let grounded = grounding.is_some();

        let history = self.store.turns_for_conversation(id).await?;
        let selected = self
            .window
            .select(&history, grounding.as_deref(), &self.settings.system_prompt);
        debug!(
            conversation = %id,
            history = history.len(),
            selected = selected.len(),
            grounded,
            "Context window selected"
        );

        // Grounding context rides inside the single system message.
        let system = match &grounding {
            Some(context) => format!(
                "CONTEXT:\n---\n{context}\n---\n\n{}",
                self.settings.system_prompt
            ),
            None => self.settings.system_prompt.clone(),
        };
        let mut messages = vec![ChatMessage::system(system)];
        messages.extend(selected.iter().map(|turn| ChatMessage::from(*turn)));

        let completion = self.call_with_retry(messages).await?;

        let assistant_turn = Turn::assistant(
            id.clone(),
            sequence + 1,
            completion.content,
            completion.model,
        );
        self.store.append_turn(&assistant_turn).await?;
        self.store.add_token_usage(id, completion.total_tokens).await?;

        Ok(ChatExchange {
            user_turn,
            assistant_turn,
            grounded,
        })
    }

    /// Call the model, retrying transient failures with exponential
    /// backoff. Fatal errors escalate immediately.
    async fn call_with_retry(&self, messages: Vec<ChatMessage>) -> Result<Completion, EngineError> {
        let mut last_error: Option<ModelError> = None;

        for attempt in 1..=self.settings.max_attempts {
            match self.model.complete(messages.clone()).await {
                Ok(completion) => return Ok(completion),
                Err(e) if e.is_retryable() => {
                    warn!(
                        attempt,
                        max_attempts = self.settings.max_attempts,
                        error = %e,
                        "Model call failed"
                    );
                    last_error = Some(e);
                    if attempt < self.settings.max_attempts {
                        let delay = self.settings.backoff * 2u32.pow(attempt - 1);
                        tokio::time::sleep(delay).await;
                    }
                }
                Err(e) => return Err(EngineError::ModelRejected(e)),
            }
        }

        Err(EngineError::ModelUnavailable {
            attempts: self.settings.max_attempts,
            last_error: last_error
                .unwrap_or(ModelError::NotConfigured("No attempts were made".into())),
        })
    }
}
