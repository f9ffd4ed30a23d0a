//! Document ingestion — raw upload bytes to `ready` fragments.
//!
//! Pipeline per document: persist the upload, extract text (PDF is the
//! only format in scope), chunk, embed, store fragments, mark `ready`.
//! Any failure after creation marks the document `failed`, a terminal
//! state; the document is never retried.

use std::path::PathBuf;
use std::sync::Arc;

use parley_core::{
    ConversationId, Document, DocumentId, EmbeddingProvider, Fragment, ProcessingStatus,
    RetrievalError,
};
use parley_storage::Store;
use tracing::{info, warn};
use uuid::Uuid;

use crate::chunker::Chunker;
use crate::scorer::{build_context, rank_fragments};

/// Drives document uploads through extraction, chunking, and embedding.
pub struct DocumentIngestor {
    store: Store,
    embedder: Arc<dyn EmbeddingProvider>,
    chunker: Chunker,
    upload_dir: PathBuf,
}

impl DocumentIngestor {
    pub fn new(
        store: Store,
        embedder: Arc<dyn EmbeddingProvider>,
        chunker: Chunker,
        upload_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            store,
            embedder,
            chunker,
            upload_dir: upload_dir.into(),
        }
    }

    /// Ingest an uploaded file. Returns the document record, which is
    /// `ready` on success. On failure after the document row exists,
    /// the row is left in `failed` state, the stored file is removed
    /// best-effort, and the error is returned.
    pub async fn ingest(
        &self,
        user_id: &str,
        filename: &str,
        bytes: &[u8],
    ) -> Result<Document, RetrievalError> {
        if !filename.to_lowercase().ends_with(".pdf") {
            return Err(RetrievalError::UnsupportedFormat(filename.to_string()));
        }

        self.store.ensure_user(user_id).await?;

        let stored_name = format!("{}_{}", Uuid::new_v4(), filename);
        let storage_path = self.upload_dir.join(&stored_name);
        let mut document = Document::new(user_id, filename, storage_path.to_string_lossy());
        self.store.create_document(&document).await?;

        if let Err(e) = tokio::fs::create_dir_all(&self.upload_dir).await {
            self.mark_failed(&document.id).await;
            return Err(RetrievalError::ExtractionFailed {
                filename: filename.to_string(),
                reason: format!("could not create upload dir: {e}"),
            });
        }
        if let Err(e) = tokio::fs::write(&storage_path, bytes).await {
            self.mark_failed(&document.id).await;
            return Err(RetrievalError::ExtractionFailed {
                filename: filename.to_string(),
                reason: format!("could not persist upload: {e}"),
            });
        }

        self.store
            .set_document_status(&document.id, ProcessingStatus::Chunking)
            .await?;

        let text = match pdf_extract::extract_text_from_mem(bytes) {
            Ok(text) => text,
            Err(e) => {
                self.discard_upload(&document.id, &storage_path).await;
                return Err(RetrievalError::ExtractionFailed {
                    filename: filename.to_string(),
                    reason: e.to_string(),
                });
            }
        };

        match self.process_text(&document.id, &text).await {
            Ok(fragment_count) => {
                self.store
                    .set_document_status(&document.id, ProcessingStatus::Ready)
                    .await?;
                document.status = ProcessingStatus::Ready;
                info!(
                    document = %document.id,
                    fragments = fragment_count,
                    "Document ingested"
                );
                Ok(document)
            }
            Err(e) => {
                self.discard_upload(&document.id, &storage_path).await;
                Err(e)
            }
        }
    }

    /// Chunk and embed extracted text, persisting the fragments.
    /// Whitespace-only chunks are discarded before embedding. Returns
    /// the number of fragments created.
    pub async fn process_text(
        &self,
        document_id: &DocumentId,
        text: &str,
    ) -> Result<usize, RetrievalError> {
        let contents: Vec<String> = self
            .chunker
            .chunk(text)
            .into_iter()
            .filter(|c| !c.trim().is_empty())
            .map(str::to_string)
            .collect();

        if contents.is_empty() {
            warn!(document = %document_id, "No usable content after chunking");
            return Ok(0);
        }

        let embeddings = self.embedder.embed_batch(&contents).await?;

        let fragments: Vec<Fragment> = contents
            .into_iter()
            .zip(embeddings)
            .enumerate()
            .map(|(i, (content, embedding))| {
                Fragment::new(document_id.clone(), content, embedding, i as i64)
            })
            .collect();

        self.store.insert_fragments(&fragments).await?;
        Ok(fragments.len())
    }

    async fn mark_failed(&self, id: &DocumentId) {
        if let Err(e) = self
            .store
            .set_document_status(id, ProcessingStatus::Failed)
            .await
        {
            warn!(document = %id, error = %e, "Could not mark document failed");
        }
    }

    /// Mark the document failed and best-effort remove its stored file.
    async fn discard_upload(&self, id: &DocumentId, path: &std::path::Path) {
        self.mark_failed(id).await;
        if let Err(e) = tokio::fs::remove_file(path).await {
            warn!(path = %path.display(), error = %e, "Could not remove stored file");
        }
    }
}

/// Retrieve grounding context for a query against all `ready` documents
/// linked to a conversation.
///
/// Every absence degrades to `Ok(None)`: no links, no ready documents,
/// no fragments, or a whitespace-only context. Only storage failures
/// and embedding failures surface as errors — and the orchestrator
/// treats the latter as soft.
pub async fn retrieve_context(
    store: &Store,
    embedder: &dyn EmbeddingProvider,
    conversation_id: &ConversationId,
    query: &str,
    top_k: usize,
) -> Result<Option<String>, RetrievalError> {
    let documents = store.documents_for_conversation(conversation_id).await?;

    // Not-yet-ready documents are absent, not blocking.
    let ready_ids: Vec<DocumentId> = documents
        .iter()
        .filter(|d| d.status == ProcessingStatus::Ready)
        .map(|d| d.id.clone())
        .collect();

    if ready_ids.is_empty() {
        return Ok(None);
    }

    let fragments = store.fragments_for_documents(&ready_ids).await?;
    if fragments.is_empty() {
        return Ok(None);
    }

    let query_embedding = embedder.embed(query).await?;
    let ranked = rank_fragments(&query_embedding, &fragments, top_k);
    Ok(build_context(&ranked))
}
