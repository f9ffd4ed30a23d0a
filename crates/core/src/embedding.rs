//! EmbeddingProvider trait — text to fixed-length vector.
//!
//! Injected into the retrieval scorer (query embedding) and the document
//! ingestion path (fragment embeddings). Deterministic for a fixed model
//! version. An unavailable provider degrades retrieval to "no context"
//! rather than failing the turn; during ingestion it fails the document.

use async_trait::async_trait;

use crate::error::EmbeddingError;

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// A human-readable name for this provider.
    fn name(&self) -> &str;

    /// The dimensionality of the vectors this provider produces.
    fn dimension(&self) -> usize;

    /// Embed a single text.
    async fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, EmbeddingError>;

    /// Embed a batch of texts, one vector per input, input order preserved.
    ///
    /// Default implementation embeds sequentially.
    async fn embed_batch(
        &self,
        texts: &[String],
    ) -> std::result::Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }
}
