//! Retrieval pipeline for Parley.
//!
//! - [`chunker`] — splits extracted text into overlapping fragments
//! - [`scorer`] — ranks fragments by cosine similarity and builds the
//!   grounding context string
//! - [`ingest`] — drives a document from raw bytes to `ready` fragments

pub mod chunker;
pub mod ingest;
pub mod scorer;

pub use chunker::Chunker;
pub use ingest::{DocumentIngestor, retrieve_context};
pub use scorer::{build_context, cosine_similarity, rank_fragments};
