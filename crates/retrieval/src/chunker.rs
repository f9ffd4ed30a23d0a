//! Fixed-width overlapping text windows.
//!
//! The start offset advances by `chunk_size - overlap` each step, so a
//! degenerate configuration with `overlap >= chunk_size` would advance
//! by zero or backwards and loop forever. Construction rejects it;
//! `parley-config` validates the same invariant at startup.

use parley_core::RetrievalError;

/// A validated chunking configuration.
#[derive(Debug, Clone)]
pub struct Chunker {
    chunk_size: usize,
    overlap: usize,
}

impl Chunker {
    pub const DEFAULT_CHUNK_SIZE: usize = 512;
    pub const DEFAULT_OVERLAP: usize = 50;

    /// Create a chunker, validating `chunk_size > overlap >= 0` and
    /// `chunk_size > 0`.
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self, RetrievalError> {
        if chunk_size == 0 || overlap >= chunk_size {
            return Err(RetrievalError::InvalidConfiguration {
                chunk_size,
                overlap,
            });
        }
        Ok(Self {
            chunk_size,
            overlap,
        })
    }

    /// The default 512/50 configuration.
    pub fn with_defaults() -> Self {
        // Constants satisfy the invariant by inspection.
        Self {
            chunk_size: Self::DEFAULT_CHUNK_SIZE,
            overlap: Self::DEFAULT_OVERLAP,
        }
    }

    /// Split `text` into overlapping windows. The final partial window
    /// is included; empty input yields no windows. Window boundaries
    /// are snapped back to `char` boundaries so slicing never panics
    /// on multi-byte text.
    pub fn chunk<'a>(&self, text: &'a str) -> Vec<&'a str> {
        if text.is_empty() {
            return Vec::new();
        }

        let advance = self.chunk_size - self.overlap;
        let mut chunks = Vec::new();
        let mut start = 0;

        while start < text.len() {
            let end = floor_char_boundary(text, (start + self.chunk_size).min(text.len()));
            chunks.push(&text[start..end]);
            if end >= text.len() {
                break;
            }
            // Snapping the next start upward guarantees forward progress
            // even when the raw advance lands inside a multi-byte char.
            start = ceil_char_boundary(text, start + advance);
        }

        chunks
    }
}

/// Largest char boundary not greater than `index`.
fn floor_char_boundary(text: &str, mut index: usize) -> usize {
    if index >= text.len() {
        return text.len();
    }
    while !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

/// Smallest char boundary not less than `index`.
fn ceil_char_boundary(text: &str, mut index: usize) -> usize {
    if index >= text.len() {
        return text.len();
    }
    while !text.is_char_boundary(index) {
        index += 1;
    }
    index
}
