//! Retrieval scoring — cosine similarity over fragment embeddings.
//!
//! A linear scan, not an ANN index: candidate sets are the fragments of
//! the documents linked to one conversation, small enough to score
//! exhaustively and deterministically.

use parley_core::Fragment;
use tracing::warn;

/// How many top-scored fragments make up the grounding context.
pub const DEFAULT_TOP_K: usize = 5;

/// Compute cosine similarity between two vectors.
///
/// Returns a value in [-1, 1]. Returns 0.0 for empty, mismatched, or
/// zero-magnitude vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (x, y) in a.iter().zip(b.iter()) {
        let x = *x as f64;
        let y = *y as f64;
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < 1e-10 {
        return 0.0;
    }

    (dot / denom) as f32
}

/// Rank fragments by descending cosine similarity to the query vector
/// and keep the top `k`.
///
/// The sort is stable, so ties keep their original scan order. A
/// fragment whose stored vector has the wrong dimension is skipped and
/// logged rather than failing the whole ranking.
pub fn rank_fragments<'a>(
    query: &[f32],
    candidates: &'a [Fragment],
    k: usize,
) -> Vec<(&'a Fragment, f32)> {
    let mut scored: Vec<(&Fragment, f32)> = candidates
        .iter()
        .filter_map(|frag| {
            if frag.embedding.len() != query.len() || frag.embedding.is_empty() {
                warn!(
                    fragment = %frag.id,
                    stored_dim = frag.embedding.len(),
                    query_dim = query.len(),
                    "Skipping fragment with undecodable embedding"
                );
                return None;
            }
            Some((frag, cosine_similarity(query, &frag.embedding)))
        })
        .collect();

    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(k);
    scored
}

/// Build the grounding context string from ranked fragments: contents
/// joined by blank lines in descending-score order. A result that is
/// empty or all whitespace is normalized to `None` — "no grounding
/// available" is a state, not an error.
pub fn build_context(ranked: &[(&Fragment, f32)]) -> Option<String> {
    if ranked.is_empty() {
        return None;
    }
    let context = ranked
        .iter()
        .map(|(frag, _)| frag.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");

    if context.trim().is_empty() {
        None
    } else {
        Some(context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::DocumentId;

    fn fragment(content: &str, embedding: Vec<f32>, position: i64) -> Fragment {
        Fragment::new(DocumentId::from("doc-1"), content, embedding, position)
    }

    #[test]
    fn cosine_identical_vectors() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_orthogonal_vectors() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn cosine_opposite_vectors() {
        let a = vec![1.0, 0.0];
        let b = vec![-1.0, 0.0];
        assert!((cosine_similarity(&a, &b) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_degenerate_inputs_are_zero() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0, 2.0, 3.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn ranks_by_descending_similarity() {
        let query = vec![1.0, 0.0, 0.0];
        let candidates = vec![
            fragment("orthogonal", vec![0.0, 1.0, 0.0], 0),
            fragment("identical", vec![1.0, 0.0, 0.0], 1),
            fragment("partial", vec![0.5, 0.5, 0.0], 2),
        ];

        let ranked = rank_fragments(&query, &candidates, 5);
        let contents: Vec<&str> = ranked.iter().map(|(f, _)| f.content.as_str()).collect();
        assert_eq!(contents, vec!["identical", "partial", "orthogonal"]);
    }

    #[test]
    fn keeps_only_top_k() {
        let query = vec![1.0, 0.0];
        let candidates: Vec<Fragment> = (0..10)
            .map(|i| fragment(&format!("frag {i}"), vec![1.0, i as f32 * 0.1], i))
            .collect();

        let ranked = rank_fragments(&query, &candidates, DEFAULT_TOP_K);
        assert_eq!(ranked.len(), 5);
    }

    #[test]
    fn ties_keep_scan_order() {
        let query = vec![1.0, 0.0];
        let candidates = vec![
            fragment("first", vec![2.0, 0.0], 0),
            fragment("second", vec![3.0, 0.0], 1),
            fragment("third", vec![1.0, 0.0], 2),
        ];

        // All three have similarity 1.0; stable sort preserves order.
        let ranked = rank_fragments(&query, &candidates, 5);
        let contents: Vec<&str> = ranked.iter().map(|(f, _)| f.content.as_str()).collect();
        assert_eq!(contents, vec!["first", "second", "third"]);
    }

    #[test]
    fn skips_wrong_dimension_fragments() {
        let query = vec![1.0, 0.0];
        let candidates = vec![
            fragment("good", vec![1.0, 0.0], 0),
            fragment("bad", vec![1.0], 1),
            fragment("empty", vec![], 2),
        ];

        let ranked = rank_fragments(&query, &candidates, 5);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].0.content, "good");
    }

    #[test]
    fn empty_candidates_rank_empty() {
        let ranked = rank_fragments(&[1.0, 0.0], &[], 5);
        assert!(ranked.is_empty());
        assert!(build_context(&ranked).is_none());
    }

    #[test]
    fn context_joins_in_score_order() {
        let query = vec![1.0, 0.0];
        let candidates = vec![
            fragment("weaker match", vec![0.5, 0.5], 0),
            fragment("strong match", vec![1.0, 0.0], 1),
        ];

        let ranked = rank_fragments(&query, &candidates, 5);
        let context = build_context(&ranked).unwrap();
        assert_eq!(context, "strong match\n\nweaker match");
    }

    #[test]
    fn whitespace_only_context_is_none() {
        let query = vec![1.0, 0.0];
        let candidates = vec![
            fragment("   ", vec![1.0, 0.0], 0),
            fragment("\n\t", vec![0.9, 0.1], 1),
        ];

        let ranked = rank_fragments(&query, &candidates, 5);
        assert!(build_context(&ranked).is_none());
    }
}
