//! Context window manager — the core selection algorithm.
//!
//! Given the ordered turn history, optional grounding context, and the
//! system prompt, selects the maximal suffix of history that fits the
//! token budget. The walk is newest-first with a hard cliff: the first
//! turn that does not fit stops the walk, and every older turn is
//! dropped even if it would individually fit. The result is therefore
//! always a contiguous chronological suffix of the input.
//!
//! Selection is deterministic and lossless for what is kept: accepted
//! turns are returned verbatim, in ascending sequence order.

use parley_core::Turn;
use tracing::warn;

use crate::token::{estimate_tokens, estimate_turn_tokens};

/// A budgeted context window. Stateless — create one and reuse it.
#[derive(Debug, Clone)]
pub struct ContextWindow {
    budget: usize,
}

impl ContextWindow {
    /// Create a window with an explicit token budget.
    pub fn new(budget: usize) -> Self {
        Self { budget }
    }

    /// Create a window from a model's maximum context size and a safety
    /// fraction: `budget = floor(max_model_tokens * safety_fraction)`.
    pub fn for_model(max_model_tokens: usize, safety_fraction: f64) -> Self {
        Self::new((max_model_tokens as f64 * safety_fraction) as usize)
    }

    /// The working token budget.
    pub fn budget(&self) -> usize {
        self.budget
    }

    /// Select the longest suffix of `history` whose cumulative token
    /// cost, plus the cost of the system prompt and grounding context,
    /// fits the budget.
    ///
    /// An empty result is legitimate: if even the most recent turn does
    /// not fit after the base cost, the caller proceeds with just the
    /// system prompt.
    pub fn select<'a>(
        &self,
        history: &'a [Turn],
        grounding: Option<&str>,
        system_prompt: &str,
    ) -> Vec<&'a Turn> {
        let mut running_total =
            estimate_tokens(system_prompt) + grounding.map_or(0, estimate_tokens);

        let mut selected: Vec<&Turn> = Vec::with_capacity(history.len());

        for turn in history.iter().rev() {
            let cost = estimate_turn_tokens(turn);
            if running_total + cost > self.budget {
                warn!(
                    budget = self.budget,
                    sequence = turn.sequence_number,
                    "Context window full, dropping this and all older turns"
                );
                break;
            }
            running_total += cost;
            selected.push(turn);
        }

        selected.reverse();
        selected
    }
}
