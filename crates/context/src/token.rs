//! Token estimation utilities.
//!
//! Uses a character-based heuristic: ~4 characters per token, rounded
//! down. A dedicated tokenizer would be exact, but the heuristic is a
//! safe conservative estimate for BPE tokenizers on English text, and
//! the safety fraction applied to the budget absorbs the slack.

use parley_core::Turn;

/// Estimate the token count for a string.
///
/// Heuristic: 1 token ≈ 4 characters. Rounds down; empty text is 0.
pub fn estimate_tokens(text: &str) -> usize {
    text.len() / 4
}

/// Estimate tokens for a turn's content.
pub fn estimate_turn_tokens(turn: &Turn) -> usize {
    estimate_tokens(&turn.content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::ConversationId;

    #[test]
    fn empty_string_is_zero() {
        assert_eq!(estimate_tokens(""), 0);
    }

    #[test]
    fn four_chars_is_one_token() {
        assert_eq!(estimate_tokens("test"), 1);
    }

    #[test]
    fn five_chars_rounds_down() {
        assert_eq!(estimate_tokens("hello"), 1);
    }

    #[test]
    fn three_chars_rounds_to_zero() {
        assert_eq!(estimate_tokens("abc"), 0);
    }

    #[test]
    fn hundred_chars() {
        let text = "a".repeat(100);
        assert_eq!(estimate_tokens(&text), 25);
    }

    #[test]
    fn turn_cost_is_content_cost() {
        let turn = Turn::user(ConversationId::new(), 1, "x".repeat(400));
        assert_eq!(estimate_turn_tokens(&turn), 100);
    }
}
