//! Token estimation utilities.
//!
//! Uses a character-based heuristic: ~4 characters per token. This is a
//! budget bound for the context window, not a backend-exact count.

use parley_core::message::Message;

/// Estimate the token count for a string.
///
/// Heuristic: 1 token ≈ 4 characters. Rounds up. Counts characters, not
/// bytes, so non-ASCII text is not over-charged.
pub fn estimate_tokens(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    text.chars().count().div_ceil(4)
}

/// Estimate tokens for a single message. Only the content is charged.
pub fn estimate_message_tokens(message: &Message) -> usize {
    estimate_tokens(&message.content)
}

/// Estimate tokens for a slice of messages.
pub fn estimate_messages_tokens(messages: &[Message]) -> usize {
    messages.iter().map(estimate_message_tokens).sum()
}
