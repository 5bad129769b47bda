/// Estimate token count using the chars/4 heuristic.
#[must_use]
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count() / 4
}

/// Largest character count whose estimate stays within `tokens`.
#[must_use]
pub fn max_chars_for_tokens(tokens: usize) -> usize {
    tokens.saturating_mul(4).saturating_add(3)
}
