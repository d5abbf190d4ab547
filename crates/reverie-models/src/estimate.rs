//! Dependency-free token estimation.
//!
//! A precise count requires loading the model's tokenizer; the engine chunks
//! by characters and re-validates here with the same heuristic, so the only
//! requirement is that the estimate never undercounts badly enough to let an
//! over-budget input reach a model. Four characters per token is conservative
//! for English prose on every 512-token classifier in the default registry.

/// Characters assumed per token.
pub const CHARS_PER_TOKEN: usize = 4;

/// Estimate the token count of `text`.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

/// Truncate `text` so its estimated token count fits `budget`.
///
/// Cuts on a char boundary; returns the input unchanged when it already fits.
pub fn truncate_to_tokens(text: &str, budget: usize) -> &str {
    let max_chars = budget.saturating_mul(CHARS_PER_TOKEN);
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn truncate_honors_budget_and_char_boundaries() {
        let text = "aaaabbbbcccc";
        assert_eq!(truncate_to_tokens(text, 2), "aaaabbbb");
        assert_eq!(truncate_to_tokens(text, 10), text);

        // Multi-byte chars must not be split.
        let accented = "ééééé";
        let cut = truncate_to_tokens(accented, 1);
        assert_eq!(cut.chars().count(), 4);
        assert!(accented.starts_with(cut));
    }

    #[test]
    fn truncated_text_fits_the_budget() {
        let text = "x".repeat(10_000);
        let cut = truncate_to_tokens(&text, 512);
        assert!(estimate_tokens(cut) <= 512);
    }
}
