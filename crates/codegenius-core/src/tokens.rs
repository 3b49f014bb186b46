/// Cheap deterministic token estimate used for batch budgeting and prompt
/// truncation. Roughly four characters per token for code-heavy text.
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(4)
}

/// Estimated total cost of a request against the batch budget: prompt tokens
/// plus the requested output cap.
pub fn estimate_request_cost(prompt: &str, max_tokens: usize) -> usize {
    estimate_tokens(prompt) + max_tokens
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
    fn cost_includes_output_cap() {
        assert_eq!(estimate_request_cost("abcdefgh", 100), 102);
    }
}
