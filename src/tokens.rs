//! Fast local token estimation.
//!
//! Chunk selection and compression budgets run on this heuristic; the exact
//! token count is a downstream concern of the model provider. The estimate
//! divides character length by a language-aware ratio, which tracks real
//! tokenizers closely enough for budget arithmetic.

use crate::lang;

/// Estimate the token cost of `text` for the given language tag.
/// Never returns 0 for non-empty input.
pub fn estimate_tokens(text: &str, language: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    let ratio = lang::chars_per_token(language);
    ((text.len() as f32 / ratio).ceil() as usize).max(1)
}

/// Truncate `text` at line boundaries so the estimate stays at or below
/// `max_tokens`. Returns the prefix; the cut is allowed to break syntax.
pub fn truncate_to_tokens(text: &str, language: &str, max_tokens: usize) -> String {
    if estimate_tokens(text, language) <= max_tokens {
        return text.to_string();
    }
    let mut out = String::new();
    for line in text.lines() {
        let mut candidate = out.clone();
        if !candidate.is_empty() {
            candidate.push('\n');
        }
        candidate.push_str(line);
        if estimate_tokens(&candidate, language) > max_tokens {
            break;
        }
        out = candidate;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_is_zero() {
        assert_eq!(estimate_tokens("", "rust"), 0);
    }

    #[test]
    fn nonempty_is_at_least_one() {
        assert_eq!(estimate_tokens("x", "rust"), 1);
    }

    #[test]
    fn estimate_scales_with_length() {
        let short = estimate_tokens("fn main() {}", "rust");
        let long = estimate_tokens(&"fn main() {}\n".repeat(50), "rust");
        assert!(long > short * 10);
    }

    #[test]
    fn truncation_respects_budget_and_lines() {
        let text = (0..100).map(|i| format!("line number {i}")).collect::<Vec<_>>().join("\n");
        let cut = truncate_to_tokens(&text, "rust", 20);
        assert!(estimate_tokens(&cut, "rust") <= 20);
        assert!(text.starts_with(&cut));
        // Cut lands on a line boundary
        assert!(cut.is_empty() || text.lines().any(|l| cut.ends_with(l)));
    }

    #[test]
    fn truncation_is_noop_under_budget() {
        let text = "short text";
        assert_eq!(truncate_to_tokens(text, "rust", 100), text);
    }
}
