//! Shared text normalization, tokenization, and similarity
//!
//! Both near-duplicate detection and MMR redundancy scoring go through
//! [`tokenize`] and [`jaccard`], so the two always agree on what "similar"
//! means.

use std::collections::HashSet;

/// Token set of a text: case-folded runs of alphanumerics and `_`, longer than one char
pub fn tokenize(text: &str) -> HashSet<String> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|token| token.chars().count() > 1)
        .map(|token| token.to_lowercase())
        .collect()
}

/// Jaccard similarity `|A∩B| / |A∪B|`; 0.0 when both sets are empty
pub fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }

    let (small, large) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    let intersection = small.iter().filter(|t| large.contains(*t)).count();
    let union = a.len() + b.len() - intersection;

    intersection as f64 / union as f64
}

/// Jaccard similarity of two raw texts
pub fn content_similarity(a: &str, b: &str) -> f64 {
    jaccard(&tokenize(a), &tokenize(b))
}

/// Collapse all whitespace runs to a single space, keeping case
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Lowercase and collapse all whitespace runs to a single space
pub fn normalize(text: &str) -> String {
    collapse_whitespace(text).to_lowercase()
}

/// Truncate to at most `max_chars` characters, on a char boundary
pub fn truncate_chars(text: &str, max_chars: usize) -> (&str, bool) {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => (&text[..idx], true),
        None => (text, false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_filters_short_and_folds_case() {
        let tokens = tokenize("A Rust-based RAG engine, v2 (a_b)!");
        assert!(tokens.contains("rust"));
        assert!(tokens.contains("based"));
        assert!(tokens.contains("rag"));
        assert!(tokens.contains("v2"));
        assert!(tokens.contains("a_b"));
        assert!(!tokens.contains("a"));
    }

    #[test]
    fn test_jaccard() {
        let a = tokenize("alpha beta gamma");
        let b = tokenize("beta gamma delta");
        assert!((jaccard(&a, &b) - 0.5).abs() < 1e-9);
        assert_eq!(jaccard(&a, &a), 1.0);
        assert_eq!(jaccard(&HashSet::new(), &HashSet::new()), 0.0);
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("  Hello\n\tWORLD   again "), "hello world again");
        assert_eq!(collapse_whitespace("  Hello\n\tWORLD   again "), "Hello WORLD again");
    }

    #[test]
    fn test_truncate_chars_multibyte() {
        let (head, cut) = truncate_chars("héllo wörld", 4);
        assert_eq!(head, "héll");
        assert!(cut);
        let (head, cut) = truncate_chars("short", 10);
        assert_eq!(head, "short");
        assert!(!cut);
    }
}
