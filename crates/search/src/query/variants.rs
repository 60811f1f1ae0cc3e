//! Deterministic query variants (no model call)

use super::QueryGenerator;
use std::collections::HashSet;

/// Drop repeated whitespace tokens (case-insensitive), keeping first occurrences
pub fn dedup_tokens_variant(query: &str) -> String {
    let mut seen = HashSet::new();
    query
        .split_whitespace()
        .filter(|token| seen.insert(token.to_lowercase()))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Lowercased query
pub fn lowercase_variant(query: &str) -> String {
    query.to_lowercase()
}

/// Original first, then `prefix query` per prefix, then `query suffix` per suffix
///
/// Always `prefixes.len() + suffixes.len() + 1` entries.
pub fn affix_variants(query: &str, prefixes: &[String], suffixes: &[String]) -> Vec<String> {
    let mut variants = Vec::with_capacity(prefixes.len() + suffixes.len() + 1);
    variants.push(query.to_string());
    variants.extend(prefixes.iter().map(|p| format!("{} {}", p.trim(), query)));
    variants.extend(suffixes.iter().map(|s| format!("{} {}", query, s.trim())));
    variants
}

/// Generator producing prefix/suffix augmentations
#[derive(Debug, Clone, Default)]
pub struct AffixGenerator {
    pub prefixes: Vec<String>,
    pub suffixes: Vec<String>,
}

impl AffixGenerator {
    pub fn new(prefixes: Vec<String>, suffixes: Vec<String>) -> Self {
        Self { prefixes, suffixes }
    }
}

impl QueryGenerator for AffixGenerator {
    fn generate(&self, query: &str) -> Vec<String> {
        affix_variants(query, &self.prefixes, &self.suffixes)
    }
}

/// Generator producing the original, lowercase, and token-deduplicated forms
#[derive(Debug, Clone, Copy, Default)]
pub struct NormalizingGenerator;

impl QueryGenerator for NormalizingGenerator {
    fn generate(&self, query: &str) -> Vec<String> {
        vec![
            query.to_string(),
            lowercase_variant(query),
            dedup_tokens_variant(query),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::QueryBundle;

    #[test]
    fn test_dedup_tokens() {
        assert_eq!(dedup_tokens_variant("rust  Rust async rust runtime"), "rust async runtime");
    }

    #[test]
    fn test_affix_count_and_order() {
        let prefixes = vec!["how to".to_string(), "guide:".to_string()];
        let suffixes = vec!["example".to_string()];
        let variants = affix_variants("parse json", &prefixes, &suffixes);
        assert_eq!(variants.len(), prefixes.len() + suffixes.len() + 1);
        assert_eq!(
            variants,
            vec!["parse json", "how to parse json", "guide: parse json", "parse json example"]
        );
    }

    #[test]
    fn test_affix_without_affixes() {
        assert_eq!(AffixGenerator::default().generate("q"), vec!["q"]);
    }

    #[test]
    fn test_normalizing_generator_variants_reach_bundle() {
        let variants = NormalizingGenerator.generate("Tokio Tokio runtime");
        assert_eq!(variants, vec!["Tokio Tokio runtime", "tokio tokio runtime", "Tokio runtime"]);

        let bundle = QueryBundle::new("Tokio Tokio runtime", variants, true);
        assert_eq!(
            bundle.variants,
            vec!["Tokio Tokio runtime", "tokio tokio runtime", "Tokio runtime"]
        );
    }

    #[test]
    fn test_normalizing_generator_drops_identical_forms() {
        // Token dedup is a no-op here, so only the lowercase form is new
        let bundle = QueryBundle::new("Tokio Runtime", NormalizingGenerator.generate("Tokio Runtime"), true);
        assert_eq!(bundle.variants, vec!["Tokio Runtime", "tokio runtime"]);
    }
}
