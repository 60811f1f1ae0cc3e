//! Query processing
//!
//! Turns one incoming query into a [`QueryBundle`]:
//! - Model-backed rewriting and expansion (never fails; falls back to the input)
//! - Deterministic variant generators for tests and offline use

mod processor;
mod variants;

pub use processor::{parse_variant_lines, QueryProcessor, QueryProcessorConfig};
pub use variants::{
    affix_variants, dedup_tokens_variant, lowercase_variant, AffixGenerator, NormalizingGenerator,
};

use crate::text::collapse_whitespace;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A query plus the variants to dispatch
///
/// `variants` never ends up empty: when everything else is excluded or blank,
/// the original is kept.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueryBundle {
    /// Query as received
    pub original: String,

    /// Ordered, de-duplicated queries to run; the original leads unless excluded
    pub variants: Vec<String>,
}

impl QueryBundle {
    /// Bundle with only the original query
    pub fn single(query: impl Into<String>) -> Self {
        let original = query.into();
        Self {
            variants: vec![original.clone()],
            original,
        }
    }

    /// Build a bundle; blank and repeated variants are dropped
    ///
    /// Repeats are compared after collapsing whitespace. Case is significant,
    /// so a lowercase variant reaches dispatch alongside the original.
    pub fn new<I, S>(original: impl Into<String>, variants: I, include_original: bool) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let original = original.into();
        let mut seen = HashSet::new();
        let mut queries = Vec::new();

        let candidates = include_original
            .then(|| original.clone())
            .into_iter()
            .chain(variants.into_iter().map(Into::into));

        for candidate in candidates {
            let query = collapse_whitespace(&candidate);
            if query.is_empty() {
                continue;
            }
            if !include_original && query == collapse_whitespace(&original) {
                continue;
            }
            if seen.insert(query.clone()) {
                queries.push(query);
            }
        }

        if queries.is_empty() {
            queries.push(original.clone());
        }

        Self { original, variants: queries }
    }

    pub fn len(&self) -> usize {
        self.variants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variants.is_empty()
    }

    /// First query to run (the original unless excluded)
    pub fn primary(&self) -> &str {
        self.variants.first().map(String::as_str).unwrap_or(&self.original)
    }
}

/// Custom query-generation strategy for multi-query dispatch
pub trait QueryGenerator: Send + Sync {
    /// Produce query variants for `query`
    fn generate(&self, query: &str) -> Vec<String>;
}

impl<F> QueryGenerator for F
where
    F: Fn(&str) -> Vec<String> + Send + Sync,
{
    fn generate(&self, query: &str) -> Vec<String> {
        self(query)
    }
}
