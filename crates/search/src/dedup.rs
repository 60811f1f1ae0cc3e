//! Post-fusion de-duplication
//!
//! Provides:
//! - Signature dedup: exact duplicates by hash of normalized content, O(n)
//! - Similarity dedup: near duplicates by Jaccard token overlap, O(n²)
//!
//! Similarity dedup compares every candidate to every accepted document, so
//! it is meant for result sets already narrowed by fusion and `top_k`.

use crate::retrieval::RetrievedDocument;
use crate::text::{jaccard, normalize, tokenize};
use ragfuse_common::metrics;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use tracing::debug;

/// Default Jaccard threshold at or above which a candidate is a duplicate
pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.85;

/// Result of a dedup pass
#[derive(Debug, Clone, Default)]
pub struct DedupOutcome {
    /// Surviving documents in input order
    pub unique: Vec<RetrievedDocument>,

    /// Number of documents dropped
    pub removed_count: usize,
}

/// 128-bit signature of normalized content, hex encoded
pub fn content_signature(content: &str) -> String {
    let digest = Sha256::digest(normalize(content).as_bytes());
    hex::encode(&digest[..16])
}

/// Keep the first document per distinct content signature
pub fn signature_dedup(documents: &[RetrievedDocument]) -> DedupOutcome {
    let mut seen = HashSet::with_capacity(documents.len());
    let unique: Vec<_> = documents
        .iter()
        .filter(|doc| seen.insert(content_signature(&doc.content)))
        .cloned()
        .collect();

    DedupOutcome {
        removed_count: documents.len() - unique.len(),
        unique,
    }
}

/// Reject candidates whose Jaccard similarity to any accepted document is `>= threshold`
pub fn similarity_dedup(documents: &[RetrievedDocument], threshold: f64) -> DedupOutcome {
    let mut accepted: Vec<HashSet<String>> = Vec::with_capacity(documents.len());
    let mut unique = Vec::with_capacity(documents.len());

    for doc in documents {
        let tokens = tokenize(&doc.content);
        if accepted.iter().any(|other| jaccard(&tokens, other) >= threshold) {
            continue;
        }
        accepted.push(tokens);
        unique.push(doc.clone());
    }

    DedupOutcome {
        removed_count: documents.len() - unique.len(),
        unique,
    }
}

/// Which passes to run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupConfig {
    #[serde(default = "default_true")]
    pub enable_signature: bool,

    #[serde(default = "default_true")]
    pub enable_similarity: bool,

    /// Jaccard threshold for similarity dedup
    #[serde(default = "default_threshold")]
    pub similarity_threshold: f64,
}

fn default_true() -> bool { true }
fn default_threshold() -> f64 { DEFAULT_SIMILARITY_THRESHOLD }

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            enable_signature: true,
            enable_similarity: true,
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
        }
    }
}

/// Run the enabled passes, signature first
pub fn deduplicate(documents: &[RetrievedDocument], config: &DedupConfig) -> DedupOutcome {
    let mut outcome = DedupOutcome {
        unique: documents.to_vec(),
        removed_count: 0,
    };

    if config.enable_signature {
        let pass = signature_dedup(&outcome.unique);
        metrics::record_dedup("signature", pass.removed_count);
        outcome = DedupOutcome {
            removed_count: outcome.removed_count + pass.removed_count,
            unique: pass.unique,
        };
    }

    if config.enable_similarity {
        let pass = similarity_dedup(&outcome.unique, config.similarity_threshold);
        metrics::record_dedup("similarity", pass.removed_count);
        outcome = DedupOutcome {
            removed_count: outcome.removed_count + pass.removed_count,
            unique: pass.unique,
        };
    }

    debug!(
        input = documents.len(),
        removed = outcome.removed_count,
        "Deduplicated results"
    );

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: &str, content: &str) -> RetrievedDocument {
        RetrievedDocument::new(id, content, 1.0)
    }

    #[test]
    fn test_signature_normalizes_case_and_whitespace() {
        assert_eq!(
            content_signature("Refund  Policy\n for plans"),
            content_signature("refund policy for PLANS")
        );
        assert_ne!(content_signature("refund policy"), content_signature("refund policies"));
        assert_eq!(content_signature("x").len(), 32);
    }

    #[test]
    fn test_signature_dedup_keeps_first() {
        let docs = vec![
            doc("a", "Tokio is an async runtime"),
            doc("b", "tokio   is an ASYNC runtime"),
            doc("c", "Rayon is a data-parallelism library"),
        ];

        let outcome = signature_dedup(&docs);

        assert_eq!(outcome.removed_count, 1);
        let ids: Vec<_> = outcome.unique.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
        assert_eq!(docs.len(), 3);
    }

    #[test]
    fn test_signature_dedup_idempotent() {
        let docs = vec![
            doc("a", "one two three"),
            doc("b", "One Two Three"),
            doc("c", "four five"),
            doc("d", "four  five"),
            doc("e", "six"),
        ];

        let once = signature_dedup(&docs);
        let twice = signature_dedup(&once.unique);

        assert_eq!(once.unique, twice.unique);
        assert_eq!(twice.removed_count, 0);
    }

    #[test]
    fn test_similarity_dedup_threshold() {
        let docs = vec![
            doc("a", "rust async runtime with work stealing scheduler and timers"),
            doc("b", "rust async runtime with work stealing scheduler and timers!"),
            doc("c", "rust async runtime with a cooperative scheduler"),
        ];

        let outcome = similarity_dedup(&docs, DEFAULT_SIMILARITY_THRESHOLD);

        let ids: Vec<_> = outcome.unique.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
        assert_eq!(outcome.removed_count, 1);
    }

    #[test]
    fn test_similarity_dedup_empty_token_sets_never_match() {
        let docs = vec![doc("a", "!!"), doc("b", "?? ..")];
        let outcome = similarity_dedup(&docs, 0.85);
        assert_eq!(outcome.unique.len(), 2);
    }

    #[test]
    fn test_deduplicate_composes_passes() {
        let docs = vec![
            doc("a", "alpha beta gamma delta"),
            doc("b", "ALPHA beta gamma delta"),
            doc("c", "alpha beta gamma delta epsilon zeta eta theta iota kappa lambda"),
            doc("d", "alpha beta gamma delta."),
        ];

        let outcome = deduplicate(&docs, &DedupConfig::default());
        assert_eq!(outcome.removed_count, 2);
        assert_eq!(outcome.unique.len(), 2);

        let config = DedupConfig { enable_similarity: false, ..DedupConfig::default() };
        assert_eq!(deduplicate(&docs, &config).removed_count, 1);
    }
}
