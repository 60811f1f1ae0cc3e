//! Maximal Marginal Relevance

use super::Reranker;
use crate::retrieval::RetrievedDocument;
use crate::text::{jaccard, tokenize};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use validator::Validate;

/// MMR parameters
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Validate)]
pub struct MmrConfig {
    /// Documents to select
    #[serde(default = "default_k")]
    pub k: usize,

    /// Relevance/diversity trade-off: 1.0 is pure relevance, 0.0 pure diversity
    #[serde(default = "default_lambda")]
    #[validate(range(min = 0.0, max = 1.0))]
    pub lambda: f64,
}

fn default_k() -> usize { 10 }
fn default_lambda() -> f64 { 0.7 }

impl Default for MmrConfig {
    fn default() -> Self {
        Self {
            k: default_k(),
            lambda: default_lambda(),
        }
    }
}

/// Greedily select up to `k` documents
///
/// Each step picks the remaining candidate maximizing
/// `λ·relevance − (1−λ)·max_sim(candidate, selected)`, with Jaccard token
/// similarity. Relevance is the score min-max scaled over the pool, so
/// RRF-scale scores and the 0..1 similarity term stay comparable. Ties go to
/// the earlier candidate. Each candidate's max similarity is updated only
/// against the newest pick, so the whole run costs O(k·n) similarity
/// computations.
pub fn apply_mmr(documents: &[RetrievedDocument], config: &MmrConfig) -> Vec<RetrievedDocument> {
    let k = config.k.min(documents.len());
    if k == 0 {
        return Vec::new();
    }

    let lambda = config.lambda.clamp(0.0, 1.0);
    let relevance = min_max_scaled(documents);
    let tokens: Vec<HashSet<String>> = documents.iter().map(|d| tokenize(&d.content)).collect();
    let mut max_sim = vec![0.0_f64; documents.len()];
    let mut remaining: Vec<usize> = (0..documents.len()).collect();
    let mut selected = Vec::with_capacity(k);

    while selected.len() < k && !remaining.is_empty() {
        let mut best_pos = 0;
        let mut best_score = f64::NEG_INFINITY;
        for (pos, &idx) in remaining.iter().enumerate() {
            let score = lambda * relevance[idx] - (1.0 - lambda) * max_sim[idx];
            if score > best_score {
                best_score = score;
                best_pos = pos;
            }
        }

        let picked = remaining.remove(best_pos);
        for &idx in &remaining {
            let sim = jaccard(&tokens[idx], &tokens[picked]);
            if sim > max_sim[idx] {
                max_sim[idx] = sim;
            }
        }
        selected.push(picked);
    }

    selected.into_iter().map(|idx| documents[idx].clone()).collect()
}

/// Scores mapped onto 0..1; a pool with no spread is all 1.0
fn min_max_scaled(documents: &[RetrievedDocument]) -> Vec<f64> {
    let (min, max) = documents
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), d| (lo.min(d.score), hi.max(d.score)));
    let range = max - min;
    documents
        .iter()
        .map(|d| if range > 0.0 { (d.score - min) / range } else { 1.0 })
        .collect()
}

/// Reranker wrapper around [`apply_mmr`]
#[derive(Debug, Clone, Default)]
pub struct MmrReranker {
    config: MmrConfig,
}

impl MmrReranker {
    pub fn new(config: MmrConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Reranker for MmrReranker {
    async fn rerank(&self, _query: &str, documents: Vec<RetrievedDocument>) -> Vec<RetrievedDocument> {
        apply_mmr(&documents, &self.config)
    }

    fn name(&self) -> &str {
        "mmr"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rerank::sort_by_score;

    fn corpus() -> Vec<RetrievedDocument> {
        vec![
            RetrievedDocument::new("a", "tokio async runtime scheduler", 0.95),
            RetrievedDocument::new("b", "tokio async runtime scheduler tasks", 0.93),
            RetrievedDocument::new("c", "serde serialization framework", 0.80),
            RetrievedDocument::new("d", "rayon parallel iterators", 0.60),
            RetrievedDocument::new("e", "tokio async runtime", 0.90),
        ]
    }

    #[test]
    fn test_length_is_min_k_n() {
        let docs = corpus();
        for k in 0..8 {
            let out = apply_mmr(&docs, &MmrConfig { k, lambda: 0.5 });
            assert_eq!(out.len(), k.min(docs.len()));
        }
        assert!(apply_mmr(&[], &MmrConfig::default()).is_empty());
    }

    #[test]
    fn test_lambda_one_matches_score_order() {
        let docs = corpus();
        let mut expected = docs.clone();
        sort_by_score(&mut expected);

        let out = apply_mmr(&docs, &MmrConfig { k: 10, lambda: 1.0 });

        assert_eq!(out, expected);
    }

    #[test]
    fn test_diversity_promotes_dissimilar() {
        let out = apply_mmr(&corpus(), &MmrConfig { k: 2, lambda: 0.5 });
        let ids: Vec<_> = out.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[test]
    fn test_relevance_is_scale_free() {
        // RRF-scale scores: a near-duplicate of the top hit still beats junk
        let docs = vec![
            RetrievedDocument::new("top", "refund policy for annual plans", 0.0164),
            RetrievedDocument::new("near", "refund policy for monthly billing", 0.0161),
            RetrievedDocument::new("junk", "office parking rules", 0.0002),
        ];

        let out = apply_mmr(&docs, &MmrConfig { k: 3, lambda: 0.7 });

        let ids: Vec<_> = out.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["top", "near", "junk"]);
    }

    #[test]
    fn test_does_not_modify_candidates() {
        let docs = corpus();
        let before = docs.clone();
        let _ = apply_mmr(&docs, &MmrConfig::default());
        assert_eq!(docs, before);
    }

    #[test]
    fn test_config_validation() {
        assert!(MmrConfig::default().validate().is_ok());
        assert!(MmrConfig { k: 5, lambda: 1.5 }.validate().is_err());
    }
}
