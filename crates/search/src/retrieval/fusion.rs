//! Fusion of per-source ranked lists
//!
//! Four algorithms, all pure (inputs are never modified):
//! - Reciprocal Rank Fusion: rank-based, no score normalization needed
//! - Weighted: raw scores scaled by a per-source weight
//! - Round-robin: interleave ranks across sources for diversity at the top
//! - Concatenation: source order precedence
//!
//! Every output is de-duplicated by non-empty document ID.

use super::RetrievedDocument;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

/// Standard RRF constant
pub const DEFAULT_RRF_K: f64 = 60.0;

/// Fusion algorithm selector
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum FusionAlgorithm {
    #[default]
    #[serde(rename = "rrf")]
    ReciprocalRank,
    #[serde(rename = "weighted")]
    Weighted,
    #[serde(rename = "round_robin")]
    RoundRobin,
    #[serde(rename = "concat")]
    Concatenation,
}

impl FusionAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            FusionAlgorithm::ReciprocalRank => "rrf",
            FusionAlgorithm::Weighted => "weighted",
            FusionAlgorithm::RoundRobin => "round_robin",
            FusionAlgorithm::Concatenation => "concat",
        }
    }

    /// Output order is positional and scores are left as the backends gave them
    pub fn is_order_based(&self) -> bool {
        matches!(self, FusionAlgorithm::RoundRobin | FusionAlgorithm::Concatenation)
    }
}

/// Fusion parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusionConfig {
    /// Algorithm to run
    #[serde(default)]
    pub algorithm: FusionAlgorithm,

    /// Constant k for RRF (typically 60)
    #[serde(default = "default_rrf_k")]
    pub rrf_k: f64,

    /// Per-source weights for weighted fusion (missing sources weigh 1.0)
    #[serde(default)]
    pub weights: HashMap<String, f64>,
}

fn default_rrf_k() -> f64 { DEFAULT_RRF_K }

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            algorithm: FusionAlgorithm::default(),
            rrf_k: DEFAULT_RRF_K,
            weights: HashMap::new(),
        }
    }
}

impl FusionConfig {
    pub fn with_algorithm(algorithm: FusionAlgorithm) -> Self {
        Self { algorithm, ..Self::default() }
    }

    /// Builder: set a source weight
    pub fn weight(mut self, source: impl Into<String>, weight: f64) -> Self {
        self.weights.insert(source.into(), weight);
        self
    }
}

/// One ranked input list
#[derive(Debug, Clone)]
pub struct FusionSource {
    /// Source key (backend name, query variant, or both)
    pub key: String,

    /// Backend that produced the list; fallback key for weight lookup
    pub backend: String,

    /// Documents, most relevant first
    pub documents: Vec<RetrievedDocument>,
}

impl FusionSource {
    pub fn new(key: impl Into<String>, documents: Vec<RetrievedDocument>) -> Self {
        let key = key.into();
        Self {
            backend: key.clone(),
            key,
            documents,
        }
    }
}

/// Run the configured algorithm
pub fn fuse(config: &FusionConfig, sources: &[FusionSource]) -> Vec<RetrievedDocument> {
    match config.algorithm {
        FusionAlgorithm::ReciprocalRank => reciprocal_rank_fusion(sources, config.rrf_k),
        FusionAlgorithm::Weighted => weighted_fusion(sources, &config.weights),
        FusionAlgorithm::RoundRobin => round_robin_fusion(sources),
        FusionAlgorithm::Concatenation => concatenation_fusion(sources),
    }
}

/// Score accumulator keyed by document ID, remembering first-seen order
#[derive(Default)]
struct Accumulator {
    entries: Vec<(RetrievedDocument, f64)>,
    index: HashMap<String, usize>,
}

impl Accumulator {
    fn add(&mut self, doc: &RetrievedDocument, delta: f64) {
        match doc.dedup_key() {
            Some(key) => match self.index.get(key) {
                Some(&i) => self.entries[i].1 += delta,
                None => {
                    self.index.insert(key.to_string(), self.entries.len());
                    self.entries.push((doc.clone(), delta));
                }
            },
            None => self.entries.push((doc.clone(), delta)),
        }
    }

    /// Descending by accumulated score; stable, so ties keep first-seen order
    fn into_ranked(self) -> Vec<RetrievedDocument> {
        let mut entries = self.entries;
        entries.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
        entries
            .into_iter()
            .map(|(doc, score)| doc.rescored(score))
            .collect()
    }
}

/// Reciprocal Rank Fusion: `score(d) += 1 / (k + rank + 1)` with 0-based ranks
pub fn reciprocal_rank_fusion(sources: &[FusionSource], k: f64) -> Vec<RetrievedDocument> {
    let mut acc = Accumulator::default();

    for source in sources {
        for (rank, doc) in source.documents.iter().enumerate() {
            acc.add(doc, 1.0 / (k + rank as f64 + 1.0));
        }
    }

    acc.into_ranked()
}

/// Weighted fusion: `score(d) += raw_score(d) * weight(source)`
pub fn weighted_fusion(sources: &[FusionSource], weights: &HashMap<String, f64>) -> Vec<RetrievedDocument> {
    let mut acc = Accumulator::default();

    for source in sources {
        let weight = weights
            .get(&source.key)
            .or_else(|| weights.get(&source.backend))
            .copied()
            .unwrap_or(1.0);

        for doc in &source.documents {
            acc.add(doc, doc.score * weight);
        }
    }

    acc.into_ranked()
}

/// Round-robin fusion: rank 0 of every source, then rank 1, ...
pub fn round_robin_fusion(sources: &[FusionSource]) -> Vec<RetrievedDocument> {
    let max_len = sources.iter().map(|s| s.documents.len()).max().unwrap_or(0);
    let mut seen = HashSet::new();
    let mut fused = Vec::new();

    for position in 0..max_len {
        for source in sources {
            let Some(doc) = source.documents.get(position) else {
                continue;
            };
            if let Some(key) = doc.dedup_key() {
                if !seen.insert(key.to_string()) {
                    continue;
                }
            }
            fused.push(doc.clone());
        }
    }

    fused
}

/// Concatenation fusion: sources in order, later duplicates dropped
pub fn concatenation_fusion(sources: &[FusionSource]) -> Vec<RetrievedDocument> {
    let mut seen = HashSet::new();

    sources
        .iter()
        .flat_map(|s| s.documents.iter())
        .filter(|doc| match doc.dedup_key() {
            Some(key) => seen.insert(key.to_string()),
            None => true,
        })
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: &str, score: f64) -> RetrievedDocument {
        RetrievedDocument::new(id, format!("content of {}", id), score)
    }

    fn ids(docs: &[RetrievedDocument]) -> Vec<&str> {
        docs.iter().map(|d| d.id.as_str()).collect()
    }

    #[test]
    fn test_rrf_fusion() {
        // Vector: [A, B, C]
        // BM25:   [B, A, D]
        // Expected: A and B lead (both lists); A wins the tie by first-seen order
        let sources = vec![
            FusionSource::new("vector", vec![doc("A", 0.9), doc("B", 0.8), doc("C", 0.7)]),
            FusionSource::new("bm25", vec![doc("B", 0.9), doc("A", 0.7), doc("D", 0.6)]),
        ];

        let fused = reciprocal_rank_fusion(&sources, DEFAULT_RRF_K);

        assert_eq!(ids(&fused), vec!["A", "B", "C", "D"]);
        let expected = 1.0 / 61.0 + 1.0 / 62.0;
        assert!((fused[0].score - expected).abs() < 1e-12);
    }

    #[test]
    fn test_rrf_is_deterministic() {
        let sources = vec![
            FusionSource::new("a", vec![doc("x", 0.1), doc("y", 0.2), doc("z", 0.3)]),
            FusionSource::new("b", vec![doc("z", 0.5), doc("w", 0.4)]),
            FusionSource::new("c", vec![doc("y", 0.5)]),
        ];

        let first = reciprocal_rank_fusion(&sources, DEFAULT_RRF_K);
        for _ in 0..10 {
            assert_eq!(reciprocal_rank_fusion(&sources, DEFAULT_RRF_K), first);
        }
    }

    #[test]
    fn test_rrf_more_lists_never_ranks_lower() {
        // "shared" appears in both lists at rank 1; "single" appears once at rank 0
        // but at a rank no better than shared's best-case contribution sum.
        let sources = vec![
            FusionSource::new("a", vec![doc("single", 0.9), doc("shared", 0.8)]),
            FusionSource::new("b", vec![doc("other", 0.9), doc("shared", 0.8)]),
        ];

        let fused = reciprocal_rank_fusion(&sources, DEFAULT_RRF_K);
        assert_eq!(fused[0].id, "shared");
    }

    #[test]
    fn test_rrf_does_not_mutate_inputs() {
        let sources = vec![FusionSource::new("a", vec![doc("x", 0.42)])];
        let _ = reciprocal_rank_fusion(&sources, DEFAULT_RRF_K);
        assert_eq!(sources[0].documents[0].score, 0.42);
    }

    #[test]
    fn test_empty_ids_never_merge() {
        let sources = vec![
            FusionSource::new("a", vec![doc("", 0.5)]),
            FusionSource::new("b", vec![doc("", 0.5)]),
        ];

        assert_eq!(reciprocal_rank_fusion(&sources, DEFAULT_RRF_K).len(), 2);
        assert_eq!(round_robin_fusion(&sources).len(), 2);
        assert_eq!(concatenation_fusion(&sources).len(), 2);
    }

    #[test]
    fn test_weighted_fusion_tie_break() {
        // 0.5 * 2.0 = 1.0 > 0.9 * 1.0
        let sources = vec![
            FusionSource::new("light", vec![doc("strong-raw", 0.9)]),
            FusionSource::new("heavy", vec![doc("weighted", 0.5)]),
        ];
        let config = FusionConfig::with_algorithm(FusionAlgorithm::Weighted).weight("heavy", 2.0);

        let fused = fuse(&config, &sources);

        assert_eq!(ids(&fused), vec!["weighted", "strong-raw"]);
        assert!((fused[0].score - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_weighted_fusion_accumulates_and_falls_back_to_backend_weight() {
        let mut pair = FusionSource::new("kb|refund policy", vec![doc("x", 0.5)]);
        pair.backend = "kb".to_string();
        let sources = vec![pair, FusionSource::new("web", vec![doc("x", 0.25)])];
        let weights = HashMap::from([("kb".to_string(), 2.0)]);

        let fused = weighted_fusion(&sources, &weights);

        assert_eq!(fused.len(), 1);
        assert!((fused[0].score - 1.25).abs() < 1e-12);
    }

    #[test]
    fn test_round_robin_diversity() {
        let sources = vec![
            FusionSource::new("src1", vec![doc("a0", 0.9), doc("a1", 0.8)]),
            FusionSource::new("src2", vec![doc("b0", 0.7), doc("b1", 0.6)]),
        ];

        let fused = fuse(&FusionConfig::with_algorithm(FusionAlgorithm::RoundRobin), &sources);

        assert_eq!(ids(&fused), vec!["a0", "b0", "a1", "b1"]);
    }

    #[test]
    fn test_round_robin_uneven_lengths_and_duplicates() {
        let sources = vec![
            FusionSource::new("src1", vec![doc("a", 0.9), doc("b", 0.8), doc("c", 0.7)]),
            FusionSource::new("src2", vec![doc("b", 0.9)]),
        ];

        assert_eq!(ids(&round_robin_fusion(&sources)), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_concatenation_first_seen_wins() {
        let sources = vec![
            FusionSource::new("first", vec![doc("a", 0.1), doc("shared", 0.2)]),
            FusionSource::new("second", vec![doc("shared", 0.9), doc("b", 0.3)]),
        ];

        let fused = fuse(&FusionConfig::with_algorithm(FusionAlgorithm::Concatenation), &sources);

        assert_eq!(ids(&fused), vec!["a", "shared", "b"]);
        assert_eq!(fused[1].score, 0.2);
    }

    #[test]
    fn test_fusion_config_deserialize() {
        let config: FusionConfig = serde_json::from_str(r#"{"algorithm": "round_robin"}"#).unwrap();
        assert_eq!(config.algorithm, FusionAlgorithm::RoundRobin);
        assert_eq!(config.rrf_k, DEFAULT_RRF_K);
    }
}
