//! Composite scoring: model score, base retrieval score, and source trust

use super::{sort_by_score, Reranker};
use crate::retrieval::RetrievedDocument;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Signal weights
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct CompositeWeights {
    pub model: f64,
    pub base: f64,
    pub source: f64,
}

impl Default for CompositeWeights {
    fn default() -> Self {
        Self {
            model: 0.6,
            base: 0.3,
            source: 0.1,
        }
    }
}

/// Composite reranker configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompositeConfig {
    #[serde(default)]
    pub weights: CompositeWeights,

    /// Per-source trust multipliers on the source term (missing sources trust 1.0)
    #[serde(default)]
    pub source_weights: HashMap<String, f64>,

    /// Positional prior `1 / (1 + decay * rank)`; disabled when `None`
    #[serde(default)]
    pub positional_decay: Option<f64>,
}

impl CompositeConfig {
    /// Builder: set a source trust weight
    pub fn source_weight(mut self, source: impl Into<String>, weight: f64) -> Self {
        self.source_weights.insert(source.into(), weight);
        self
    }

    pub fn with_positional_decay(mut self, decay: f64) -> Self {
        self.positional_decay = Some(decay);
        self
    }
}

/// Composite score of `doc` at input position `rank`, clamped to `[0, 1]`
///
/// The model signal falls back to the current score when no model score was
/// assigned.
pub fn composite_score(doc: &RetrievedDocument, rank: usize, config: &CompositeConfig) -> f64 {
    let weights = &config.weights;
    let model = doc.model_score().unwrap_or(doc.score);
    let trust = config.source_weights.get(&doc.source_name).copied().unwrap_or(1.0);

    let mut score = weights.model * model + weights.base * doc.base_score() + weights.source * trust;
    if let Some(decay) = config.positional_decay {
        score *= 1.0 / (1.0 + decay.max(0.0) * rank as f64);
    }

    score.clamp(0.0, 1.0)
}

/// Rescore by [`composite_score`] and re-sort descending
#[derive(Debug, Clone, Default)]
pub struct CompositeReranker {
    config: CompositeConfig,
}

impl CompositeReranker {
    pub fn new(config: CompositeConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Reranker for CompositeReranker {
    async fn rerank(&self, _query: &str, documents: Vec<RetrievedDocument>) -> Vec<RetrievedDocument> {
        let mut rescored: Vec<_> = documents
            .iter()
            .enumerate()
            .map(|(rank, doc)| doc.rescored(composite_score(doc, rank, &self.config)))
            .collect();
        sort_by_score(&mut rescored);
        rescored
    }

    fn name(&self) -> &str {
        "composite"
    }
}
