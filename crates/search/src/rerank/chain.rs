//! Combining several rerankers
//!
//! `Sequential` pipes each reranker's output into the next. `Fused` runs every
//! member on the full candidate set and fuses their opinions: each output
//! rank contributes `weight / (rank + 1)` to the document's score. Metadata
//! from every member's copy of a document is merged; on a key clash the
//! earlier member wins.

use super::Reranker;
use crate::dedup::content_signature;
use crate::retrieval::RetrievedDocument;
use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// How chain members are combined
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RerankStrategy {
    #[default]
    Sequential,
    Fused,
}

/// Ordered set of weighted rerankers
#[derive(Clone, Default)]
pub struct RerankerChain {
    members: Vec<(Arc<dyn Reranker>, f64)>,
    strategy: RerankStrategy,
}

impl RerankerChain {
    pub fn new(strategy: RerankStrategy) -> Self {
        Self { members: Vec::new(), strategy }
    }

    /// Builder: append a member with weight 1.0
    pub fn with(self, reranker: impl Reranker + 'static) -> Self {
        self.with_weight(reranker, 1.0)
    }

    /// Builder: append a member with an explicit fused-mode weight
    pub fn with_weight(self, reranker: impl Reranker + 'static, weight: f64) -> Self {
        self.push(Arc::new(reranker), weight)
    }

    pub fn push(mut self, reranker: Arc<dyn Reranker>, weight: f64) -> Self {
        self.members.push((reranker, weight));
        self
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn strategy(&self) -> RerankStrategy {
        self.strategy
    }

    async fn run_sequential(&self, query: &str, mut documents: Vec<RetrievedDocument>) -> Vec<RetrievedDocument> {
        for (reranker, _) in &self.members {
            documents = reranker.rerank(query, documents).await;
            debug!(reranker = reranker.name(), count = documents.len(), "Rerank stage applied");
        }
        documents
    }

    async fn run_fused(&self, query: &str, documents: Vec<RetrievedDocument>) -> Vec<RetrievedDocument> {
        let opinions = join_all(
            self.members
                .iter()
                .map(|(reranker, _)| reranker.rerank(query, documents.clone())),
        )
        .await;

        let mut order: Vec<(RetrievedDocument, f64)> = Vec::new();
        let mut positions: HashMap<String, usize> = HashMap::new();

        for ((_, weight), ranked) in self.members.iter().zip(opinions) {
            for (rank, doc) in ranked.into_iter().enumerate() {
                let contribution = weight / (rank + 1) as f64;
                let key = match doc.dedup_key() {
                    Some(id) => id.to_string(),
                    None => content_signature(&doc.content),
                };
                match positions.get(&key) {
                    Some(&pos) => {
                        let (merged, score) = &mut order[pos];
                        *score += contribution;
                        for (name, value) in doc.metadata {
                            merged.metadata.entry(name).or_insert(value);
                        }
                    }
                    None => {
                        positions.insert(key, order.len());
                        order.push((doc, contribution));
                    }
                }
            }
        }

        order.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
        order.into_iter().map(|(doc, score)| doc.rescored(score)).collect()
    }
}

#[async_trait]
impl Reranker for RerankerChain {
    async fn rerank(&self, query: &str, documents: Vec<RetrievedDocument>) -> Vec<RetrievedDocument> {
        if self.members.is_empty() {
            return documents;
        }
        match self.strategy {
            RerankStrategy::Sequential => self.run_sequential(query, documents).await,
            RerankStrategy::Fused => self.run_fused(query, documents).await,
        }
    }

    fn name(&self) -> &str {
        match self.strategy {
            RerankStrategy::Sequential => "sequential_chain",
            RerankStrategy::Fused => "fused_chain",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rerank::{MmrConfig, MmrReranker, ScoreReranker};
    use crate::retrieval::META_MODEL_SCORE;

    /// Reverses its input
    struct Reverse;

    #[async_trait]
    impl Reranker for Reverse {
        async fn rerank(&self, _query: &str, mut documents: Vec<RetrievedDocument>) -> Vec<RetrievedDocument> {
            documents.reverse();
            documents
        }

        fn name(&self) -> &str {
            "reverse"
        }
    }

    /// Tags every document the way a model-backed reranker does
    struct Tagging;

    #[async_trait]
    impl Reranker for Tagging {
        async fn rerank(&self, _query: &str, documents: Vec<RetrievedDocument>) -> Vec<RetrievedDocument> {
            documents
                .into_iter()
                .map(|d| d.with_metadata(META_MODEL_SCORE, 0.5))
                .collect()
        }

        fn name(&self) -> &str {
            "tagging"
        }
    }

    fn docs() -> Vec<RetrievedDocument> {
        vec![
            RetrievedDocument::new("a", "alpha", 0.9),
            RetrievedDocument::new("b", "beta", 0.5),
            RetrievedDocument::new("c", "gamma", 0.7),
        ]
    }

    fn ids(docs: &[RetrievedDocument]) -> Vec<&str> {
        docs.iter().map(|d| d.id.as_str()).collect()
    }

    #[tokio::test]
    async fn test_empty_chain_is_identity() {
        let out = RerankerChain::default().rerank("q", docs()).await;
        assert_eq!(ids(&out), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_sequential_pipes_outputs() {
        let chain = RerankerChain::new(RerankStrategy::Sequential)
            .with(ScoreReranker)
            .with(Reverse);

        let out = chain.rerank("q", docs()).await;

        assert_eq!(ids(&out), vec!["b", "c", "a"]);
    }

    #[tokio::test]
    async fn test_fused_accumulates_reciprocal_ranks() {
        // score: a c b, reverse: c b a
        let chain = RerankerChain::new(RerankStrategy::Fused)
            .with(ScoreReranker)
            .with(Reverse);

        let out = chain.rerank("q", docs()).await;

        // a = 1 + 1/3, c = 1/2 + 1, b = 1/3 + 1/2
        assert_eq!(ids(&out), vec!["c", "a", "b"]);
        assert!((out[0].score - 1.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_fused_weights_and_partial_outputs() {
        let chain = RerankerChain::new(RerankStrategy::Fused)
            .with_weight(Reverse, 0.1)
            .with_weight(MmrReranker::new(MmrConfig { k: 1, lambda: 1.0 }), 1.0);

        let out = chain.rerank("q", docs()).await;

        assert_eq!(out[0].id, "a");
        assert_eq!(out.len(), 3);
    }

    #[tokio::test]
    async fn test_fused_merges_member_metadata() {
        let chain = RerankerChain::new(RerankStrategy::Fused)
            .with(ScoreReranker)
            .with(Tagging);

        let out = chain.rerank("q", docs()).await;

        assert_eq!(out.len(), 3);
        assert!(out.iter().all(|d| d.model_score() == Some(0.5)));
    }
}
