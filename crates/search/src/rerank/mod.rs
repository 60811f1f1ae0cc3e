//! Reranking of fused, de-duplicated candidates
//!
//! Provides:
//! - [`ScoreReranker`]: stable score-descending order, the default and fallback
//! - [`MmrReranker`]: Maximal Marginal Relevance diversity selection
//! - [`CompositeReranker`]: weighted model/base/source score blend
//! - [`LlmReranker`]: language-model relevance permutation of the top candidates
//! - [`RerankerChain`]: reciprocal-rank fusion over several rerankers' outputs
//!
//! Rerankers never fail. Candidates are taken by value and returned as new
//! values; scores change only through [`RetrievedDocument::rescored`].

mod chain;
mod composite;
mod llm;
mod mmr;

pub use chain::{RerankStrategy, RerankerChain};
pub use composite::{composite_score, CompositeConfig, CompositeReranker, CompositeWeights};
pub use llm::{parse_permutation, LlmReranker, LlmRerankerConfig};
pub use mmr::{apply_mmr, MmrConfig, MmrReranker};

use crate::retrieval::RetrievedDocument;
use async_trait::async_trait;
use std::cmp::Ordering;

/// Reorders a candidate set for a query
#[async_trait]
pub trait Reranker: Send + Sync {
    /// Return the candidates in new relevance order (possibly fewer of them)
    async fn rerank(&self, query: &str, documents: Vec<RetrievedDocument>) -> Vec<RetrievedDocument>;

    /// Name for logging
    fn name(&self) -> &str;
}

/// Stable sort by score, descending; equal scores keep input order
pub(crate) fn sort_by_score(documents: &mut [RetrievedDocument]) {
    documents.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
}

/// Plain score ordering
#[derive(Debug, Clone, Copy, Default)]
pub struct ScoreReranker;

#[async_trait]
impl Reranker for ScoreReranker {
    async fn rerank(&self, _query: &str, mut documents: Vec<RetrievedDocument>) -> Vec<RetrievedDocument> {
        sort_by_score(&mut documents);
        documents
    }

    fn name(&self) -> &str {
        "score"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_score_reranker_is_stable() {
        let docs = vec![
            RetrievedDocument::new("a", "x", 0.5),
            RetrievedDocument::new("b", "y", 0.9),
            RetrievedDocument::new("c", "z", 0.5),
        ];

        let ranked = ScoreReranker.rerank("q", docs).await;

        let ids: Vec<_> = ranked.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a", "c"]);
    }
}
