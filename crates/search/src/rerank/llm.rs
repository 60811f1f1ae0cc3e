//! Language-model reranking
//!
//! The model sees the candidates as a numbered list and answers with the
//! numbers of the most relevant ones, best first. Any failure falls back to
//! the first `top_n` candidates in their incoming order.

use super::Reranker;
use crate::retrieval::{RetrievedDocument, META_MODEL_SCORE};
use crate::text::truncate_chars;
use async_trait::async_trait;
use ragfuse_common::errors::AppError;
use ragfuse_common::llm::{ChatMessage, LanguageModel};
use ragfuse_common::metrics;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// LLM reranker settings
#[derive(Debug, Clone)]
pub struct LlmRerankerConfig {
    /// Documents to keep
    pub top_n: usize,

    /// Candidates shown to the model, from the head of the input
    pub max_candidates: usize,

    /// Characters of each candidate shown in the prompt
    pub preview_chars: usize,

    pub timeout: Duration,
}

impl Default for LlmRerankerConfig {
    fn default() -> Self {
        Self {
            top_n: 5,
            max_candidates: 20,
            preview_chars: 300,
            timeout: Duration::from_secs(15),
        }
    }
}

const RERANK_PROMPT: &str = "You are a relevance judge for a document retrieval system. \
Given a query and numbered passages, list the numbers of the most relevant passages, \
most relevant first, separated by commas. Respond with the numbers only.";

pub struct LlmReranker {
    model: Arc<dyn LanguageModel>,
    config: LlmRerankerConfig,
}

impl LlmReranker {
    pub fn new(model: Arc<dyn LanguageModel>, config: LlmRerankerConfig) -> Self {
        Self { model, config }
    }

    fn build_prompt(&self, query: &str, candidates: &[RetrievedDocument]) -> String {
        let mut prompt = format!(
            "Query: {}\n\nSelect the {} most relevant passages.\n\n",
            query, self.config.top_n
        );
        for (i, doc) in candidates.iter().enumerate() {
            let (preview, truncated) = truncate_chars(&doc.content, self.config.preview_chars);
            let ellipsis = if truncated { "..." } else { "" };
            prompt.push_str(&format!("[{}] {}{}\n", i + 1, preview.replace('\n', " "), ellipsis));
        }
        prompt
    }

    fn fallback(&self, mut documents: Vec<RetrievedDocument>, reason: &str) -> Vec<RetrievedDocument> {
        warn!(reason, "LLM rerank failed, keeping incoming order");
        metrics::record_model_fallback("llm_rerank");
        documents.truncate(self.config.top_n);
        documents
    }
}

/// Parse a model answer into distinct zero-based indices
///
/// Each comma/whitespace-separated token contributes its first run of digits;
/// zero, out-of-range, and repeated numbers are skipped.
pub fn parse_permutation(text: &str, count: usize) -> Vec<usize> {
    let mut seen = HashSet::new();
    let mut indices = Vec::new();

    for token in text.split(|c: char| c == ',' || c.is_whitespace()) {
        let digits: String = token
            .chars()
            .skip_while(|c| !c.is_ascii_digit())
            .take_while(char::is_ascii_digit)
            .collect();
        let Ok(number) = digits.parse::<usize>() else {
            continue;
        };
        if number == 0 || number > count {
            continue;
        }
        if seen.insert(number) {
            indices.push(number - 1);
        }
    }

    indices
}

#[async_trait]
impl Reranker for LlmReranker {
    async fn rerank(&self, query: &str, documents: Vec<RetrievedDocument>) -> Vec<RetrievedDocument> {
        if documents.len() <= self.config.top_n {
            return documents;
        }

        let shown = documents.len().min(self.config.max_candidates.max(self.config.top_n));
        let messages = [
            ChatMessage::system(RERANK_PROMPT),
            ChatMessage::user(self.build_prompt(query, &documents[..shown])),
        ];

        let reply = match tokio::time::timeout(self.config.timeout, self.model.generate(&messages)).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => return self.fallback(documents, &e.to_string()),
            Err(_) => {
                let err = AppError::ModelTimeout { timeout_ms: self.config.timeout.as_millis() as u64 };
                return self.fallback(documents, &err.to_string());
            }
        };

        let order = parse_permutation(&reply, shown);
        if order.is_empty() {
            return self.fallback(documents, "no usable indices");
        }

        debug!(model = self.model.model_name(), picked = order.len(), "LLM rerank applied");

        order
            .into_iter()
            .take(self.config.top_n)
            .enumerate()
            .map(|(rank, idx)| {
                let mut doc = documents[idx].clone();
                doc.metadata
                    .insert(META_MODEL_SCORE.to_string(), Value::from(1.0 / (rank + 1) as f64));
                doc
            })
            .collect()
    }

    fn name(&self) -> &str {
        "llm"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ragfuse_common::llm::MockLanguageModel;

    fn docs(n: usize) -> Vec<RetrievedDocument> {
        (0..n)
            .map(|i| RetrievedDocument::new(format!("d{}", i), format!("passage {}", i), 1.0))
            .collect()
    }

    fn reranker(model: MockLanguageModel, top_n: usize) -> (Arc<MockLanguageModel>, LlmReranker) {
        let model = Arc::new(model);
        let config = LlmRerankerConfig { top_n, ..LlmRerankerConfig::default() };
        (model.clone(), LlmReranker::new(model, config))
    }

    #[test]
    fn test_parse_permutation_is_lenient() {
        assert_eq!(parse_permutation("3, 1, 2", 3), vec![2, 0, 1]);
        assert_eq!(parse_permutation("[2] [7] 0 #1, 2 x", 3), vec![1, 0]);
        assert_eq!(parse_permutation("Passage 3 then passage 1", 4), vec![2, 0]);
        assert!(parse_permutation("none", 3).is_empty());
    }

    #[tokio::test]
    async fn test_not_invoked_at_or_below_top_n() {
        let (model, reranker) = reranker(MockLanguageModel::replying("1"), 3);
        let out = reranker.rerank("q", docs(3)).await;
        assert_eq!(out.len(), 3);
        assert_eq!(model.calls(), 0);
    }

    #[tokio::test]
    async fn test_applies_model_order() {
        let (model, reranker) = reranker(MockLanguageModel::replying("4, 2, 9, 2, 1"), 2);

        let out = reranker.rerank("q", docs(5)).await;

        let ids: Vec<_> = out.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["d3", "d1"]);
        assert_eq!(out[0].model_score(), Some(1.0));
        assert_eq!(out[1].model_score(), Some(0.5));
        assert_eq!(model.calls(), 1);
    }

    #[tokio::test]
    async fn test_falls_back_on_failure_and_garbage() {
        let (_, failing) = reranker(MockLanguageModel::failing("500"), 2);
        let out = failing.rerank("q", docs(4)).await;
        let ids: Vec<_> = out.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["d0", "d1"]);

        let (_, garbage) = reranker(MockLanguageModel::replying("I cannot help with that"), 2);
        assert_eq!(garbage.rerank("q", docs(4)).await.len(), 2);
    }

    #[tokio::test]
    async fn test_falls_back_on_timeout() {
        let model = MockLanguageModel::replying("2, 1").with_delay(Duration::from_millis(200));
        let reranker = LlmReranker::new(
            Arc::new(model),
            LlmRerankerConfig {
                top_n: 1,
                timeout: Duration::from_millis(20),
                ..LlmRerankerConfig::default()
            },
        );

        let out = reranker.rerank("q", docs(3)).await;

        assert_eq!(out[0].id, "d0");
    }
}
