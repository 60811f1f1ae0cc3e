//! In-memory lexical retrieval
//!
//! Scores each stored document by the fraction of query tokens it contains.
//! Used for offline runs and as a deterministic backend in tests.

use super::{RetrievedDocument, Retriever};
use crate::text::tokenize;
use ragfuse_common::errors::Result;
use std::cmp::Ordering;
use std::collections::HashSet;

/// Lexical retriever over a fixed document set
pub struct InMemoryRetriever {
    documents: Vec<(RetrievedDocument, HashSet<String>)>,
}

impl InMemoryRetriever {
    /// Create a retriever over `documents`
    pub fn new(documents: Vec<RetrievedDocument>) -> Self {
        let documents = documents
            .into_iter()
            .map(|doc| {
                let tokens = tokenize(&doc.content);
                (doc, tokens)
            })
            .collect();

        Self { documents }
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

#[async_trait::async_trait]
impl Retriever for InMemoryRetriever {
    async fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<RetrievedDocument>> {
        let query_tokens = tokenize(query);
        if query_tokens.is_empty() {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(&RetrievedDocument, f64)> = self.documents
            .iter()
            .filter_map(|(doc, tokens)| {
                let hits = query_tokens.iter().filter(|t| tokens.contains(*t)).count();
                (hits > 0).then(|| (doc, hits as f64 / query_tokens.len() as f64))
            })
            .collect();

        // Stable: equal coverage keeps insertion order
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));

        Ok(scored
            .into_iter()
            .take(top_k)
            .map(|(doc, score)| doc.rescored(score))
            .collect())
    }
}
