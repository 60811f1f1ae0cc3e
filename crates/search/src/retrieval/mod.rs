//! Retrieval backends and the documents they return
//!
//! Provides:
//! - The `Retriever` capability every backend implements
//! - Remote HTTP backends (vector stores, keyword indexes, web search)
//! - An in-memory lexical backend for offline use and tests
//! - Fusion of per-source ranked lists

mod fusion;
mod http;
mod memory;

pub use fusion::{
    concatenation_fusion, fuse, reciprocal_rank_fusion, round_robin_fusion, weighted_fusion,
    FusionAlgorithm, FusionConfig, FusionSource, DEFAULT_RRF_K,
};
pub use http::HttpRetriever;
pub use memory::InMemoryRetriever;

use ragfuse_common::errors::{AppError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Metadata key holding the score the backend originally reported
pub const META_BASE_SCORE: &str = "base_score";

/// Metadata key holding a model/semantic relevance score
pub const META_MODEL_SCORE: &str = "model_score";

/// Free-form document metadata
pub type Metadata = Map<String, Value>;

/// Retrieved passage with relevance score
///
/// Values are never mutated once a backend returns them; score changes go
/// through [`RetrievedDocument::rescored`], which yields a new value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrievedDocument {
    /// Document ID; the de-duplication key when non-empty
    #[serde(default)]
    pub id: String,

    /// Passage text
    pub content: String,

    /// Relevance score (higher is better)
    #[serde(default)]
    pub score: f64,

    /// Backend-supplied metadata (title, url, ...)
    #[serde(default)]
    pub metadata: Metadata,

    /// Name of the backend that produced this document
    #[serde(default)]
    pub source_name: String,
}

impl RetrievedDocument {
    pub fn new(id: impl Into<String>, content: impl Into<String>, score: f64) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            score,
            metadata: Metadata::new(),
            source_name: String::new(),
        }
    }

    /// Builder: attach a metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Builder: set the producing backend
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source_name = source.into();
        self
    }

    /// Copy of this document carrying a new score
    pub fn rescored(&self, score: f64) -> Self {
        Self { score, ..self.clone() }
    }

    /// De-duplication key; documents without an ID are never duplicates
    pub fn dedup_key(&self) -> Option<&str> {
        if self.id.is_empty() {
            None
        } else {
            Some(&self.id)
        }
    }

    /// Title from metadata, if any
    pub fn title(&self) -> Option<&str> {
        self.metadata.get("title").and_then(Value::as_str)
    }

    /// Score reported by the backend before any reranking
    pub fn base_score(&self) -> f64 {
        self.metadata
            .get(META_BASE_SCORE)
            .and_then(Value::as_f64)
            .unwrap_or(self.score)
    }

    /// Model/semantic score, if a model reranker assigned one
    pub fn model_score(&self) -> Option<f64> {
        self.metadata.get(META_MODEL_SCORE).and_then(Value::as_f64)
    }

    /// Copy stamped with its producing backend and original score
    pub(crate) fn stamped(&self, backend: &str) -> Self {
        let mut doc = self.clone();
        if doc.source_name.is_empty() {
            doc.source_name = backend.to_string();
        }
        if !doc.metadata.contains_key(META_BASE_SCORE) {
            doc.metadata.insert(META_BASE_SCORE.to_string(), Value::from(self.score));
        }
        doc
    }
}

/// Outcome of one `(query, backend)` retrieval unit
#[derive(Debug)]
pub struct BackendResult {
    /// Backend the unit ran against
    pub backend_name: String,

    /// Query variant the unit ran with
    pub query_variant: String,

    /// Documents in backend-reported relevance order
    pub documents: Vec<RetrievedDocument>,

    /// Failure, if the unit did not succeed
    pub error: Option<AppError>,
}

impl BackendResult {
    pub fn success(backend: &str, query: &str, documents: Vec<RetrievedDocument>) -> Self {
        Self {
            backend_name: backend.to_string(),
            query_variant: query.to_string(),
            documents,
            error: None,
        }
    }

    pub fn failure(backend: &str, query: &str, error: AppError) -> Self {
        Self {
            backend_name: backend.to_string(),
            query_variant: query.to_string(),
            documents: Vec::new(),
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Common trait for all retrieval backends
///
/// Implementations must be safe to call concurrently with different queries.
#[async_trait::async_trait]
pub trait Retriever: Send + Sync {
    /// Retrieve up to `top_k` documents, most relevant first
    async fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<RetrievedDocument>>;
}
