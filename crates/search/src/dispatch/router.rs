//! Router mode: a fixed set of named backends with per-query routing

use super::{execute_units, DispatchConfig, DispatchOutcome, DispatchUnit};
use crate::query::QueryBundle;
use crate::retrieval::{fuse, FusionConfig, RetrievedDocument, Retriever};
use ragfuse_common::config::BackendConfig;
use ragfuse_common::errors::{AppError, Result};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Chooses which backends to query for an input
///
/// An empty selection means every registered backend.
pub trait RouteSelector: Send + Sync {
    fn select(&self, query: &str) -> Vec<String>;
}

/// Default policy: query every backend
#[derive(Debug, Clone, Copy, Default)]
pub struct SelectAll;

impl RouteSelector for SelectAll {
    fn select(&self, _query: &str) -> Vec<String> {
        Vec::new()
    }
}

/// Routes by case-insensitive keyword substrings per backend
#[derive(Debug, Clone, Default)]
pub struct KeywordSelector {
    rules: Vec<(String, Vec<String>)>,
}

impl KeywordSelector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: route `backend` when any of `keywords` occurs in the query
    pub fn rule<I, S>(mut self, backend: impl Into<String>, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let keywords = keywords
            .into_iter()
            .map(|k| k.as_ref().trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();
        self.rules.push((backend.into(), keywords));
        self
    }

    /// Rules from configured backend keyword lists
    pub fn from_backends(backends: &[BackendConfig]) -> Self {
        backends
            .iter()
            .fold(Self::new(), |selector, b| selector.rule(&b.name, &b.keywords))
    }
}

impl RouteSelector for KeywordSelector {
    fn select(&self, query: &str) -> Vec<String> {
        let query = query.to_lowercase();
        self.rules
            .iter()
            .filter(|(_, keywords)| keywords.iter().any(|k| query.contains(k.as_str())))
            .map(|(backend, _)| backend.clone())
            .collect()
    }
}

/// Always returns the same ordered subset
#[derive(Debug, Clone, Default)]
pub struct PrioritySelector {
    order: Vec<String>,
}

impl PrioritySelector {
    pub fn new<I, S>(order: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { order: order.into_iter().map(Into::into).collect() }
    }
}

impl RouteSelector for PrioritySelector {
    fn select(&self, _query: &str) -> Vec<String> {
        self.order.clone()
    }
}

/// Multi-backend router
pub struct Router {
    backends: Vec<(String, Arc<dyn Retriever>)>,
    selector: Arc<dyn RouteSelector>,
    fusion: FusionConfig,
    dispatch: DispatchConfig,
}

/// Builder for [`Router`]
pub struct RouterBuilder {
    backends: Vec<(String, Arc<dyn Retriever>)>,
    selector: Option<Arc<dyn RouteSelector>>,
    fusion: FusionConfig,
    dispatch: DispatchConfig,
}

impl RouterBuilder {
    /// Register a named backend
    pub fn backend(mut self, name: impl Into<String>, retriever: Arc<dyn Retriever>) -> Self {
        self.backends.push((name.into(), retriever));
        self
    }

    pub fn selector(mut self, selector: impl RouteSelector + 'static) -> Self {
        self.selector = Some(Arc::new(selector));
        self
    }

    pub fn fusion(mut self, fusion: FusionConfig) -> Self {
        self.fusion = fusion;
        self
    }

    pub fn dispatch(mut self, dispatch: DispatchConfig) -> Self {
        self.dispatch = dispatch;
        self
    }

    /// Validate and build; requires at least one uniquely named backend
    pub fn build(self) -> Result<Router> {
        if self.backends.is_empty() {
            return Err(AppError::config("router requires at least one backend"));
        }

        let mut names = HashSet::new();
        for (name, _) in &self.backends {
            if name.is_empty() {
                return Err(AppError::config("backend name must not be empty"));
            }
            if !names.insert(name.as_str()) {
                return Err(AppError::config(format!("duplicate backend name '{}'", name)));
            }
        }

        Ok(Router {
            backends: self.backends,
            selector: self.selector.unwrap_or_else(|| Arc::new(SelectAll)),
            fusion: self.fusion,
            dispatch: self.dispatch,
        })
    }
}

impl Router {
    pub fn builder() -> RouterBuilder {
        RouterBuilder {
            backends: Vec::new(),
            selector: None,
            fusion: FusionConfig::default(),
            dispatch: DispatchConfig::default(),
        }
    }

    pub fn backend_names(&self) -> Vec<&str> {
        self.backends.iter().map(|(n, _)| n.as_str()).collect()
    }

    pub fn fusion(&self) -> &FusionConfig {
        &self.fusion
    }

    /// Backends selected for `query`, in selector order
    ///
    /// Unknown names are ignored; an empty selection falls back to all backends.
    pub fn route(&self, query: &str) -> Vec<(String, Arc<dyn Retriever>)> {
        let mut seen = HashSet::new();
        let mut selected = Vec::new();

        for name in self.selector.select(query) {
            if !seen.insert(name.clone()) {
                continue;
            }
            match self.backends.iter().find(|(n, _)| *n == name) {
                Some(entry) => selected.push(entry.clone()),
                None => warn!(backend = %name, "Route selector chose an unknown backend"),
            }
        }

        if selected.is_empty() {
            return self.backends.clone();
        }

        debug!(selected = ?selected.iter().map(|(n, _)| n.as_str()).collect::<Vec<_>>(), "Routed query");
        selected
    }

    /// Run every selected backend against every variant
    pub async fn dispatch(&self, bundle: &QueryBundle, top_k: usize) -> Result<DispatchOutcome> {
        let units = self
            .route(&bundle.original)
            .into_iter()
            .flat_map(|(name, backend)| {
                bundle.variants.iter().map(move |query| DispatchUnit {
                    backend_name: name.clone(),
                    query: query.clone(),
                    backend: backend.clone(),
                })
            })
            .collect();

        let results = execute_units(units, self.dispatch.fetch_size(top_k), &self.dispatch).await;
        DispatchOutcome::from_results(results)
    }

    /// Dispatch a bundle, fuse, and cap at `top_k`
    pub async fn retrieve_bundle(&self, bundle: &QueryBundle, top_k: usize) -> Result<Vec<RetrievedDocument>> {
        let outcome = self.dispatch(bundle, top_k).await?;
        let mut fused = fuse(&self.fusion, &outcome.sources());
        fused.truncate(top_k);
        Ok(fused)
    }

    /// Single-query retrieval across the routed backends
    pub async fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<RetrievedDocument>> {
        self.retrieve_bundle(&QueryBundle::single(query), top_k).await
    }
}
