//! Multi-query mode: one backend, one unit per query variant

use super::{execute_units, DispatchConfig, DispatchOutcome, DispatchUnit};
use crate::query::{QueryBundle, QueryGenerator, QueryProcessor, QueryProcessorConfig};
use crate::retrieval::{fuse, FusionConfig, RetrievedDocument, Retriever};
use ragfuse_common::errors::{AppError, Result};
use ragfuse_common::llm::LanguageModel;
use std::sync::Arc;
use tracing::debug;

/// Queries a single backend once per generated variant and fuses by variant
pub struct MultiQueryDispatcher {
    backend_name: String,
    backend: Arc<dyn Retriever>,
    processor: Option<QueryProcessor>,
    generator: Option<Arc<dyn QueryGenerator>>,
    num_variants: usize,
    include_original: bool,
    fusion: FusionConfig,
    dispatch: DispatchConfig,
}

/// Builder for [`MultiQueryDispatcher`]
#[derive(Default)]
pub struct MultiQueryDispatcherBuilder {
    backend: Option<(String, Arc<dyn Retriever>)>,
    model: Option<Arc<dyn LanguageModel>>,
    generator: Option<Arc<dyn QueryGenerator>>,
    processor_config: QueryProcessorConfig,
    fusion: FusionConfig,
    dispatch: DispatchConfig,
}

impl MultiQueryDispatcherBuilder {
    pub fn backend(mut self, name: impl Into<String>, retriever: Arc<dyn Retriever>) -> Self {
        self.backend = Some((name.into(), retriever));
        self
    }

    /// Language model used to paraphrase the query
    pub fn rewriter(mut self, model: Arc<dyn LanguageModel>) -> Self {
        self.model = Some(model);
        self
    }

    /// Custom variant generator; takes precedence over the rewriter
    pub fn generator(mut self, generator: impl QueryGenerator + 'static) -> Self {
        self.generator = Some(Arc::new(generator));
        self
    }

    pub fn num_variants(mut self, n: usize) -> Self {
        self.processor_config.num_variants = n;
        self
    }

    pub fn include_original(mut self, include: bool) -> Self {
        self.processor_config.include_original = include;
        self
    }

    pub fn processor_config(mut self, config: QueryProcessorConfig) -> Self {
        self.processor_config = config;
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

    /// Validate and build; requires a backend and a rewriter or generator
    pub fn build(self) -> Result<MultiQueryDispatcher> {
        let (backend_name, backend) = self
            .backend
            .ok_or_else(|| AppError::config("multi-query dispatcher requires a backend"))?;

        if self.model.is_none() && self.generator.is_none() {
            return Err(AppError::config(
                "multi-query dispatcher requires a language-model rewriter or a query generator",
            ));
        }

        let num_variants = self.processor_config.num_variants;
        let include_original = self.processor_config.include_original;

        Ok(MultiQueryDispatcher {
            backend_name,
            backend,
            processor: self.model.map(|m| QueryProcessor::new(m, self.processor_config)),
            generator: self.generator,
            num_variants,
            include_original,
            fusion: self.fusion,
            dispatch: self.dispatch,
        })
    }
}

impl MultiQueryDispatcher {
    pub fn builder() -> MultiQueryDispatcherBuilder {
        MultiQueryDispatcherBuilder::default()
    }

    /// Variants to run for `query`
    pub async fn generate_bundle(&self, query: &str) -> QueryBundle {
        let bundle = match (&self.generator, &self.processor) {
            (Some(generator), _) => QueryBundle::new(query, generator.generate(query), self.include_original),
            (None, Some(processor)) => QueryBundle::new(
                query,
                processor.expand(query, self.num_variants).await,
                self.include_original,
            ),
            (None, None) => QueryBundle::single(query),
        };

        debug!(variants = ?bundle.variants, "Generated query variants");
        bundle
    }

    /// Run the backend once per variant
    pub async fn dispatch(&self, bundle: &QueryBundle, top_k: usize) -> Result<DispatchOutcome> {
        let units = bundle
            .variants
            .iter()
            .map(|query| DispatchUnit {
                backend_name: self.backend_name.clone(),
                query: query.clone(),
                backend: self.backend.clone(),
            })
            .collect();

        let results = execute_units(units, self.dispatch.fetch_size(top_k), &self.dispatch).await;
        DispatchOutcome::from_results(results)
    }

    /// Generate variants, dispatch, fuse by variant, and cap at `top_k`
    pub async fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<RetrievedDocument>> {
        let bundle = self.generate_bundle(query).await;
        let outcome = self.dispatch(&bundle, top_k).await?;
        let mut fused = fuse(&self.fusion, &outcome.sources());
        fused.truncate(top_k);
        Ok(fused)
    }
}
