//! End-to-end retrieval pipeline
//!
//! A linear run of stages over a single-owner [`PipelineState`]:
//!
//! ```text
//! init -> optimize -> retrieve -> dedup -> rerank -> finalize
//! ```
//!
//! Only setup errors and total retrieval failure reach the caller. Model
//! failures degrade to the unmodified query or ordering, and failing backends
//! just contribute nothing.

use crate::dedup::{deduplicate, DedupConfig};
use crate::dispatch::{DispatchConfig, RouteSelector, Router, RouterBuilder};
use crate::events::{EventBus, EventSink, PipelineEvent};
use crate::query::{QueryBundle, QueryGenerator, QueryProcessor, QueryProcessorConfig};
use crate::rerank::{
    CompositeConfig, CompositeReranker, LlmReranker, LlmRerankerConfig, MmrConfig, MmrReranker,
    RerankStrategy, Reranker, RerankerChain, ScoreReranker,
};
use crate::retrieval::{fuse, FusionAlgorithm, FusionConfig, RetrievedDocument, Retriever, DEFAULT_RRF_K};
use ragfuse_common::errors::{AppError, Result};
use ragfuse_common::llm::LanguageModel;
use ragfuse_common::metrics;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;
use validator::Validate;

/// Reranker stage selector
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RerankerKind {
    Score,
    Mmr,
    Composite,
    Llm,
}

/// Pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct PipelineConfig {
    /// Restate the query with the language model before retrieval
    #[serde(default)]
    pub enable_rewrite: bool,

    /// Generate paraphrases with the language model
    #[serde(default)]
    pub enable_expand: bool,

    /// Paraphrases requested per query
    #[serde(default = "default_num_variants")]
    #[validate(range(max = 10))]
    pub num_variants: usize,

    /// Dispatch every variant instead of only the primary query
    #[serde(default)]
    pub enable_multi_query: bool,

    #[serde(default = "default_true")]
    pub enable_rerank: bool,

    /// Maximum documents returned
    #[serde(default = "default_top_k")]
    #[validate(range(min = 1, max = 100))]
    pub top_k: usize,

    #[serde(default)]
    pub fusion_algorithm: FusionAlgorithm,

    /// RRF constant
    #[serde(default = "default_rrf_k")]
    #[validate(range(min = 0.0))]
    pub rrf_k: f64,

    /// Per-source weights for weighted fusion
    #[serde(default)]
    pub fusion_weights: HashMap<String, f64>,

    /// Rerankers to apply, in order
    #[serde(default = "default_rerank_chain")]
    pub rerank_chain: Vec<RerankerKind>,

    #[serde(default)]
    pub rerank_strategy: RerankStrategy,

    /// Jaccard threshold for near-duplicate removal
    #[serde(default = "default_dedup_threshold")]
    #[validate(range(min = 0.0, max = 1.0))]
    pub dedup_threshold: f64,

    #[serde(default = "default_mmr_lambda")]
    #[validate(range(min = 0.0, max = 1.0))]
    pub mmr_lambda: f64,

    /// Settings for the composite reranker stage
    #[serde(default)]
    pub composite: CompositeConfig,

    /// Per-unit backend deadline in milliseconds (none by default)
    #[serde(default)]
    pub unit_timeout_ms: Option<u64>,

    /// Deadline for the whole fan-out in milliseconds; units still running
    /// then count as timed out and the finished ones are fused
    #[serde(default)]
    pub dispatch_timeout_ms: Option<u64>,

    /// Deadline for each language-model call in milliseconds
    #[serde(default = "default_model_timeout_ms")]
    pub model_timeout_ms: u64,
}

fn default_true() -> bool { true }
fn default_num_variants() -> usize { 3 }
fn default_top_k() -> usize { ragfuse_common::DEFAULT_TOP_K }
fn default_rrf_k() -> f64 { DEFAULT_RRF_K }
fn default_rerank_chain() -> Vec<RerankerKind> { vec![RerankerKind::Score] }
fn default_dedup_threshold() -> f64 { 0.85 }
fn default_mmr_lambda() -> f64 { 0.7 }
fn default_model_timeout_ms() -> u64 { 10_000 }

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            enable_rewrite: false,
            enable_expand: false,
            num_variants: default_num_variants(),
            enable_multi_query: false,
            enable_rerank: true,
            top_k: default_top_k(),
            fusion_algorithm: FusionAlgorithm::default(),
            rrf_k: default_rrf_k(),
            fusion_weights: HashMap::new(),
            rerank_chain: default_rerank_chain(),
            rerank_strategy: RerankStrategy::default(),
            dedup_threshold: default_dedup_threshold(),
            mmr_lambda: default_mmr_lambda(),
            composite: CompositeConfig::default(),
            unit_timeout_ms: None,
            dispatch_timeout_ms: None,
            model_timeout_ms: default_model_timeout_ms(),
        }
    }
}

impl PipelineConfig {
    fn fusion_config(&self) -> FusionConfig {
        FusionConfig {
            algorithm: self.fusion_algorithm,
            rrf_k: self.rrf_k,
            weights: self.fusion_weights.clone(),
        }
    }

    fn needs_model(&self) -> bool {
        self.enable_rewrite
            || self.enable_expand
            || (self.enable_rerank && self.rerank_chain.contains(&RerankerKind::Llm))
    }
}

/// Per-request counters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetrievalStats {
    /// Queries dispatched per backend
    pub variants: usize,
    pub units_succeeded: usize,
    pub units_failed: usize,
    /// Documents after fusion
    pub fused_count: usize,
    pub dedup_removed: usize,
    pub elapsed_ms: u64,
}

/// Pipeline output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub request_id: Uuid,
    pub query_bundle: QueryBundle,
    /// At most `top_k` documents, best first
    pub documents: Vec<RetrievedDocument>,
    pub stats: RetrievalStats,
}

impl RetrievalResult {
    /// Pretty-printed JSON for downstream consumers
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// State threaded through the stages; owned by exactly one stage at a time
#[derive(Debug)]
pub struct PipelineState {
    pub request_id: Uuid,
    pub query: String,
    pub top_k: usize,
    pub bundle: QueryBundle,
    pub documents: Vec<RetrievedDocument>,
    pub stats: RetrievalStats,
    started: Instant,
}

impl PipelineState {
    fn new(query: &str, top_k: usize) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            query: query.to_string(),
            top_k,
            bundle: QueryBundle::single(query),
            documents: Vec::new(),
            stats: RetrievalStats::default(),
            started: Instant::now(),
        }
    }
}

/// Builder for [`RetrievalPipeline`]
pub struct RetrievalPipelineBuilder {
    config: PipelineConfig,
    router: RouterBuilder,
    model: Option<Arc<dyn LanguageModel>>,
    generator: Option<Arc<dyn QueryGenerator>>,
    extra_rerankers: Vec<Arc<dyn Reranker>>,
    events: EventBus,
}

impl RetrievalPipelineBuilder {
    pub fn backend(mut self, name: impl Into<String>, retriever: Arc<dyn Retriever>) -> Self {
        self.router = self.router.backend(name, retriever);
        self
    }

    pub fn selector(mut self, selector: impl RouteSelector + 'static) -> Self {
        self.router = self.router.selector(selector);
        self
    }

    /// Language model for rewrite, expansion, and LLM rerank
    pub fn model(mut self, model: Arc<dyn LanguageModel>) -> Self {
        self.model = Some(model);
        self
    }

    /// Custom multi-query variant generator; takes precedence over expansion
    pub fn generator(mut self, generator: impl QueryGenerator + 'static) -> Self {
        self.generator = Some(Arc::new(generator));
        self
    }

    /// Append a caller-supplied reranker after the configured chain
    pub fn reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.extra_rerankers.push(reranker);
        self
    }

    pub fn event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events.subscribe(sink);
        self
    }

    /// Validate settings and assemble the stages
    pub fn build(self) -> Result<RetrievalPipeline> {
        let config = self.config;
        config.validate()?;

        if config.needs_model() && self.model.is_none() {
            return Err(AppError::config(
                "rewrite, expansion, and LLM rerank require a language model",
            ));
        }
        if config.enable_multi_query && !config.enable_expand && self.generator.is_none() {
            return Err(AppError::config(
                "multi-query retrieval requires expansion or a query generator",
            ));
        }
        if config.enable_expand && !config.enable_multi_query && self.generator.is_none() {
            warn!("Query expansion has no effect without multi-query");
        }

        let dispatch = DispatchConfig {
            unit_timeout: config.unit_timeout_ms.map(Duration::from_millis),
            dispatch_timeout: config.dispatch_timeout_ms.map(Duration::from_millis),
            ..DispatchConfig::default()
        };
        let router = self
            .router
            .fusion(config.fusion_config())
            .dispatch(dispatch.clone())
            .build()?;

        let model_timeout = Duration::from_millis(config.model_timeout_ms);
        let processor = self.model.clone().map(|model| {
            QueryProcessor::new(
                model,
                QueryProcessorConfig {
                    num_variants: config.num_variants,
                    model_timeout,
                    include_original: true,
                },
            )
        });

        let mut reranker = RerankerChain::new(config.rerank_strategy);
        if config.enable_rerank {
            for kind in &config.rerank_chain {
                reranker = match kind {
                    RerankerKind::Score if config.fusion_algorithm.is_order_based() => {
                        debug!(
                            fusion = config.fusion_algorithm.as_str(),
                            "Skipping score rerank, fusion order is positional"
                        );
                        reranker
                    }
                    RerankerKind::Score => reranker.with(ScoreReranker),
                    RerankerKind::Mmr => reranker.with(MmrReranker::new(MmrConfig {
                        k: config.top_k,
                        lambda: config.mmr_lambda,
                    })),
                    RerankerKind::Composite => {
                        reranker.with(CompositeReranker::new(config.composite.clone()))
                    }
                    RerankerKind::Llm => {
                        let model = self
                            .model
                            .clone()
                            .ok_or_else(|| AppError::config("LLM rerank requires a language model"))?;
                        reranker.with(LlmReranker::new(
                            model,
                            LlmRerankerConfig {
                                top_n: config.top_k,
                                timeout: model_timeout,
                                ..LlmRerankerConfig::default()
                            },
                        ))
                    }
                };
            }
            for extra in self.extra_rerankers {
                reranker = reranker.push(extra, 1.0);
            }
        }

        Ok(RetrievalPipeline {
            dedup: DedupConfig {
                similarity_threshold: config.dedup_threshold,
                ..DedupConfig::default()
            },
            config,
            dispatch,
            router,
            processor,
            generator: self.generator,
            reranker,
            events: self.events,
        })
    }
}

/// Query optimization, fan-out, fusion, de-duplication, and reranking
pub struct RetrievalPipeline {
    config: PipelineConfig,
    dispatch: DispatchConfig,
    router: Router,
    processor: Option<QueryProcessor>,
    generator: Option<Arc<dyn QueryGenerator>>,
    reranker: RerankerChain,
    dedup: DedupConfig,
    events: EventBus,
}

impl RetrievalPipeline {
    pub fn builder(config: PipelineConfig) -> RetrievalPipelineBuilder {
        RetrievalPipelineBuilder {
            config,
            router: Router::builder(),
            model: None,
            generator: None,
            extra_rerankers: Vec::new(),
            events: EventBus::new(),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run with the configured `top_k`
    pub async fn retrieve(&self, query: &str) -> Result<RetrievalResult> {
        self.retrieve_top_k(query, self.config.top_k).await
    }

    /// Run with a per-request `top_k`
    pub async fn retrieve_top_k(&self, query: &str, top_k: usize) -> Result<RetrievalResult> {
        let query = query.trim();
        if query.is_empty() {
            return Err(AppError::Validation {
                message: "query must not be empty".to_string(),
                field: Some("query".to_string()),
            });
        }
        if top_k == 0 {
            return Err(AppError::Validation {
                message: "top_k must be at least 1".to_string(),
                field: Some("top_k".to_string()),
            });
        }

        let state = PipelineState::new(query, top_k);
        let span = info_span!("retrieval_pipeline", request_id = %state.request_id);

        async move {
            let state = self.optimize(state).await;
            let state = self.retrieve_stage(state).await?;
            let state = self.dedup_stage(state);
            let state = self.rerank_stage(state).await;
            Ok(self.finalize(state))
        }
        .instrument(span)
        .await
    }

    fn emit(&self, state: &PipelineState, stage: &str, detail: serde_json::Value) {
        if self.events.has_subscribers() {
            self.events.emit(PipelineEvent::new(state.request_id, stage, detail));
        }
    }

    async fn optimize(&self, mut state: PipelineState) -> PipelineState {
        let query = state.query.as_str();

        let rewritten = match (&self.processor, self.config.enable_rewrite) {
            (Some(processor), true) => processor.rewrite(query).await,
            _ => query.to_string(),
        };

        state.bundle = if self.config.enable_multi_query {
            let variants = match (&self.generator, &self.processor) {
                (Some(generator), _) => generator.generate(&rewritten),
                (None, Some(processor)) if self.config.enable_expand => {
                    processor.expand(&rewritten, self.config.num_variants).await
                }
                _ => vec![rewritten],
            };
            QueryBundle::new(query, variants, true)
        } else {
            // Single query: the rewrite when there is one, else the original
            QueryBundle::new(query, [rewritten], false)
        };

        self.emit(&state, "optimize", json!({ "variants": state.bundle.variants }));
        state
    }

    async fn retrieve_stage(&self, mut state: PipelineState) -> Result<PipelineState> {
        let outcome = self.router.dispatch(&state.bundle, state.top_k).await?;

        let mut fused = fuse(self.router.fusion(), &outcome.sources());
        fused.truncate(self.dispatch.fetch_size(state.top_k));

        state.stats.variants = state.bundle.len();
        state.stats.units_succeeded = outcome.succeeded.len();
        state.stats.units_failed = outcome.failed.len();
        state.stats.fused_count = fused.len();
        state.documents = fused;

        self.emit(
            &state,
            "retrieve",
            json!({
                "succeeded": state.stats.units_succeeded,
                "failed": state.stats.units_failed,
                "fused": state.stats.fused_count,
            }),
        );
        Ok(state)
    }

    fn dedup_stage(&self, mut state: PipelineState) -> PipelineState {
        let outcome = deduplicate(&state.documents, &self.dedup);
        state.stats.dedup_removed = outcome.removed_count;
        state.documents = outcome.unique;

        self.emit(&state, "dedup", json!({ "removed": outcome.removed_count }));
        state
    }

    async fn rerank_stage(&self, mut state: PipelineState) -> PipelineState {
        if self.reranker.is_empty() {
            return state;
        }

        let documents = std::mem::take(&mut state.documents);
        state.documents = self.reranker.rerank(&state.bundle.original, documents).await;

        self.emit(&state, "rerank", json!({ "reranker": self.reranker.name(), "count": state.documents.len() }));
        state
    }

    fn finalize(&self, mut state: PipelineState) -> RetrievalResult {
        state.documents.truncate(state.top_k);
        let elapsed = state.started.elapsed();
        state.stats.elapsed_ms = elapsed.as_millis() as u64;

        metrics::record_pipeline(
            elapsed.as_secs_f64(),
            self.config.fusion_algorithm.as_str(),
            state.documents.len(),
        );
        info!(
            results = state.documents.len(),
            units_failed = state.stats.units_failed,
            dedup_removed = state.stats.dedup_removed,
            elapsed_ms = state.stats.elapsed_ms,
            "Retrieval complete"
        );
        self.emit(&state, "finalize", json!({ "results": state.documents.len() }));

        RetrievalResult {
            request_id: state.request_id,
            query_bundle: state.bundle,
            documents: state.documents,
            stats: state.stats,
        }
    }
}
