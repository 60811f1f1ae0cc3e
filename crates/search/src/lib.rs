//! RagFuse retrieval engine
//!
//! Parallel retrieval and fusion for retrieval-augmented generation:
//! - Query rewriting, expansion, and deterministic variants
//! - Concurrent fan-out across backends (router and multi-query modes)
//! - RRF, weighted, round-robin, and concatenation fusion
//! - Signature and similarity de-duplication
//! - Score, MMR, composite, and LLM reranking, alone or chained

pub mod context;
pub mod dedup;
pub mod dispatch;
pub mod events;
pub mod pipeline;
pub mod query;
pub mod rerank;
pub mod retrieval;
pub mod text;

pub use context::{render_context, ContextOptions};
pub use dedup::{deduplicate, DedupConfig, DedupOutcome};
pub use dispatch::{DispatchConfig, DispatchOutcome, MultiQueryDispatcher, Router};
pub use events::{EventBus, EventSink, PipelineEvent};
pub use pipeline::{PipelineConfig, RerankerKind, RetrievalPipeline, RetrievalResult, RetrievalStats};
pub use query::{QueryBundle, QueryGenerator, QueryProcessor};
pub use rerank::{RerankStrategy, Reranker, RerankerChain};
pub use retrieval::{BackendResult, FusionAlgorithm, FusionConfig, RetrievedDocument, Retriever};
