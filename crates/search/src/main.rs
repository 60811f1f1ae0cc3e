//! RagFuse search CLI
//!
//! Runs one query through the retrieval pipeline against the configured
//! HTTP backends and prints the rendered context block.
//!
//! Usage: `search [--json] <query...>`

use anyhow::Context;
use metrics_exporter_prometheus::PrometheusBuilder;
use ragfuse_common::{
    config::{load_section, AppConfig},
    llm::{LanguageModel, OpenAiChatModel},
    metrics::{register_metrics, UNIT_LATENCY_BUCKETS},
    VERSION,
};
use ragfuse_search::{
    dispatch::KeywordSelector,
    render_context,
    retrieval::HttpRetriever,
    ContextOptions, PipelineConfig, RetrievalPipeline,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = AppConfig::load().context("failed to load configuration")?;
    init_tracing(&config);

    info!("Starting RagFuse search v{}", VERSION);

    let (flags, words): (Vec<String>, Vec<String>) =
        std::env::args().skip(1).partition(|arg| arg.starts_with("--"));
    let as_json = flags.iter().any(|f| f == "--json");
    let query = words.join(" ");
    if query.trim().is_empty() {
        anyhow::bail!("usage: search [--json] <query...>");
    }

    if config.observability.metrics_port > 0 {
        let addr: SocketAddr = ([0, 0, 0, 0], config.observability.metrics_port).into();
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .set_buckets(UNIT_LATENCY_BUCKETS)?
            .install()
            .context("failed to install Prometheus exporter")?;
        info!(%addr, "Metrics exporter listening");
    }
    register_metrics();

    let pipeline_config: PipelineConfig =
        load_section("pipeline").context("failed to load pipeline configuration")?;

    let mut builder = RetrievalPipeline::builder(pipeline_config)
        .selector(KeywordSelector::from_backends(&config.backends));

    for backend in &config.backends {
        let retriever = HttpRetriever::new(backend)?;
        info!(backend = %backend.name, endpoint = %backend.endpoint, "Registered backend");
        builder = builder.backend(&backend.name, Arc::new(retriever));
    }

    if config.llm.is_enabled() {
        let model: Arc<dyn LanguageModel> = Arc::new(OpenAiChatModel::new(config.llm.clone())?);
        info!(model = model.model_name(), "Language model enabled");
        builder = builder.model(model);
    } else {
        warn!("No language model configured, rewrite and LLM rerank unavailable");
    }

    let pipeline = builder.build()?;
    let result = pipeline.retrieve(&query).await?;

    info!(
        request_id = %result.request_id,
        variants = result.query_bundle.len(),
        results = result.documents.len(),
        elapsed_ms = result.stats.elapsed_ms,
        "Query complete"
    );

    if as_json {
        println!("{}", result.to_json()?);
    } else {
        print!("{}", render_context(&result.documents, &ContextOptions::default()));
    }
    Ok(())
}

fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.observability.log_level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);

    if config.observability.json_logging {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}
