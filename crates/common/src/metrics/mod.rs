//! Metrics and observability utilities
//!
//! Provides Prometheus metrics for the retrieval pipeline
//! with standardized naming conventions.

use metrics::{
    counter, describe_counter, describe_gauge, describe_histogram,
    gauge, histogram, Unit,
};

/// Metrics prefix for all RagFuse metrics
pub const METRICS_PREFIX: &str = "ragfuse";

/// Histogram buckets for backend unit latency (in seconds)
pub const UNIT_LATENCY_BUCKETS: &[f64] = &[
    0.005,  // 5ms
    0.010,  // 10ms
    0.025,  // 25ms
    0.050,  // 50ms
    0.100,  // 100ms
    0.250,  // 250ms
    0.500,  // 500ms
    1.000,  // 1s
    2.500,  // 2.5s
    5.000,  // 5s
    10.00,  // 10s
];

/// Register all metric descriptions
pub fn register_metrics() {
    // Dispatch metrics
    describe_counter!(
        format!("{}_dispatch_units_total", METRICS_PREFIX),
        Unit::Count,
        "Total (query, backend) retrieval units executed"
    );

    describe_histogram!(
        format!("{}_dispatch_unit_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Retrieval unit latency in seconds"
    );

    // Query processing metrics
    describe_counter!(
        format!("{}_model_fallbacks_total", METRICS_PREFIX),
        Unit::Count,
        "Language-model calls that fell back to the unmodified input"
    );

    // Dedup metrics
    describe_counter!(
        format!("{}_dedup_removed_total", METRICS_PREFIX),
        Unit::Count,
        "Documents removed by deduplication"
    );

    // Pipeline metrics
    describe_histogram!(
        format!("{}_pipeline_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "End-to-end retrieval pipeline latency in seconds"
    );

    describe_gauge!(
        format!("{}_pipeline_results_count", METRICS_PREFIX),
        Unit::Count,
        "Number of documents returned by the pipeline"
    );

    tracing::info!("Metrics registered");
}

/// Helper to record one retrieval unit
pub fn record_dispatch_unit(backend: &str, success: bool, duration_secs: f64) {
    let status = if success { "success" } else { "error" };

    counter!(
        format!("{}_dispatch_units_total", METRICS_PREFIX),
        "backend" => backend.to_string(),
        "status" => status
    )
    .increment(1);

    histogram!(
        format!("{}_dispatch_unit_duration_seconds", METRICS_PREFIX),
        "backend" => backend.to_string()
    )
    .record(duration_secs);
}

/// Helper to record a model fallback (rewrite, expand, llm_rerank)
pub fn record_model_fallback(operation: &str) {
    counter!(
        format!("{}_model_fallbacks_total", METRICS_PREFIX),
        "operation" => operation.to_string()
    )
    .increment(1);
}

/// Helper to record dedup removals
pub fn record_dedup(pass: &str, removed: usize) {
    counter!(
        format!("{}_dedup_removed_total", METRICS_PREFIX),
        "pass" => pass.to_string()
    )
    .increment(removed as u64);
}

/// Helper to record a completed pipeline run
pub fn record_pipeline(duration_secs: f64, fusion: &str, result_count: usize) {
    histogram!(
        format!("{}_pipeline_duration_seconds", METRICS_PREFIX),
        "fusion" => fusion.to_string()
    )
    .record(duration_secs);

    gauge!(
        format!("{}_pipeline_results_count", METRICS_PREFIX),
        "fusion" => fusion.to_string()
    )
    .set(result_count as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latency_buckets() {
        let mut prev = 0.0;
        for &bucket in UNIT_LATENCY_BUCKETS {
            assert!(bucket > prev);
            prev = bucket;
        }
    }

    #[test]
    fn test_recorders_without_exporter() {
        // No recorder installed: calls are no-ops
        register_metrics();
        record_dispatch_unit("kb", true, 0.01);
        record_model_fallback("rewrite");
        record_dedup("signature", 2);
        record_pipeline(0.2, "rrf", 5);
    }
}
