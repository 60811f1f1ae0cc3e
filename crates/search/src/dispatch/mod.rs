//! Concurrent multi-backend dispatch
//!
//! Two shapes share one execution strategy:
//! - [`Router`]: named backends, a route selector picks the subset per query
//! - [`MultiQueryDispatcher`]: one backend, one unit per query variant
//!
//! Every `(query, backend)` pair runs as its own task. The join waits for all
//! of them; a failing unit is recorded but never cancels its siblings, and
//! results come back in unit order, not completion order. An overall dispatch
//! deadline stops waiting, aborts units still in flight, and reports them as
//! timed out while keeping the units that already finished.
//! Dropping the dispatch future aborts units still in flight.

mod multi_query;
mod router;

pub use multi_query::{MultiQueryDispatcher, MultiQueryDispatcherBuilder};
pub use router::{KeywordSelector, PrioritySelector, RouteSelector, Router, RouterBuilder, SelectAll};

use crate::retrieval::{BackendResult, FusionSource, Retriever};
use futures::FutureExt;
use ragfuse_common::errors::{AppError, Result};
use ragfuse_common::metrics;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tracing::{debug, error, warn, Instrument};

/// Dispatch execution settings
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Per-unit deadline; `None` leaves deadlines to the caller
    pub unit_timeout: Option<Duration>,

    /// Deadline for the whole join; unfinished units become timeouts
    pub dispatch_timeout: Option<Duration>,

    /// Each unit fetches `top_k * candidate_multiplier` documents for fusion
    pub candidate_multiplier: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            unit_timeout: None,
            dispatch_timeout: None,
            candidate_multiplier: 2,
        }
    }
}

impl DispatchConfig {
    /// Per-unit fetch size for a caller-facing `top_k`
    pub fn fetch_size(&self, top_k: usize) -> usize {
        top_k.saturating_mul(self.candidate_multiplier.max(1))
    }
}

/// One `(query, backend)` pair
pub(crate) struct DispatchUnit {
    pub backend_name: String,
    pub query: String,
    pub backend: Arc<dyn Retriever>,
}

/// Run all units concurrently and return their results in unit order
pub(crate) async fn execute_units(
    units: Vec<DispatchUnit>,
    fetch_size: usize,
    config: &DispatchConfig,
) -> Vec<BackendResult> {
    let labels: Vec<(String, String)> = units
        .iter()
        .map(|u| (u.backend_name.clone(), u.query.clone()))
        .collect();
    let mut slots: Vec<Option<BackendResult>> = labels.iter().map(|_| None).collect();

    let mut tasks = JoinSet::new();
    for (index, unit) in units.into_iter().enumerate() {
        let span = tracing::debug_span!(
            "retrieval_unit",
            backend = %unit.backend_name,
            variant = %unit.query
        );
        let timeout = config.unit_timeout;
        tasks.spawn(
            async move { (index, run_unit(unit, fetch_size, timeout).await) }.instrument(span),
        );
    }

    let started = Instant::now();
    let deadline = config.dispatch_timeout.map(|limit| tokio::time::Instant::now() + limit);
    let mut expired = false;

    loop {
        let joined = match deadline {
            Some(at) => match tokio::time::timeout_at(at, tasks.join_next()).await {
                Ok(joined) => joined,
                Err(_) => {
                    warn!(pending = tasks.len(), "Dispatch deadline reached, abandoning in-flight units");
                    tasks.abort_all();
                    expired = true;
                    break;
                }
            },
            None => tasks.join_next().await,
        };
        let Some(joined) = joined else {
            break;
        };
        match joined {
            Ok((index, result)) => slots[index] = Some(result),
            Err(e) => warn!(error = %e, "Retrieval unit task aborted"),
        }
    }

    slots
        .into_iter()
        .zip(labels)
        .map(|(slot, (backend, query))| {
            slot.unwrap_or_else(|| {
                let err = match config.dispatch_timeout {
                    Some(limit) if expired => AppError::BackendTimeout {
                        backend: backend.clone(),
                        timeout_ms: limit.as_millis() as u64,
                    },
                    _ => AppError::backend(&backend, "unit did not complete"),
                };
                metrics::record_dispatch_unit(&backend, false, started.elapsed().as_secs_f64());
                BackendResult::failure(&backend, &query, err)
            })
        })
        .collect()
}

async fn run_unit(unit: DispatchUnit, fetch_size: usize, timeout: Option<Duration>) -> BackendResult {
    let start = Instant::now();
    let name = unit.backend_name.as_str();

    let call = AssertUnwindSafe(unit.backend.retrieve(&unit.query, fetch_size)).catch_unwind();
    let outcome = match timeout {
        Some(limit) => match tokio::time::timeout(limit, call).await {
            Ok(outcome) => outcome,
            Err(_) => Ok(Err(AppError::BackendTimeout {
                backend: name.to_string(),
                timeout_ms: limit.as_millis() as u64,
            })),
        },
        None => call.await,
    };

    let result = match outcome {
        Ok(Ok(documents)) => {
            let documents = documents.iter().map(|d| d.stamped(name)).collect();
            BackendResult::success(name, &unit.query, documents)
        }
        Ok(Err(e)) => BackendResult::failure(name, &unit.query, e),
        Err(_) => BackendResult::failure(name, &unit.query, AppError::backend(name, "backend panicked")),
    };

    let elapsed = start.elapsed().as_secs_f64();
    metrics::record_dispatch_unit(name, result.is_success(), elapsed);

    match &result.error {
        None => debug!(count = result.documents.len(), elapsed_ms = elapsed * 1000.0, "Retrieval unit succeeded"),
        Some(e) => warn!(error = %e, elapsed_ms = elapsed * 1000.0, "Retrieval unit failed"),
    }

    result
}

/// How fusion sources are keyed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SourceKeying {
    Backend,
    Variant,
    Pair,
}

/// Joined results of one dispatch
#[derive(Debug)]
pub struct DispatchOutcome {
    /// Successful units, in unit order
    pub succeeded: Vec<BackendResult>,

    /// Failed units with their errors retained, in unit order
    pub failed: Vec<BackendResult>,

    keying: SourceKeying,
}

impl DispatchOutcome {
    /// Partition joined results
    ///
    /// Fails with the first unit's error only when every unit failed.
    pub fn from_results(results: Vec<BackendResult>) -> Result<Self> {
        let backends: HashSet<&str> = results.iter().map(|r| r.backend_name.as_str()).collect();
        let variants: HashSet<&str> = results.iter().map(|r| r.query_variant.as_str()).collect();
        let keying = match (backends.len() > 1, variants.len() > 1) {
            (_, false) => SourceKeying::Backend,
            (false, true) => SourceKeying::Variant,
            (true, true) => SourceKeying::Pair,
        };

        let (succeeded, mut failed): (Vec<_>, Vec<_>) =
            results.into_iter().partition(BackendResult::is_success);

        if succeeded.is_empty() && !failed.is_empty() {
            let total = failed.len();
            let first = failed.remove(0);
            let err = first.error.unwrap_or_else(|| AppError::backend(&first.backend_name, "unknown failure"));
            error!(units = total, error = %err, "All retrieval units failed");
            return Err(err);
        }

        Ok(Self { succeeded, failed, keying })
    }

    pub fn total_units(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }

    /// Fusion inputs from the successful units, in unit order
    pub fn sources(&self) -> Vec<FusionSource> {
        self.succeeded
            .iter()
            .map(|r| {
                let key = match self.keying {
                    SourceKeying::Backend => r.backend_name.clone(),
                    SourceKeying::Variant => r.query_variant.clone(),
                    SourceKeying::Pair => format!("{}|{}", r.backend_name, r.query_variant),
                };
                FusionSource {
                    key,
                    backend: r.backend_name.clone(),
                    documents: r.documents.clone(),
                }
            })
            .collect()
    }
}
