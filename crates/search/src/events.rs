//! Pipeline progress events
//!
//! Publishing is fire-and-forget: each delivery runs on its own detached
//! task, and sink failures are logged and dropped.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ragfuse_common::errors::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// One stage transition of a retrieval request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineEvent {
    pub request_id: Uuid,

    /// Stage name (optimize, retrieve, dedup, rerank, finalize)
    pub stage: String,

    /// Free-form stage detail (counts, timings)
    pub detail: serde_json::Value,

    pub at: DateTime<Utc>,
}

impl PipelineEvent {
    pub fn new(request_id: Uuid, stage: impl Into<String>, detail: serde_json::Value) -> Self {
        Self {
            request_id,
            stage: stage.into(),
            detail,
            at: Utc::now(),
        }
    }
}

/// Receiver of pipeline events
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, event: PipelineEvent) -> Result<()>;
}

/// Fan-out of events to registered sinks
#[derive(Clone, Default)]
pub struct EventBus {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, sink: Arc<dyn EventSink>) {
        self.sinks.push(sink);
    }

    pub fn has_subscribers(&self) -> bool {
        !self.sinks.is_empty()
    }

    /// Deliver `event` to every sink without waiting
    pub fn emit(&self, event: PipelineEvent) {
        for sink in &self.sinks {
            let sink = sink.clone();
            let event = event.clone();
            tokio::spawn(async move {
                let stage = event.stage.clone();
                if let Err(e) = sink.publish(event).await {
                    debug!(stage = %stage, error = %e, "Event sink failed");
                }
            });
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Collects every event it receives
    #[derive(Default)]
    pub struct RecordingSink {
        pub events: Mutex<Vec<PipelineEvent>>,
    }

    impl RecordingSink {
        pub fn stages(&self) -> Vec<String> {
            self.events.lock().unwrap().iter().map(|e| e.stage.clone()).collect()
        }
    }

    #[async_trait]
    impl EventSink for RecordingSink {
        async fn publish(&self, event: PipelineEvent) -> Result<()> {
            self.events.lock().unwrap().push(event);
            Ok(())
        }
    }
}
