//! Remote retrieval backend over HTTP
//!
//! POSTs `{query, top_k}` to a search endpoint. Accepts either
//! `{"documents": [...]}` or a bare JSON array of documents.

use super::{RetrievedDocument, Retriever};
use ragfuse_common::config::BackendConfig;
use ragfuse_common::errors::{AppError, Result};
use serde::{Deserialize, Serialize};

/// HTTP retriever for a remote vector store, keyword index, or web search proxy
pub struct HttpRetriever {
    name: String,
    endpoint: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct SearchPayload<'a> {
    query: &'a str,
    top_k: usize,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SearchReply {
    Wrapped { documents: Vec<RetrievedDocument> },
    Bare(Vec<RetrievedDocument>),
}

impl HttpRetriever {
    /// Create a retriever from backend configuration
    pub fn new(config: &BackendConfig) -> Result<Self> {
        if config.endpoint.is_empty() {
            return Err(AppError::config(format!(
                "backend '{}' has no endpoint",
                config.name
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()?;

        Ok(Self {
            name: config.name.clone(),
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
            client,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[async_trait::async_trait]
impl Retriever for HttpRetriever {
    async fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<RetrievedDocument>> {
        let mut request = self.client
            .post(&self.endpoint)
            .json(&SearchPayload { query, top_k });

        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {}", key));
        }

        let response = request
            .send()
            .await
            .map_err(|e| AppError::backend(&self.name, format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::backend(&self.name, format!("API error {}: {}", status, body)));
        }

        let reply: SearchReply = response.json().await.map_err(|e| {
            AppError::backend(&self.name, format!("Failed to parse response: {}", e))
        })?;

        let mut documents = match reply {
            SearchReply::Wrapped { documents } => documents,
            SearchReply::Bare(documents) => documents,
        };
        documents.truncate(top_k);

        tracing::debug!(backend = %self.name, count = documents.len(), "Remote retrieval complete");
        Ok(documents)
    }
}
