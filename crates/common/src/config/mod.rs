//! Configuration management for RagFuse services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config.toml, config.yaml)
//! - Default values
//!
//! Per-request engine settings are plain structs owned by the search crate;
//! [`load_section`] reads them from the same sources without coupling the
//! engine to a file format.

use config::{Config, ConfigError, Environment, File};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Language-model configuration (rewrite, expansion, LLM rerank)
    #[serde(default)]
    pub llm: LlmConfig,

    /// Remote retrieval backends
    #[serde(default)]
    pub backends: Vec<BackendConfig>,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LlmConfig {
    /// Chat-completions endpoint
    #[serde(default = "default_llm_endpoint")]
    pub endpoint: String,

    /// API key (model calls are disabled when absent)
    pub api_key: Option<String>,

    /// Model to use
    #[serde(default = "default_llm_model")]
    pub model: String,

    /// Request timeout in seconds
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,

    /// Maximum retries on transient failures
    #[serde(default = "default_llm_retries")]
    pub max_retries: u32,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackendConfig {
    /// Unique backend name (routing key and fusion source key)
    pub name: String,

    /// Search endpoint accepting `{query, top_k}`
    pub endpoint: String,

    /// Optional bearer token
    pub api_key: Option<String>,

    /// Request timeout in seconds
    #[serde(default = "default_backend_timeout")]
    pub timeout_secs: u64,

    /// Routing keywords for the keyword selector
    #[serde(default)]
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Service name for tracing
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

// Default value functions
fn default_llm_endpoint() -> String { "https://api.openai.com/v1/chat/completions".to_string() }
fn default_llm_model() -> String { "gpt-4o-mini".to_string() }
fn default_llm_timeout() -> u64 { 30 }
fn default_llm_retries() -> u32 { 3 }
fn default_temperature() -> f32 { 0.3 }
fn default_backend_timeout() -> u64 { 10 }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_metrics_port() -> u16 { 0 }
fn default_service_name() -> String { "ragfuse".to_string() }

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: default_llm_endpoint(),
            api_key: None,
            model: default_llm_model(),
            timeout_secs: default_llm_timeout(),
            max_retries: default_llm_retries(),
            temperature: default_temperature(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            metrics_port: default_metrics_port(),
            service_name: default_service_name(),
        }
    }
}

impl LlmConfig {
    /// Get request timeout as Duration
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Whether a real model endpoint can be called
    pub fn is_enabled(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.is_empty())
    }
}

impl BackendConfig {
    /// Get request timeout as Duration
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Build the layered source stack shared by every loader
fn builder() -> Result<Config, ConfigError> {
    let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

    Config::builder()
        // Load base config file
        .add_source(File::with_name("config/default").required(false))

        // Load environment-specific config
        .add_source(File::with_name(&format!("config/{}", env)).required(false))

        // Load local overrides
        .add_source(File::with_name("config/local").required(false))

        // Load from environment variables with APP__ prefix
        // e.g., APP__LLM__MODEL=gpt-4o
        .add_source(
            Environment::with_prefix("APP")
                .separator("__")
                .try_parsing(true)
        )

        .build()
}

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        builder()?.try_deserialize()
    }

    /// Load from a specific TOML file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )
            .build()?;

        config.try_deserialize()
    }

    /// Find a backend by name
    pub fn backend(&self, name: &str) -> Option<&BackendConfig> {
        self.backends.iter().find(|b| b.name == name)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            llm: LlmConfig::default(),
            backends: Vec::new(),
            observability: ObservabilityConfig::default(),
        }
    }
}

/// Load a single top-level section, falling back to `T::default()` when absent
pub fn load_section<T>(key: &str) -> Result<T, ConfigError>
where
    T: DeserializeOwned + Default,
{
    let config = builder()?;
    match config.get::<T>(key) {
        Ok(value) => Ok(value),
        Err(ConfigError::NotFound(_)) => Ok(T::default()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.llm.model, "gpt-4o-mini");
        assert!(config.backends.is_empty());
        assert_eq!(config.observability.metrics_port, 0);
    }

    #[test]
    fn test_llm_disabled_without_key() {
        let mut llm = LlmConfig::default();
        assert!(!llm.is_enabled());
        llm.api_key = Some(String::new());
        assert!(!llm.is_enabled());
        llm.api_key = Some("sk-test".into());
        assert!(llm.is_enabled());
    }

    #[test]
    fn test_backend_lookup() {
        let mut config = AppConfig::default();
        config.backends.push(BackendConfig {
            name: "kb".into(),
            endpoint: "http://localhost:9000/search".into(),
            api_key: None,
            timeout_secs: default_backend_timeout(),
            keywords: vec!["policy".into()],
        });
        assert!(config.backend("kb").is_some());
        assert!(config.backend("web").is_none());
        assert_eq!(config.backend("kb").map(|b| b.timeout()), Some(Duration::from_secs(10)));
    }
}
