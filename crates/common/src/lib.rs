//! RagFuse Common Library
//!
//! Shared code for the RagFuse retrieval engine including:
//! - Error types and handling
//! - Configuration management
//! - Language-model client abstraction
//! - Metrics and observability

pub mod config;
pub mod errors;
pub mod llm;
pub mod metrics;

// Re-export commonly used types
pub use config::AppConfig;
pub use errors::{AppError, Result};
pub use llm::{ChatMessage, LanguageModel};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default number of documents returned to the caller
pub const DEFAULT_TOP_K: usize = 10;
