//! Error types for RagFuse
//!
//! Provides a comprehensive error handling system with:
//! - Distinct error types for setup, backend, and model failures
//! - Recoverability classification (degrade locally vs. surface)
//! - Error codes for client handling

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation errors (1xxx)
    ValidationError,

    // Backend errors (7xxx)
    BackendError,
    BackendTimeout,

    // External service errors (8xxx)
    UpstreamError,
    ModelCallError,
    ModelTimeout,

    // Internal errors (9xxx)
    InternalError,
    ConfigurationError,
    SerializationError,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn as_code(&self) -> u16 {
        match self {
            // Validation (1xxx)
            ErrorCode::ValidationError => 1001,

            // Backends (7xxx)
            ErrorCode::BackendError => 7001,
            ErrorCode::BackendTimeout => 7002,

            // External (8xxx)
            ErrorCode::UpstreamError => 8001,
            ErrorCode::ModelCallError => 8002,
            ErrorCode::ModelTimeout => 8003,

            // Internal (9xxx)
            ErrorCode::InternalError => 9001,
            ErrorCode::ConfigurationError => 9002,
            ErrorCode::SerializationError => 9003,
        }
    }
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Validation errors
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        field: Option<String>
    },

    // Retrieval backend errors
    #[error("Backend '{backend}' failed: {message}")]
    Backend { backend: String, message: String },

    #[error("Backend '{backend}' timed out after {timeout_ms}ms")]
    BackendTimeout { backend: String, timeout_ms: u64 },

    // Language-model errors
    #[error("Model call failed: {message}")]
    ModelCall { message: String },

    #[error("Model call timed out after {timeout_ms}ms")]
    ModelTimeout { timeout_ms: u64 },

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    // Internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// Shorthand for a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        AppError::Configuration { message: message.into() }
    }

    /// Shorthand for a failed retrieval unit
    pub fn backend(backend: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::Backend {
            backend: backend.into(),
            message: message.into(),
        }
    }

    /// Shorthand for a failed language-model call
    pub fn model(message: impl Into<String>) -> Self {
        AppError::ModelCall { message: message.into() }
    }

    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Validation { .. } => ErrorCode::ValidationError,
            AppError::Backend { .. } => ErrorCode::BackendError,
            AppError::BackendTimeout { .. } => ErrorCode::BackendTimeout,
            AppError::ModelCall { .. } => ErrorCode::ModelCallError,
            AppError::ModelTimeout { .. } => ErrorCode::ModelTimeout,
            AppError::HttpClient(_) => ErrorCode::UpstreamError,
            AppError::Internal { .. } => ErrorCode::InternalError,
            AppError::Configuration { .. } => ErrorCode::ConfigurationError,
            AppError::Serialization(_) => ErrorCode::SerializationError,
            AppError::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Whether the engine recovers from this error locally.
    ///
    /// Backend and model failures shrink or de-optimize the result;
    /// configuration and validation failures are surfaced at setup time.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            AppError::Backend { .. }
                | AppError::BackendTimeout { .. }
                | AppError::ModelCall { .. }
                | AppError::ModelTimeout { .. }
                | AppError::HttpClient(_)
        )
    }

    /// Check if this error is a setup-time error
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            AppError::Configuration { .. } | AppError::Validation { .. }
        )
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Configuration {
            message: err.to_string()
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        let field = err.field_errors().keys().next().map(|f| f.to_string());
        AppError::Validation {
            message: err.to_string(),
            field,
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal {
            message: err.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_mapping() {
        let err = AppError::backend("web", "connection refused");
        assert_eq!(err.code(), ErrorCode::BackendError);
        assert_eq!(err.code().as_code(), 7001);
        assert_eq!(err.to_string(), "Backend 'web' failed: connection refused");
    }

    #[test]
    fn test_recoverable_errors() {
        assert!(AppError::model("timeout").is_recoverable());
        assert!(AppError::BackendTimeout { backend: "kb".into(), timeout_ms: 50 }.is_recoverable());
        assert!(!AppError::config("no backends").is_recoverable());
    }

    #[test]
    fn test_config_error() {
        let err = AppError::config("router requires at least one backend");
        assert!(err.is_config_error());
        assert_eq!(err.code(), ErrorCode::ConfigurationError);
    }

    #[test]
    fn test_serialization_conversion() {
        let err: AppError = serde_json::from_str::<serde_json::Value>("{oops").unwrap_err().into();
        assert_eq!(err.code(), ErrorCode::SerializationError);
        assert!(!err.is_recoverable());
        assert_eq!(AppError::ModelTimeout { timeout_ms: 20 }.code().as_code(), 8003);
    }
}
