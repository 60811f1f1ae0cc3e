//! Language-model client abstraction
//!
//! Provides a single-shot, non-streaming chat contract used by query
//! rewriting, query expansion, and LLM reranking:
//! - OpenAI-compatible chat completions (with retry)
//! - Scripted mock model for tests and offline runs

use crate::config::LlmConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use backoff::{future::retry, Error as BackoffError, ExponentialBackoffBuilder};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// One chat message
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    /// Role: system, user, or assistant
    pub role: String,

    /// Message text
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system".to_string(), content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".to_string(), content: content.into() }
    }
}

/// Trait for chat-style text generation
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Generate a completion for the given conversation
    async fn generate(&self, messages: &[ChatMessage]) -> Result<String>;

    /// Get the model name
    fn model_name(&self) -> &str;
}

/// OpenAI-compatible chat-completions client
pub struct OpenAiChatModel {
    config: LlmConfig,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Deserialize)]
struct ChatMessageResponse {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

impl OpenAiChatModel {
    /// Create a new chat client
    pub fn new(config: LlmConfig) -> Result<Self> {
        if !config.is_enabled() {
            return Err(AppError::config("llm.api_key is required for the chat model"));
        }

        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()?;

        Ok(Self { config, client })
    }

    /// Single request; classifies failures as transient or permanent
    async fn attempt(&self, messages: &[ChatMessage]) -> std::result::Result<String, BackoffError<AppError>> {
        let request = ChatRequest {
            model: &self.config.model,
            messages,
            temperature: self.config.temperature,
        };

        let response = self.client
            .post(&self.config.endpoint)
            .header("Authorization", format!("Bearer {}", self.config.api_key.as_deref().unwrap_or_default()))
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    BackoffError::transient(AppError::ModelTimeout {
                        timeout_ms: self.config.timeout().as_millis() as u64,
                    })
                } else {
                    BackoffError::transient(AppError::model(format!("LLM API request failed: {}", e)))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let err = AppError::model(format!("LLM API error {}: {}", status, body));
            if status.is_server_error() || status.as_u16() == 429 {
                return Err(BackoffError::transient(err));
            }
            return Err(BackoffError::permanent(err));
        }

        let chat_response: ChatResponse = response.json().await
            .map_err(|e| BackoffError::permanent(AppError::model(format!("Failed to parse LLM response: {}", e))))?;

        chat_response.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| BackoffError::permanent(AppError::model("Empty response from LLM")))
    }
}

#[async_trait]
impl LanguageModel for OpenAiChatModel {
    async fn generate(&self, messages: &[ChatMessage]) -> Result<String> {
        let max_retries = self.config.max_retries;
        let attempts = AtomicU32::new(0);
        let attempts = &attempts;

        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(200))
            .with_max_elapsed_time(Some(self.config.timeout() * (max_retries + 1)))
            .build();

        retry(policy, || async move {
            let attempt = attempts.fetch_add(1, Ordering::Relaxed) + 1;
            match self.attempt(messages).await {
                Ok(content) => Ok(content),
                Err(BackoffError::Transient { err, .. }) if attempt <= max_retries => {
                    tracing::warn!(
                        attempt,
                        max_retries,
                        error = %err,
                        "LLM request failed, retrying"
                    );
                    Err(BackoffError::transient(err))
                }
                Err(BackoffError::Transient { err, .. }) => Err(BackoffError::permanent(err)),
                Err(permanent) => Err(permanent),
            }
        })
        .await
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

/// Mock language model for testing
///
/// Replies are consumed from a script in order; once the script is empty the
/// fallback reply (or error) is returned for every further call.
pub struct MockLanguageModel {
    script: Mutex<VecDeque<std::result::Result<String, String>>>,
    fallback: std::result::Result<String, String>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl MockLanguageModel {
    /// Always reply with `text`
    pub fn replying(text: impl Into<String>) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Ok(text.into()),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Always fail with `message`
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Err(message.into()),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Reply from `script` in order, then fail
    pub fn scripted(script: Vec<std::result::Result<String, String>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback: Err("script exhausted".to_string()),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Sleep before every reply
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of generate calls so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LanguageModel for MockLanguageModel {
    async fn generate(&self, _messages: &[ChatMessage]) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let next = self.script
            .lock()
            .map_err(|_| AppError::Internal { message: "mock script poisoned".to_string() })?
            .pop_front();

        next.unwrap_or_else(|| self.fallback.clone())
            .map_err(AppError::model)
    }

    fn model_name(&self) -> &str {
        "mock-chat"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[tokio::test]
    async fn test_mock_replying() {
        let model = MockLanguageModel::replying("hello");
        let reply = assert_ok!(model.generate(&[ChatMessage::user("hi")]).await);
        assert_eq!(reply, "hello");
        assert_eq!(model.calls(), 1);
    }

    #[tokio::test]
    async fn test_mock_script_then_fallback() {
        let model = MockLanguageModel::scripted(vec![Ok("one".into()), Err("boom".into())]);
        assert_eq!(assert_ok!(model.generate(&[]).await), "one");
        let err = assert_err!(model.generate(&[]).await);
        assert!(err.to_string().contains("boom"));
        assert_err!(model.generate(&[]).await);
        assert_eq!(model.calls(), 3);
    }

    #[test]
    fn test_chat_model_requires_key() {
        let result = OpenAiChatModel::new(LlmConfig::default());
        assert!(matches!(result, Err(AppError::Configuration { .. })));
    }

    #[test]
    fn test_message_constructors() {
        assert_eq!(ChatMessage::system("s").role, "system");
        assert_eq!(ChatMessage::user("u").role, "user");
    }
}
