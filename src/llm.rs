//! LLM client abstraction and OpenAI API implementation.
//!
//! This module provides a generic [`LlmClient`] trait for interacting with
//! language models, along with concrete implementations:
//!
//! - [`OpenAiClient`]: production client for the OpenAI chat-completions API
//! - [`MockLlmClient`]: test double for unit tests
//!
//! Used by the SQL generator and, through [`LlmError`], by the embeddings client.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::Settings;

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur while talking to a hosted model API.
#[derive(Debug, Error)]
pub enum LlmError {
    /// The OPENAI_API_KEY environment variable is not set.
    #[error("OPENAI_API_KEY environment variable not set")]
    MissingApiKey,

    /// HTTP or network error occurred.
    #[error("HTTP error: {0}")]
    Http(String),

    /// Failed to parse the API response.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Model returned no content.
    #[error("Model returned empty response")]
    EmptyResponse,
}

// ============================================================================
// Completion Type
// ============================================================================

/// The result of a successful LLM completion request.
#[derive(Debug, Clone)]
pub struct Completion {
    /// The generated text from the model.
    pub text: String,
}

// ============================================================================
// LlmClient Trait
// ============================================================================

/// Generic interface for LLM clients.
///
/// Supports simple system+user prompt completion with text response.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Generate a completion given a system prompt and user message.
    ///
    /// # Arguments
    ///
    /// * `system` - System-level instructions for the model
    /// * `user` - User message or prompt
    ///
    /// # Returns
    ///
    /// A [`Completion`] containing the model's response text.
    async fn complete(&self, system: &str, user: &str) -> Result<Completion, LlmError>;

    /// Name of the model behind this client, reported by `/health`.
    fn model(&self) -> &str;
}

// ============================================================================
// OpenAI API Implementation
// ============================================================================

/// Default chat model.
pub const DEFAULT_CHAT_MODEL: &str = "gpt-4";

/// Default API root.
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com";

/// Client for the OpenAI chat-completions API.
///
/// Requests are sent with `temperature: 0` so that repeated questions over
/// the same context produce the same SQL.
pub struct OpenAiClient {
    api_key: String,
    model: String,
    base_url: String,
    client: reqwest::Client,
}

/// Request body for the chat-completions endpoint.
#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    temperature: f32,
    messages: Vec<Message>,
}

/// A message in the conversation.
#[derive(Debug, Serialize, Deserialize)]
struct Message {
    role: String,
    content: String,
}

/// Response from the chat-completions endpoint.
#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

impl OpenAiClient {
    /// Create a client from loaded [`Settings`].
    ///
    /// # Errors
    ///
    /// Returns [`LlmError::MissingApiKey`] if no API key is configured.
    pub fn from_settings(settings: &Settings) -> Result<Self, LlmError> {
        if settings.openai_api_key.is_empty() {
            return Err(LlmError::MissingApiKey);
        }
        Ok(Self::new(settings.openai_api_key.clone())
            .with_model(&settings.openai_model)
            .with_base_url(&settings.openai_base_url))
    }

    /// Create a new client with an explicit API key.
    ///
    /// Uses default model `gpt-4` against the public OpenAI endpoint.
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            model: DEFAULT_CHAT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(&self, system: &str, user: &str) -> Result<Completion, LlmError> {
        let request_body = ChatRequest {
            model: self.model.clone(),
            temperature: 0.0,
            messages: vec![
                Message {
                    role: "system".to_string(),
                    content: system.to_string(),
                },
                Message {
                    role: "user".to_string(),
                    content: user.to_string(),
                },
            ],
        };

        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request_body)
            .send()
            .await
            .map_err(|e| LlmError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Http(format!("{status}: {body}")));
        }

        let api_response: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Parse(e.to_string()))?;

        let text = api_response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|text| !text.trim().is_empty())
            .ok_or(LlmError::EmptyResponse)?;

        Ok(Completion { text })
    }

    fn model(&self) -> &str {
        &self.model
    }
}

// ============================================================================
// Mock Implementation (Test Only)
// ============================================================================

/// Mock LLM client for testing. Returns pre-programmed responses in FIFO order.
///
/// A queued `Err` string is returned as [`LlmError::Http`].
#[cfg(test)]
pub struct MockLlmClient {
    pub responses: std::sync::Mutex<std::collections::VecDeque<Result<String, String>>>,
}

#[cfg(test)]
impl MockLlmClient {
    /// Create a new mock client with a sequence of successful responses.
    ///
    /// # Panics
    ///
    /// Panics if [`complete`](LlmClient::complete) is called more times
    /// than there are responses.
    pub fn new(responses: Vec<String>) -> Self {
        Self::with_results(responses.into_iter().map(Ok).collect())
    }

    /// Create a mock that can also fail.
    pub fn with_results(results: Vec<Result<String, String>>) -> Self {
        Self {
            responses: std::sync::Mutex::new(results.into()),
        }
    }
}

#[cfg(test)]
#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, _system: &str, _user: &str) -> Result<Completion, LlmError> {
        let next = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .expect("MockLlmClient: no more responses available");

        next.map(|text| Completion { text }).map_err(LlmError::Http)
    }

    fn model(&self) -> &str {
        "mock"
    }
}

// ============================================================================
// Tests
// ============================================================================
