//! Text embeddings for table-metadata retrieval.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::Settings;
use crate::llm::{DEFAULT_BASE_URL, LlmError};

/// Default embeddings model.
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";

/// Turns text into a dense vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError>;
}

/// Client for the OpenAI embeddings endpoint.
pub struct OpenAiEmbedder {
    api_key: String,
    model: String,
    base_url: String,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

impl OpenAiEmbedder {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            model: DEFAULT_EMBEDDING_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Create an embedder from loaded [`Settings`].
    ///
    /// # Errors
    ///
    /// Returns [`LlmError::MissingApiKey`] if no API key is configured.
    pub fn from_settings(settings: &Settings) -> Result<Self, LlmError> {
        if settings.openai_api_key.is_empty() {
            return Err(LlmError::MissingApiKey);
        }
        Ok(Self::new(settings.openai_api_key.clone())
            .with_model(&settings.embedding_model)
            .with_base_url(&settings.openai_base_url))
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
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        let response = self
            .client
            .post(format!("{}/v1/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&EmbeddingRequest {
                model: &self.model,
                input: text,
            })
            .send()
            .await
            .map_err(|e| LlmError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Http(format!("{status}: {body}")));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Parse(e.to_string()))?;

        parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .filter(|v| !v.is_empty())
            .ok_or(LlmError::EmptyResponse)
    }
}

/// Deterministic bag-of-words embedder for tests.
///
/// Each lower-cased alphanumeric token is hashed into one of `dims` buckets,
/// so texts sharing words end up close under cosine similarity.
#[cfg(test)]
pub struct HashingEmbedder {
    pub dims: usize,
}

#[cfg(test)]
#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        use std::hash::{DefaultHasher, Hash, Hasher};

        let mut vector = vec![0.0f32; self.dims];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let mut hasher = DefaultHasher::new();
            token.to_lowercase().hash(&mut hasher);
            let bucket = (hasher.finish() % self.dims as u64) as usize;
            vector[bucket] += 1.0;
        }
        Ok(vector)
    }
}

/// Embedder that always fails, for degraded-path tests.
#[cfg(test)]
pub struct FailingEmbedder;

#[cfg(test)]
#[async_trait]
impl Embedder for FailingEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, LlmError> {
        Err(LlmError::Http("connection refused".into()))
    }
}
