//! Service configuration loaded from the environment.
//!
//! An optional `.env` file in the working directory is read first, then
//! process variables are consulted. [`Settings::from_lookup`] takes any key
//! lookup so that tests never have to mutate the process environment.

use std::path::PathBuf;

use thiserror::Error;
use tracing::warn;

use crate::embeddings::DEFAULT_EMBEDDING_MODEL;
use crate::generator::ResponseFormat;
use crate::llm::{DEFAULT_BASE_URL, DEFAULT_CHAT_MODEL};

/// Errors produced while reading configuration values.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid PORT: {0}")]
    InvalidPort(String),
    #[error("Invalid RAG_TOP_K: {0} (must be a positive integer)")]
    InvalidTopK(String),
    #[error("Invalid RESPONSE_FORMAT: {0} (expected 'json' or 'markdown')")]
    InvalidResponseFormat(String),
}

/// Runtime settings for the server and CLI.
#[derive(Debug, Clone)]
pub struct Settings {
    pub openai_api_key: String,
    pub openai_model: String,
    pub openai_base_url: String,
    pub embedding_model: String,
    /// JSON file backing the vector store.
    pub store_path: PathBuf,
    pub host: String,
    pub port: u16,
    /// `None` allows any origin.
    pub allowed_origins: Option<Vec<String>>,
    /// Number of chunks retrieved as context per question.
    pub top_k: usize,
    pub response_format: ResponseFormat,
}

impl Settings {
    /// Load settings from `.env` (if present) and the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str, default: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        let port_raw = get("PORT", "8000");
        let port = port_raw
            .trim()
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort(port_raw.clone()))?;

        let top_k_raw = get("RAG_TOP_K", "3");
        let top_k = match top_k_raw.trim().parse::<usize>() {
            Ok(n) if n > 0 => n,
            _ => return Err(ConfigError::InvalidTopK(top_k_raw)),
        };

        let format_raw = get("RESPONSE_FORMAT", "json");
        let response_format = format_raw
            .parse::<ResponseFormat>()
            .map_err(|_| ConfigError::InvalidResponseFormat(format_raw.clone()))?;

        let store_path = lookup("VECTOR_STORE_PATH")
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(default_store_path);

        Ok(Self {
            openai_api_key: get("OPENAI_API_KEY", ""),
            openai_model: get("OPENAI_MODEL", DEFAULT_CHAT_MODEL),
            openai_base_url: get("OPENAI_BASE_URL", DEFAULT_BASE_URL),
            embedding_model: get("EMBEDDING_MODEL", DEFAULT_EMBEDDING_MODEL),
            store_path,
            host: get("HOST", "0.0.0.0"),
            port,
            allowed_origins: parse_origins(&get("ALLOWED_ORIGINS", "*")),
            top_k,
            response_format,
        })
    }

    /// Report missing required values. Returns `false` if any are missing.
    pub fn validate(&self) -> bool {
        if self.openai_api_key.is_empty() {
            warn!("OPENAI_API_KEY is not set; question answering will not work");
            return false;
        }
        true
    }
}

/// Default store location under the platform's local data directory.
fn default_store_path() -> PathBuf {
    let data_dir = dirs::data_local_dir().unwrap_or_else(|| PathBuf::from("."));
    data_dir.join("sql-query-buddy").join("store.json")
}

fn parse_origins(raw: &str) -> Option<Vec<String>> {
    if raw.trim() == "*" {
        return None;
    }
    let origins: Vec<String> = raw
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    (!origins.is_empty()).then_some(origins)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings_from(pairs: &[(&str, &str)]) -> Result<Settings, ConfigError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let settings = settings_from(&[]).unwrap();
        assert_eq!(settings.openai_model, "gpt-4");
        assert_eq!(settings.openai_base_url, "https://api.openai.com");
        assert_eq!(settings.host, "0.0.0.0");
        assert_eq!(settings.port, 8000);
        assert_eq!(settings.top_k, 3);
        assert_eq!(settings.response_format, ResponseFormat::Json);
        assert!(settings.allowed_origins.is_none());
        assert!(settings.store_path.ends_with("sql-query-buddy/store.json"));
        assert!(!settings.validate());
    }

    #[test]
    fn test_overrides() {
        let settings = settings_from(&[
            ("OPENAI_API_KEY", "sk-test"),
            ("OPENAI_MODEL", "gpt-4o-mini"),
            ("PORT", "9000"),
            ("RAG_TOP_K", "5"),
            ("RESPONSE_FORMAT", "Markdown"),
            ("VECTOR_STORE_PATH", "/tmp/buddy.json"),
            ("ALLOWED_ORIGINS", "http://localhost:5173, https://buddy.example.com"),
        ])
        .unwrap();
        assert_eq!(settings.openai_model, "gpt-4o-mini");
        assert_eq!(settings.port, 9000);
        assert_eq!(settings.top_k, 5);
        assert_eq!(settings.response_format, ResponseFormat::Markdown);
        assert_eq!(settings.store_path, PathBuf::from("/tmp/buddy.json"));
        assert_eq!(
            settings.allowed_origins,
            Some(vec![
                "http://localhost:5173".to_string(),
                "https://buddy.example.com".to_string()
            ])
        );
        assert!(settings.validate());
    }

    #[test]
    fn test_invalid_port() {
        assert!(matches!(
            settings_from(&[("PORT", "eighty")]),
            Err(ConfigError::InvalidPort(_))
        ));
    }

    #[test]
    fn test_invalid_top_k() {
        assert!(matches!(
            settings_from(&[("RAG_TOP_K", "0")]),
            Err(ConfigError::InvalidTopK(_))
        ));
    }

    #[test]
    fn test_invalid_response_format() {
        assert!(matches!(
            settings_from(&[("RESPONSE_FORMAT", "yaml")]),
            Err(ConfigError::InvalidResponseFormat(_))
        ));
    }

    #[test]
    fn test_blank_values_use_defaults() {
        let settings = settings_from(&[("OPENAI_MODEL", "  "), ("PORT", "")]).unwrap();
        assert_eq!(settings.openai_model, "gpt-4");
        assert_eq!(settings.port, 8000);
    }
}
