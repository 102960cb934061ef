//! SQL Query Buddy: retrieval-augmented text-to-SQL service.
//!
//! Shared library for the HTTP server and the CLI.

pub mod config;
pub mod embeddings;
pub mod error;
pub mod extract;
pub mod generator;
pub mod llm;
pub mod rag;
pub mod server;
pub mod splitter;
pub mod store;
pub mod validate;

use std::sync::Arc;

use crate::config::Settings;
use crate::embeddings::OpenAiEmbedder;
use crate::generator::SqlGenerator;
use crate::llm::{LlmClient, OpenAiClient};
use crate::rag::RagService;

/// Build the retrieval service and SQL generator from settings.
///
/// Both the LLM and the embeddings client need an API key, so this fails
/// early when none is configured.
pub fn build_services(
    settings: &Settings,
) -> Result<(Arc<RagService>, Arc<SqlGenerator>), Box<dyn std::error::Error>> {
    let llm: Arc<dyn LlmClient> = Arc::new(OpenAiClient::from_settings(settings).map_err(|e| {
        format!("{e}. Set OPENAI_API_KEY to enable embeddings and SQL generation.")
    })?);
    let embedder = Arc::new(OpenAiEmbedder::from_settings(settings)?);

    let rag = Arc::new(RagService::open(
        embedder,
        Some(settings.store_path.clone()),
        settings.top_k,
    )?);
    let generator = Arc::new(SqlGenerator::new(
        rag.clone(),
        llm,
        settings.response_format,
    ));

    Ok((rag, generator))
}
