//! Error types for the HTTP layer.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

use crate::llm::LlmError;
use crate::store::StoreError;

/// Errors surfaced by request handlers.
///
/// Rendered as `{"detail": "..."}` bodies.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Invalid parameters provided by the caller.
    #[error("{0}")]
    BadRequest(String),

    /// The model API failed.
    #[error("Error interno del servidor: {0}")]
    Llm(#[from] LlmError),

    /// The vector store or embeddings provider failed.
    #[error("Error interno del servidor: {0}")]
    Store(#[from] StoreError),
}

impl ServiceError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Llm(_) | Self::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        (self.status(), Json(json!({ "detail": self.to_string() }))).into_response()
    }
}
