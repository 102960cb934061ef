use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderValue, Method};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::error::ServiceError;
use crate::generator::{SqlAnswer, SqlGenerator};
use crate::rag::RagService;

// ---------------------------------------------------------------------------
// Request / response bodies
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct AskRequest {
    pub question: String,
}

#[derive(Debug, Deserialize)]
pub struct MetadataRequest {
    pub table_name: String,
    pub schema_info: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MetadataResponse {
    pub message: String,
    pub table_name: String,
    pub status: String,
    pub chunks: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TablesResponse {
    pub tables: Vec<String>,
    pub total_count: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub services: ServiceStatus,
    pub config: HealthConfig,
    pub tables: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub rag_service: String,
    pub sql_generator: String,
    pub llm: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthConfig {
    pub model: String,
    pub store_path: Option<String>,
}

// ---------------------------------------------------------------------------
// HTTP server
// ---------------------------------------------------------------------------

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub generator: Arc<SqlGenerator>,
    pub rag: Arc<RagService>,
}

/// Build the service router.
///
/// `allowed_origins = None` allows any origin.
pub fn router(state: AppState, allowed_origins: Option<&[String]>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/ask", post(ask))
        .route("/metadata", post(add_metadata))
        .route("/tables", get(tables))
        .layer(cors_layer(allowed_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(allowed_origins: Option<&[String]>) -> CorsLayer {
    let origin = match allowed_origins {
        None => AllowOrigin::from(Any),
        Some(origins) => {
            let values: Vec<HeaderValue> = origins
                .iter()
                .filter_map(|o| match HeaderValue::from_str(o) {
                    Ok(v) => Some(v),
                    Err(_) => {
                        warn!("Ignoring invalid CORS origin '{o}'");
                        None
                    }
                })
                .collect();
            AllowOrigin::list(values)
        }
    };

    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
}

async fn root() -> Json<Value> {
    Json(json!({
        "message": "SQL Query Buddy (RAG) API",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running",
        "endpoints": {
            "ask": "POST /ask - Generar consulta SQL",
            "metadata": "POST /metadata - Añadir metadatos de tabla",
            "tables": "GET /tables - Listar tablas registradas",
            "health": "GET /health - Estado de la aplicación"
        }
    }))
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let llm = match state.rag.probe_embeddings().await {
        Ok(()) => "operational",
        Err(e) => {
            warn!("Health probe failed: {e}");
            "error"
        }
    };

    Json(HealthResponse {
        status: "healthy".to_string(),
        services: ServiceStatus {
            rag_service: "operational".to_string(),
            sql_generator: "operational".to_string(),
            llm: llm.to_string(),
        },
        config: HealthConfig {
            model: state.generator.model().to_string(),
            store_path: state.rag.store_path().map(|p| p.display().to_string()),
        },
        tables: state.rag.table_names().await.len(),
    })
}

async fn ask(
    State(state): State<AppState>,
    Json(req): Json<AskRequest>,
) -> Result<Json<SqlAnswer>, ServiceError> {
    let question = req.question.trim();
    if question.is_empty() {
        return Err(ServiceError::BadRequest(
            "La pregunta no puede estar vacía".to_string(),
        ));
    }

    info!(question, "question received");
    let answer = state.generator.generate(question).await.map_err(|e| {
        warn!("SQL generation failed: {e}");
        ServiceError::from(e)
    })?;

    Ok(Json(answer))
}

async fn add_metadata(
    State(state): State<AppState>,
    Json(req): Json<MetadataRequest>,
) -> Result<Json<MetadataResponse>, ServiceError> {
    let table_name = req.table_name.trim();
    if table_name.is_empty() || req.schema_info.trim().is_empty() {
        return Err(ServiceError::BadRequest(
            "El nombre de la tabla y la información del esquema son obligatorios".to_string(),
        ));
    }

    let chunks = state
        .rag
        .add_table_metadata(table_name, req.schema_info.trim(), req.description.trim())
        .await?;

    Ok(Json(MetadataResponse {
        message: format!("Metadatos de la tabla '{table_name}' añadidos exitosamente"),
        table_name: table_name.to_string(),
        status: "success".to_string(),
        chunks,
    }))
}

async fn tables(State(state): State<AppState>) -> Json<TablesResponse> {
    let tables = state.rag.table_names().await;
    Json(TablesResponse {
        total_count: tables.len(),
        tables,
    })
}
