//! Table-metadata retrieval.
//!
//! [`RagService`] ingests table descriptions into the [`VectorStore`] and
//! renders the closest chunks for a question as prompt context. It is the
//! production [`ContextRetriever`].

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::embeddings::Embedder;
use crate::llm::LlmError;
use crate::splitter::{DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE, split_text};
use crate::store::{SearchHit, StoreError, VectorStore};

/// Context returned when retrieval finds nothing.
pub const NO_TABLES_CONTEXT: &str = "No se encontraron tablas relevantes para la consulta.";

/// Context returned when retrieval itself fails.
pub const CONTEXT_ERROR: &str = "Error obteniendo contexto de la base de datos.";

const HEALTH_PROBE: &str = "health check";

/// Supplies schema context for a question.
#[async_trait]
pub trait ContextRetriever: Send + Sync {
    /// Human-readable description of the tables relevant to `question`.
    ///
    /// Never fails; degrades to a fixed sentence instead.
    async fn get_context(&self, question: &str) -> String;
}

/// Vector-store backed retrieval over table metadata.
pub struct RagService {
    embedder: Arc<dyn Embedder>,
    store: RwLock<VectorStore>,
    store_path: Option<PathBuf>,
    top_k: usize,
}

impl RagService {
    /// Open the service, loading `store_path` if it exists.
    ///
    /// With `store_path = None` the store lives in memory only.
    pub fn open(
        embedder: Arc<dyn Embedder>,
        store_path: Option<PathBuf>,
        top_k: usize,
    ) -> Result<Self, StoreError> {
        let store = match store_path.as_deref() {
            Some(path) => VectorStore::load(path)?,
            None => VectorStore::new(),
        };
        info!(chunks = store.len(), path = ?store_path, "vector store opened");

        Ok(Self {
            embedder,
            store: RwLock::new(store),
            store_path,
            top_k,
        })
    }

    /// Add or replace the metadata document for a table.
    ///
    /// Returns the number of chunks written.
    pub async fn add_table_metadata(
        &self,
        table_name: &str,
        schema_info: &str,
        description: &str,
    ) -> Result<usize, StoreError> {
        let content = format!("Tabla: {table_name}\nEsquema: {schema_info}\nDescripción: {description}");

        let mut chunks = Vec::new();
        for piece in split_text(&content, DEFAULT_CHUNK_SIZE, DEFAULT_CHUNK_OVERLAP) {
            let embedding = self.embedder.embed(&piece).await?;
            chunks.push((piece, embedding));
        }

        // The live store only changes once the new state is on disk.
        let mut store = self.store.write().await;
        let mut updated = store.clone();
        let written = updated.upsert_table(table_name, chunks)?;
        if let Some(path) = &self.store_path {
            updated.save(path)?;
        }
        *store = updated;

        info!(table = table_name, chunks = written, "table metadata stored");
        Ok(written)
    }

    /// The `top_k` chunks closest to `query`.
    pub async fn search_relevant_tables(
        &self,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<SearchHit>, StoreError> {
        let embedding = self.embedder.embed(query).await?;
        let hits = self.store.read().await.search(&embedding, top_k)?;
        debug!(query, hits = hits.len(), "similarity search");
        Ok(hits)
    }

    /// Known table names, sorted.
    pub async fn table_names(&self) -> Vec<String> {
        self.store.read().await.table_names()
    }

    /// Check that the embeddings provider answers.
    pub async fn probe_embeddings(&self) -> Result<(), LlmError> {
        self.embedder.embed(HEALTH_PROBE).await.map(|_| ())
    }

    pub fn store_path(&self) -> Option<&PathBuf> {
        self.store_path.as_ref()
    }
}

#[async_trait]
impl ContextRetriever for RagService {
    async fn get_context(&self, question: &str) -> String {
        match self.search_relevant_tables(question, self.top_k).await {
            Ok(hits) if hits.is_empty() => NO_TABLES_CONTEXT.to_string(),
            Ok(hits) => format_context(&hits),
            Err(e) => {
                warn!("Context retrieval failed: {e}");
                CONTEXT_ERROR.to_string()
            }
        }
    }
}

fn format_context(hits: &[SearchHit]) -> String {
    let mut context = String::from("Contexto de la base de datos:\n\n");
    for (i, hit) in hits.iter().enumerate() {
        context.push_str(&format!("Tabla {}:\n{}\n\n", i + 1, hit.content));
    }
    context
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::{FailingEmbedder, HashingEmbedder};

    fn service(top_k: usize) -> RagService {
        RagService::open(Arc::new(HashingEmbedder { dims: 256 }), None, top_k).unwrap()
    }

    async fn seed(rag: &RagService) {
        rag.add_table_metadata(
            "clientes",
            "id INT, nombre VARCHAR(100), email VARCHAR(100), pais VARCHAR(50)",
            "Clientes registrados con su país",
        )
        .await
        .unwrap();
        rag.add_table_metadata(
            "pedidos",
            "id INT, cliente_id INT, total DECIMAL(10,2), fecha DATE",
            "Pedidos realizados por los clientes",
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_add_and_list_tables() {
        let rag = service(3);
        seed(&rag).await;
        assert_eq!(rag.table_names().await, vec!["clientes", "pedidos"]);
    }

    #[tokio::test]
    async fn test_search_finds_matching_table() {
        let rag = service(3);
        seed(&rag).await;

        let hits = rag.search_relevant_tables("email pais nombre", 1).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].table_name, "clientes");
        assert!(hits[0].content.starts_with("Tabla: clientes"));
    }

    #[tokio::test]
    async fn test_context_lists_numbered_tables() {
        let rag = service(2);
        seed(&rag).await;

        let context = rag.get_context("total de pedidos por fecha").await;
        assert!(context.starts_with("Contexto de la base de datos:"));
        assert!(context.contains("Tabla 1:\nTabla: pedidos"));
        assert!(context.contains("Tabla 2:"));
    }

    #[tokio::test]
    async fn test_context_empty_store() {
        let rag = service(3);
        assert_eq!(rag.get_context("cualquier cosa").await, NO_TABLES_CONTEXT);
    }

    #[tokio::test]
    async fn test_context_embedding_failure() {
        let rag = RagService::open(Arc::new(FailingEmbedder), None, 3).unwrap();
        assert_eq!(rag.get_context("pregunta").await, CONTEXT_ERROR);
        assert!(rag.probe_embeddings().await.is_err());
    }

    #[tokio::test]
    async fn test_add_propagates_embedding_failure() {
        let rag = RagService::open(Arc::new(FailingEmbedder), None, 3).unwrap();
        let result = rag.add_table_metadata("t", "id INT", "").await;
        assert!(matches!(result, Err(StoreError::Embedding(_))));
        assert!(rag.table_names().await.is_empty());
    }

    #[tokio::test]
    async fn test_failed_save_leaves_store_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "not a directory").unwrap();
        let embedder = Arc::new(HashingEmbedder { dims: 256 });

        let rag = RagService::open(embedder, Some(blocker.join("store.json")), 3).unwrap();
        let result = rag.add_table_metadata("clientes", "id INT", "").await;

        assert!(matches!(result, Err(StoreError::Io(_))));
        assert!(rag.table_names().await.is_empty());
        assert_eq!(rag.get_context("clientes").await, NO_TABLES_CONTEXT);
    }

    #[tokio::test]
    async fn test_metadata_persists_across_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        let embedder = Arc::new(HashingEmbedder { dims: 256 });

        let rag = RagService::open(embedder.clone(), Some(path.clone()), 3).unwrap();
        seed(&rag).await;
        drop(rag);

        let reopened = RagService::open(embedder, Some(path), 3).unwrap();
        assert_eq!(reopened.table_names().await, vec!["clientes", "pedidos"]);
    }

    #[tokio::test]
    async fn test_long_schema_is_chunked() {
        let rag = service(10);
        let columns: Vec<String> = (0..200).map(|i| format!("columna_{i} INT")).collect();
        let written = rag
            .add_table_metadata("ancha", &columns.join(",\n"), "Tabla con muchas columnas")
            .await
            .unwrap();
        assert!(written > 1);
        assert_eq!(rag.table_names().await, vec!["ancha"]);
    }
}
