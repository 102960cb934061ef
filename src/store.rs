//! In-memory vector store for table-metadata chunks.
//!
//! Chunks are kept in insertion order and searched linearly by cosine
//! similarity. The whole store round-trips through a single JSON file.

use std::collections::BTreeSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from store persistence and search.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Embedding dimension {got} doesn't match store dimension {expected}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Embedding error: {0}")]
    Embedding(#[from] crate::llm::LlmError),
}

/// One embedded piece of a table's metadata document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredChunk {
    /// `{table_name}:{chunk_id}`.
    pub id: String,
    pub table_name: String,
    pub chunk_id: usize,
    pub content: String,
    pub embedding: Vec<f32>,
}

/// A search result, best first.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub table_name: String,
    pub chunk_id: usize,
    pub content: String,
    pub score: f32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VectorStore {
    dimension: Option<usize>,
    chunks: Vec<StoredChunk>,
}

impl VectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a store from `path`, or an empty one if the file doesn't exist.
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let data = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&data)?)
    }

    /// Write the store to `path`, creating parent directories.
    ///
    /// Writes to a sibling temp file first and renames it into place.
    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(self)?)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Replace every chunk of `table_name` with `chunks`.
    ///
    /// Each entry is `(content, embedding)`; chunk ids follow the order
    /// given. Nothing is modified if any embedding has the wrong dimension.
    pub fn upsert_table(
        &mut self,
        table_name: &str,
        chunks: Vec<(String, Vec<f32>)>,
    ) -> Result<usize, StoreError> {
        let expected = self
            .dimension
            .or_else(|| chunks.first().map(|(_, e)| e.len()));
        if let Some(expected) = expected
            && let Some((_, bad)) = chunks.iter().find(|(_, e)| e.len() != expected)
        {
            return Err(StoreError::DimensionMismatch {
                expected,
                got: bad.len(),
            });
        }

        self.chunks.retain(|c| c.table_name != table_name);
        if expected.is_some() {
            self.dimension = expected;
        }

        let count = chunks.len();
        for (chunk_id, (content, embedding)) in chunks.into_iter().enumerate() {
            self.chunks.push(StoredChunk {
                id: format!("{table_name}:{chunk_id}"),
                table_name: table_name.to_string(),
                chunk_id,
                content,
                embedding,
            });
        }
        Ok(count)
    }

    /// The `top_k` chunks most similar to `query`, best first.
    pub fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<SearchHit>, StoreError> {
        let Some(dimension) = self.dimension else {
            return Ok(Vec::new());
        };
        if query.len() != dimension {
            return Err(StoreError::DimensionMismatch {
                expected: dimension,
                got: query.len(),
            });
        }

        let mut hits: Vec<SearchHit> = self
            .chunks
            .iter()
            .map(|chunk| SearchHit {
                table_name: chunk.table_name.clone(),
                chunk_id: chunk.chunk_id,
                content: chunk.content.clone(),
                score: cosine_similarity(query, &chunk.embedding),
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(top_k);
        Ok(hits)
    }

    /// Distinct table names, sorted.
    pub fn table_names(&self) -> Vec<String> {
        self.chunks
            .iter()
            .map(|c| c.table_name.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

/// Cosine similarity; zero when either vector has zero norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
