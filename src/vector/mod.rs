//! Vector store abstraction.
//!
//! Nearest-neighbour search is delegated to Chroma; the in-memory store
//! exists for tests and for running without a database (`--offline`).

mod chroma;
mod memory;

pub use chroma::ChromaStore;
pub use memory::InMemoryStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Errors from vector store operations.
#[derive(Debug, Error)]
pub enum VectorStoreError {
    #[error("Vector store unreachable: {0}")]
    Unavailable(String),

    #[error("Vector store request failed ({status}): {body}")]
    Request { status: u16, body: String },

    #[error("Malformed vector store response: {0}")]
    Malformed(String),

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

impl From<reqwest::Error> for VectorStoreError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            VectorStoreError::Malformed(e.to_string())
        } else {
            VectorStoreError::Unavailable(e.to_string())
        }
    }
}

/// A document stored with its embedding.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VectorRecord {
    pub id: String,
    pub embedding: Vec<f32>,
    pub document: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl VectorRecord {
    pub fn new(id: impl Into<String>, embedding: Vec<f32>, document: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            embedding,
            document: document.into(),
            metadata: Map::new(),
        }
    }

    /// Attach a metadata field.
    pub fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

/// A query hit, nearest first.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VectorMatch {
    pub id: String,
    pub document: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    /// Smaller is closer.
    pub distance: Option<f32>,
}

/// A single named collection of embeddings.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Collection name, for logs.
    fn collection(&self) -> &str;

    /// Insert or replace records by id.
    async fn upsert(&self, records: Vec<VectorRecord>) -> Result<(), VectorStoreError>;

    /// Return up to `n_results` nearest records, ordered by ascending distance.
    async fn query(
        &self,
        embedding: &[f32],
        n_results: usize,
    ) -> Result<Vec<VectorMatch>, VectorStoreError>;

    /// Number of records in the collection.
    async fn count(&self) -> Result<usize, VectorStoreError>;

    /// Liveness of the backing server. Local stores are always up.
    async fn heartbeat(&self) -> Result<(), VectorStoreError> {
        Ok(())
    }
}
