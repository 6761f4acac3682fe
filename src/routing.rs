//! Semantic function routing.
//!
//! Catalog descriptions are embedded into a vector collection once; a query
//! is embedded the same way and the nearest catalog functions are returned.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::OnceCell;

use crate::catalog::FunctionCatalog;
use crate::llm::Embedder;
use crate::vector::{VectorRecord, VectorStore, VectorStoreError};

/// Number of candidates returned by `route` when the caller has no preference.
pub const DEFAULT_TOP_K: usize = 3;

#[derive(Debug, Error)]
pub enum RoutingError {
    #[error("Function catalog is empty")]
    EmptyCatalog,

    #[error("No catalog function matches '{0}'")]
    NoMatch(String),

    #[error("Embedding failed: {0}")]
    Embedding(anyhow::Error),

    #[error(transparent)]
    Store(#[from] VectorStoreError),
}

/// A catalog function selected for a query.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoutedFunction {
    pub function: String,
    pub documentation: String,
    pub parameters: Value,
}

pub struct FunctionRouter {
    catalog: Arc<FunctionCatalog>,
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    indexed: OnceCell<usize>,
}

impl FunctionRouter {
    pub fn new(
        catalog: Arc<FunctionCatalog>,
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
    ) -> Self {
        Self {
            catalog,
            embedder,
            store,
            indexed: OnceCell::new(),
        }
    }

    pub fn catalog(&self) -> &FunctionCatalog {
        &self.catalog
    }

    /// Embed and store every catalog entry. Runs at most once per router;
    /// concurrent callers wait for the first to finish. Returns the number
    /// of entries indexed.
    pub async fn index(&self) -> Result<usize, RoutingError> {
        if self.catalog.is_empty() {
            return Err(RoutingError::EmptyCatalog);
        }
        let count = self
            .indexed
            .get_or_try_init(|| async {
                let descriptions: Vec<String> = self
                    .catalog
                    .entries()
                    .iter()
                    .map(|e| e.description.clone())
                    .collect();
                let embeddings = self
                    .embedder
                    .embed_batch(&descriptions)
                    .await
                    .map_err(RoutingError::Embedding)?;
                if embeddings.len() != descriptions.len() {
                    return Err(RoutingError::Embedding(anyhow::anyhow!(
                        "got {} embeddings for {} catalog entries",
                        embeddings.len(),
                        descriptions.len()
                    )));
                }

                let records: Vec<VectorRecord> = self
                    .catalog
                    .entries()
                    .iter()
                    .zip(embeddings)
                    .map(|(entry, embedding)| {
                        VectorRecord::new(&entry.function, embedding, &entry.description)
                            .with_metadata("parameters", entry.parameters.to_string())
                    })
                    .collect();
                let count = records.len();
                self.store.upsert(records).await?;

                tracing::info!(
                    "Indexed {} catalog functions into '{}'",
                    count,
                    self.store.collection()
                );
                Ok::<_, RoutingError>(count)
            })
            .await?;
        Ok(*count)
    }

    /// Return up to `k` catalog functions nearest to `query`, best first.
    ///
    /// Twice `k` neighbours are fetched so that stale ids left in the
    /// collection by an older catalog do not crowd out current entries.
    pub async fn route(&self, query: &str, k: usize) -> Result<Vec<RoutedFunction>, RoutingError> {
        self.index().await?;

        let embedding = self
            .embedder
            .embed_query(query)
            .await
            .map_err(RoutingError::Embedding)?;
        let k = k.max(1);
        let matches = self.store.query(&embedding, k.saturating_mul(2)).await?;

        let routed: Vec<RoutedFunction> = matches
            .into_iter()
            .filter_map(|m| {
                let Some(entry) = self.catalog.get(&m.id) else {
                    tracing::warn!(
                        "Dropping vector match '{}' not present in the catalog",
                        m.id
                    );
                    return None;
                };
                let parameters = m
                    .metadata
                    .get("parameters")
                    .and_then(Value::as_str)
                    .and_then(|s| serde_json::from_str(s).ok())
                    .unwrap_or_else(|| entry.parameters.clone());
                Some(RoutedFunction {
                    function: entry.function.clone(),
                    documentation: m.document.unwrap_or_else(|| entry.description.clone()),
                    parameters,
                })
            })
            .take(k)
            .collect();

        if routed.is_empty() {
            return Err(RoutingError::NoMatch(query.to_string()));
        }
        tracing::debug!(
            "Routed '{}' to [{}]",
            query,
            routed
                .iter()
                .map(|r| r.function.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(routed)
    }

    /// The single nearest catalog function.
    pub async fn best(&self, query: &str) -> Result<RoutedFunction, RoutingError> {
        self.route(query, DEFAULT_TOP_K)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| RoutingError::NoMatch(query.to_string()))
    }
}
