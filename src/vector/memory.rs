//! Brute-force in-memory vector store using cosine distance.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{VectorMatch, VectorRecord, VectorStore, VectorStoreError};

/// Process-local collection. Insertion order is kept so ties are stable.
pub struct InMemoryStore {
    collection: String,
    records: RwLock<Vec<VectorRecord>>,
}

impl InMemoryStore {
    pub fn new(collection: &str) -> Self {
        Self {
            collection: collection.to_string(),
            records: RwLock::new(Vec::new()),
        }
    }
}

#[async_trait]
impl VectorStore for InMemoryStore {
    fn collection(&self) -> &str {
        &self.collection
    }

    async fn upsert(&self, records: Vec<VectorRecord>) -> Result<(), VectorStoreError> {
        let mut stored = self.records.write().await;
        let expected = stored.first().map(|r| r.embedding.len());

        let mut positions: HashMap<String, usize> = stored
            .iter()
            .enumerate()
            .map(|(i, r)| (r.id.clone(), i))
            .collect();

        for record in records {
            let expected = expected.unwrap_or(record.embedding.len());
            if record.embedding.len() != expected {
                return Err(VectorStoreError::DimensionMismatch {
                    expected,
                    actual: record.embedding.len(),
                });
            }
            match positions.get(&record.id) {
                Some(&i) => stored[i] = record,
                None => {
                    positions.insert(record.id.clone(), stored.len());
                    stored.push(record);
                }
            }
        }
        Ok(())
    }

    async fn query(
        &self,
        embedding: &[f32],
        n_results: usize,
    ) -> Result<Vec<VectorMatch>, VectorStoreError> {
        let stored = self.records.read().await;
        if let Some(first) = stored.first() {
            if first.embedding.len() != embedding.len() {
                return Err(VectorStoreError::DimensionMismatch {
                    expected: first.embedding.len(),
                    actual: embedding.len(),
                });
            }
        }

        let mut scored: Vec<(f32, &VectorRecord)> = stored
            .iter()
            .map(|r| (cosine_distance(&r.embedding, embedding), r))
            .collect();
        // Stable sort keeps insertion order among equal distances.
        scored.sort_by(|a, b| a.0.total_cmp(&b.0));

        Ok(scored
            .into_iter()
            .take(n_results)
            .map(|(distance, r)| VectorMatch {
                id: r.id.clone(),
                document: Some(r.document.clone()),
                metadata: r.metadata.clone(),
                distance: Some(distance),
            })
            .collect())
    }

    async fn count(&self) -> Result<usize, VectorStoreError> {
        Ok(self.records.read().await.len())
    }
}

/// `1 - cosine similarity`; zero vectors are maximally distant.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    1.0 - dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_query_orders_by_distance() {
        let store = InMemoryStore::new("docs");
        store
            .upsert(vec![
                VectorRecord::new("east", vec![1.0, 0.0], "east"),
                VectorRecord::new("north", vec![0.0, 1.0], "north"),
                VectorRecord::new("north_east", vec![1.0, 1.0], "north east"),
            ])
            .await
            .unwrap();

        let hits = store.query(&[0.1, 1.0], 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "north");
        assert_eq!(hits[1].id, "north_east");
        assert!(hits[0].distance.unwrap() <= hits[1].distance.unwrap());
    }

    #[tokio::test]
    async fn test_upsert_replaces_by_id() {
        let store = InMemoryStore::new("docs");
        store
            .upsert(vec![VectorRecord::new("a", vec![1.0, 0.0], "old")])
            .await
            .unwrap();
        store
            .upsert(vec![VectorRecord::new("a", vec![1.0, 0.0], "new")])
            .await
            .unwrap();

        assert_eq!(store.count().await.unwrap(), 1);
        let hits = store.query(&[1.0, 0.0], 1).await.unwrap();
        assert_eq!(hits[0].document.as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn test_dimension_mismatch() {
        let store = InMemoryStore::new("docs");
        store
            .upsert(vec![VectorRecord::new("a", vec![1.0, 0.0], "a")])
            .await
            .unwrap();
        assert!(matches!(
            store.query(&[1.0], 1).await,
            Err(VectorStoreError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_cosine_distance_zero_vector() {
        assert_eq!(cosine_distance(&[0.0, 0.0], &[1.0, 0.0]), 1.0);
        assert!(cosine_distance(&[1.0, 0.0], &[2.0, 0.0]).abs() < 1e-6);
    }
}
