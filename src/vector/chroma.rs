//! Chroma client over its REST API.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::OnceCell;

use async_trait::async_trait;

use super::{VectorMatch, VectorRecord, VectorStore, VectorStoreError};

/// A Chroma collection, created on first use.
pub struct ChromaStore {
    client: Client,
    url: String,
    collection: String,
    collection_id: OnceCell<String>,
}

impl ChromaStore {
    /// Create a handle for `collection` on the server at `url`.
    pub fn new(url: &str, collection: &str) -> Self {
        Self {
            client: Client::new(),
            url: url.trim_end_matches('/').to_string(),
            collection: collection.to_string(),
            collection_id: OnceCell::new(),
        }
    }

    fn api_url(&self) -> String {
        format!("{}/api/v1", self.url)
    }

    /// Resolve (creating if needed) the collection id.
    async fn collection_id(&self) -> Result<&str, VectorStoreError> {
        let id = self
            .collection_id
            .get_or_try_init(|| async {
                let body = serde_json::json!({
                    "name": self.collection,
                    "get_or_create": true,
                });
                let resp = self
                    .client
                    .post(format!("{}/collections", self.api_url()))
                    .json(&body)
                    .send()
                    .await?;
                let text = check_status(resp).await?;
                let collection: ChromaCollection = serde_json::from_str(&text)
                    .map_err(|e| VectorStoreError::Malformed(format!("{}: {}", e, text)))?;
                tracing::debug!(
                    "Chroma collection '{}' resolved to {}",
                    self.collection,
                    collection.id
                );
                Ok::<_, VectorStoreError>(collection.id)
            })
            .await?;
        Ok(id.as_str())
    }
}

#[async_trait]
impl VectorStore for ChromaStore {
    fn collection(&self) -> &str {
        &self.collection
    }

    async fn upsert(&self, records: Vec<VectorRecord>) -> Result<(), VectorStoreError> {
        if records.is_empty() {
            return Ok(());
        }
        let id = self.collection_id().await?;

        let mut request = ChromaUpsert::default();
        for record in records {
            request.ids.push(record.id);
            request.embeddings.push(record.embedding);
            request.documents.push(record.document);
            // Chroma rejects empty metadata objects.
            request
                .metadatas
                .push(Some(record.metadata).filter(|m| !m.is_empty()));
        }

        let resp = self
            .client
            .post(format!("{}/collections/{}/upsert", self.api_url(), id))
            .json(&request)
            .send()
            .await?;
        check_status(resp).await?;

        tracing::debug!(
            "Upserted {} records into '{}'",
            request.ids.len(),
            self.collection
        );
        Ok(())
    }

    async fn query(
        &self,
        embedding: &[f32],
        n_results: usize,
    ) -> Result<Vec<VectorMatch>, VectorStoreError> {
        let id = self.collection_id().await?;
        let body = serde_json::json!({
            "query_embeddings": [embedding],
            "n_results": n_results,
            "include": ["documents", "metadatas", "distances"],
        });

        let resp = self
            .client
            .post(format!("{}/collections/{}/query", self.api_url(), id))
            .json(&body)
            .send()
            .await?;
        let text = check_status(resp).await?;
        let parsed: ChromaQueryResult = serde_json::from_str(&text)
            .map_err(|e| VectorStoreError::Malformed(format!("{}: {}", e, text)))?;

        Ok(parsed.into_matches())
    }

    async fn heartbeat(&self) -> Result<(), VectorStoreError> {
        let resp = self
            .client
            .get(format!("{}/heartbeat", self.api_url()))
            .send()
            .await?;
        check_status(resp).await.map(|_| ())
    }

    async fn count(&self) -> Result<usize, VectorStoreError> {
        let id = self.collection_id().await?;
        let resp = self
            .client
            .get(format!("{}/collections/{}/count", self.api_url(), id))
            .send()
            .await?;
        let text = check_status(resp).await?;
        text.trim()
            .parse()
            .map_err(|_| VectorStoreError::Malformed(format!("count: {}", text)))
    }
}

/// Return the body on success, a typed error otherwise.
async fn check_status(resp: reqwest::Response) -> Result<String, VectorStoreError> {
    let status = resp.status();
    let text = resp.text().await?;
    if !status.is_success() {
        return Err(VectorStoreError::Request {
            status: status.as_u16(),
            body: text,
        });
    }
    Ok(text)
}

#[derive(Debug, Deserialize)]
struct ChromaCollection {
    id: String,
}

#[derive(Debug, Default, Serialize)]
struct ChromaUpsert {
    ids: Vec<String>,
    embeddings: Vec<Vec<f32>>,
    documents: Vec<String>,
    metadatas: Vec<Option<Map<String, Value>>>,
}

/// Query results are nested one level per query embedding; we send one.
#[derive(Debug, Deserialize)]
struct ChromaQueryResult {
    ids: Vec<Vec<String>>,
    #[serde(default)]
    documents: Option<Vec<Vec<Option<String>>>>,
    #[serde(default)]
    metadatas: Option<Vec<Vec<Option<Map<String, Value>>>>>,
    #[serde(default)]
    distances: Option<Vec<Vec<Option<f32>>>>,
}

impl ChromaQueryResult {
    fn into_matches(self) -> Vec<VectorMatch> {
        let ids = self.ids.into_iter().next().unwrap_or_default();
        let documents = self.documents.and_then(|d| d.into_iter().next());
        let metadatas = self.metadatas.and_then(|m| m.into_iter().next());
        let distances = self.distances.and_then(|d| d.into_iter().next());

        ids.into_iter()
            .enumerate()
            .map(|(i, id)| VectorMatch {
                id,
                document: documents.as_ref().and_then(|d| d.get(i).cloned().flatten()),
                metadata: metadatas
                    .as_ref()
                    .and_then(|m| m.get(i).cloned().flatten())
                    .unwrap_or_default(),
                distance: distances.as_ref().and_then(|d| d.get(i).copied().flatten()),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn mount_collection(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/api/v1/collections"))
            .and(body_partial_json(json!({"name": "docs", "get_or_create": true})))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"id": "c0ffee", "name": "docs"})),
            )
            .expect(1)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_query_flattens_nested_results() {
        let server = MockServer::start().await;
        mount_collection(&server).await;
        Mock::given(method("POST"))
            .and(path("/api/v1/collections/c0ffee/query"))
            .and(body_partial_json(json!({"n_results": 2})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ids": [["GLOBAL_QUOTE", "OVERVIEW"]],
                "documents": [["latest price", "company overview"]],
                "metadatas": [[{"parameters": "{}"}, null]],
                "distances": [[0.12, 0.4]]
            })))
            .mount(&server)
            .await;

        let store = ChromaStore::new(&server.uri(), "docs");
        let matches = store.query(&[0.1, 0.2], 2).await.unwrap();
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].id, "GLOBAL_QUOTE");
        assert_eq!(matches[0].document.as_deref(), Some("latest price"));
        assert_eq!(matches[0].metadata["parameters"], "{}");
        assert!(matches[1].metadata.is_empty());
        assert_eq!(matches[1].distance, Some(0.4));

        // collection id is cached
        store.query(&[0.1, 0.2], 2).await.unwrap();
    }

    #[tokio::test]
    async fn test_upsert_sends_parallel_arrays() {
        let server = MockServer::start().await;
        mount_collection(&server).await;
        Mock::given(method("POST"))
            .and(path("/api/v1/collections/c0ffee/upsert"))
            .and(body_partial_json(json!({
                "ids": ["GLOBAL_QUOTE"],
                "documents": ["latest price"],
                "metadatas": [{"parameters": "{\"symbol\":\"IBM\"}"}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!(true)))
            .expect(1)
            .mount(&server)
            .await;

        let store = ChromaStore::new(&server.uri(), "docs");
        let record = VectorRecord::new("GLOBAL_QUOTE", vec![0.5], "latest price")
            .with_metadata("parameters", "{\"symbol\":\"IBM\"}");
        store.upsert(vec![record]).await.unwrap();
    }

    #[tokio::test]
    async fn test_errors_are_typed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/collections"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let store = ChromaStore::new(&server.uri(), "docs");
        match store.count().await {
            Err(VectorStoreError::Request { status, body }) => {
                assert_eq!(status, 500);
                assert_eq!(body, "boom");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_heartbeat_needs_no_collection() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/heartbeat"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"nanosecond heartbeat": 1718000000000000000u64})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let store = ChromaStore::new(&server.uri(), "docs");
        store.heartbeat().await.unwrap();

        let down = ChromaStore::new("http://127.0.0.1:9", "docs");
        assert!(matches!(
            down.heartbeat().await,
            Err(VectorStoreError::Unavailable(_))
        ));
    }
}
