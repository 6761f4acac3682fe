//! Semantic search over ingested e-mails.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{Tool, ToolSpec};
use crate::llm::Embedder;
use crate::vector::VectorStore;

/// Number of e-mails returned per query.
const EMAIL_RESULTS: usize = 10;

pub struct EmailReader {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
}

impl EmailReader {
    pub fn new(embedder: Arc<dyn Embedder>, store: Arc<dyn VectorStore>) -> Self {
        Self { embedder, store }
    }
}

#[async_trait]
impl Tool for EmailReader {
    fn name(&self) -> &str {
        "email_reader_engine"
    }

    fn description(&self) -> &str {
        "Search the user's e-mails. Provides the e-mails most relevant to the query, with sender, date and subject."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {"type": "string", "description": "What to look for in the e-mails"}
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, args: Value) -> anyhow::Result<String> {
        let query = args["query"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("Missing 'query' argument"))?;

        let embedding = self.embedder.embed_query(query).await?;
        let matches = self.store.query(&embedding, EMAIL_RESULTS).await?;
        tracing::debug!(
            "E-mail search '{}' matched {} documents in '{}'",
            query,
            matches.len(),
            self.store.collection()
        );

        if matches.is_empty() {
            return Ok("No matching e-mails found.".to_string());
        }

        let documents: Vec<String> = matches
            .into_iter()
            .filter_map(|m| m.document)
            .collect();
        Ok(documents.join("\n\n---\n\n"))
    }
}

pub struct EmailReaderToolSpec {
    reader: Arc<EmailReader>,
}

impl EmailReaderToolSpec {
    pub fn new(embedder: Arc<dyn Embedder>, store: Arc<dyn VectorStore>) -> Self {
        Self {
            reader: Arc::new(EmailReader::new(embedder, store)),
        }
    }
}

impl ToolSpec for EmailReaderToolSpec {
    fn to_tool_list(&self) -> Vec<Arc<dyn Tool>> {
        vec![self.reader.clone()]
    }
}
