//! E-mail ingestion from Gmail into the vector store.
//!
//! Messages are listed with a Gmail search query, fetched in full, reduced
//! to plain text and embedded into the e-mail collection that the
//! `email_reader_engine` tool searches.

use std::sync::OnceLock;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use regex::Regex;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::llm::Embedder;
use crate::vector::{VectorRecord, VectorStore, VectorStoreError};

pub const GMAIL_API_URL: &str = "https://gmail.googleapis.com";

/// Gmail caps a list page at 500 ids.
const MAX_PAGE_SIZE: usize = 500;

/// Longest body kept per e-mail, in characters.
const MAX_BODY_CHARS: usize = 8000;

/// Documents embedded per round trip.
const INGEST_BATCH: usize = 16;

#[derive(Debug, Error)]
pub enum GmailError {
    #[error("Gmail access token rejected (expired or missing scope)")]
    Unauthorized,

    #[error("Gmail request failed ({status}): {body}")]
    Request { status: u16, body: String },

    #[error("Gmail unreachable: {0}")]
    Http(#[from] reqwest::Error),
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Gmail(#[from] GmailError),

    #[error("Embedding failed: {0}")]
    Embedding(anyhow::Error),

    #[error(transparent)]
    Store(#[from] VectorStoreError),
}

/// A message reduced to what the assistant needs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmailDocument {
    pub id: String,
    pub subject: String,
    pub from: String,
    pub date: String,
    pub body: String,
}

impl EmailDocument {
    /// Text stored and embedded for search.
    pub fn to_text(&self) -> String {
        format!(
            "From: {}\nDate: {}\nSubject: {}\n\n{}",
            self.from, self.date, self.subject, self.body
        )
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse {
    #[serde(default)]
    messages: Vec<MessageRef>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessageRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct Message {
    id: String,
    #[serde(default)]
    snippet: String,
    payload: Option<MessagePart>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessagePart {
    #[serde(default)]
    mime_type: String,
    #[serde(default)]
    headers: Vec<Header>,
    body: Option<PartBody>,
    #[serde(default)]
    parts: Vec<MessagePart>,
}

#[derive(Debug, Deserialize)]
struct Header {
    name: String,
    value: String,
}

#[derive(Debug, Deserialize)]
struct PartBody {
    data: Option<String>,
}

impl MessagePart {
    fn header(&self, name: &str) -> String {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.clone())
            .unwrap_or_default()
    }

    /// First decodable part of `mime_type`, depth first.
    fn find_text(&self, mime_type: &str) -> Option<String> {
        if self.mime_type.eq_ignore_ascii_case(mime_type) {
            if let Some(text) = self
                .body
                .as_ref()
                .and_then(|b| b.data.as_deref())
                .and_then(decode_base64url)
            {
                return Some(text);
            }
        }
        self.parts.iter().find_map(|p| p.find_text(mime_type))
    }
}

pub struct GmailReader {
    http: Client,
    base_url: String,
    token: String,
}

impl GmailReader {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: GMAIL_API_URL.to_string(),
            token: token.into(),
        }
    }

    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, GmailError> {
        let response = self
            .http
            .get(format!("{}/gmail/v1/users/me/{}", self.base_url, path))
            .bearer_auth(&self.token)
            .query(query)
            .send()
            .await?;

        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(GmailError::Unauthorized),
            status if !status.is_success() => Err(GmailError::Request {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            }),
            _ => Ok(response.json().await?),
        }
    }

    /// Ids of messages matching `query`, newest first, at most `limit`.
    pub async fn list_ids(&self, query: &str, limit: usize) -> Result<Vec<String>, GmailError> {
        let mut ids = Vec::new();
        let mut page_token: Option<String> = None;

        while ids.len() < limit {
            let mut params = vec![
                ("q", query.to_string()),
                ("maxResults", (limit - ids.len()).min(MAX_PAGE_SIZE).to_string()),
            ];
            if let Some(token) = &page_token {
                params.push(("pageToken", token.clone()));
            }

            let page: ListResponse = self.get_json("messages", &params).await?;
            ids.extend(page.messages.into_iter().map(|m| m.id));
            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        ids.truncate(limit);
        Ok(ids)
    }

    pub async fn fetch(&self, id: &str) -> Result<EmailDocument, GmailError> {
        let message: Message = self
            .get_json(&format!("messages/{}", id), &[("format", "full".to_string())])
            .await?;
        Ok(to_document(message))
    }

    /// Fetch every message matching `query`. Messages that fail to load are
    /// logged and skipped.
    pub async fn load(&self, query: &str, limit: usize) -> Result<Vec<EmailDocument>, GmailError> {
        let ids = self.list_ids(query, limit).await?;
        tracing::info!("Gmail query '{}' matched {} messages", query, ids.len());

        let mut documents = Vec::with_capacity(ids.len());
        for id in ids {
            match self.fetch(&id).await {
                Ok(doc) => documents.push(doc),
                Err(GmailError::Unauthorized) => return Err(GmailError::Unauthorized),
                Err(e) => tracing::warn!("Skipping message {}: {}", id, e),
            }
        }
        Ok(documents)
    }
}

fn to_document(message: Message) -> EmailDocument {
    let payload = message.payload.unwrap_or_default();
    let body = payload
        .find_text("text/plain")
        .or_else(|| payload.find_text("text/html").map(|html| html_to_text(&html)))
        .unwrap_or(message.snippet);

    EmailDocument {
        subject: payload.header("Subject"),
        from: payload.header("From"),
        date: payload.header("Date"),
        body: truncate_chars(body.trim(), MAX_BODY_CHARS),
        id: message.id,
    }
}

/// Gmail bodies are base64url, with or without padding.
pub fn decode_base64url(data: &str) -> Option<String> {
    let bytes = URL_SAFE_NO_PAD.decode(data.trim().trim_end_matches('=')).ok()?;
    Some(String::from_utf8_lossy(&bytes).into_owned())
}

static BLOCK_RE: OnceLock<Regex> = OnceLock::new();
static TAG_RE: OnceLock<Regex> = OnceLock::new();
static NEWLINES_RE: OnceLock<Regex> = OnceLock::new();

/// Crude HTML to text: drop scripts and styles, strip tags, decode the
/// common entities, squeeze blank lines.
pub fn html_to_text(html: &str) -> String {
    let blocks = BLOCK_RE.get_or_init(|| {
        Regex::new(r"(?is)<(script|style|head)\b.*?</(script|style|head)>").unwrap()
    });
    let tags = TAG_RE.get_or_init(|| Regex::new(r"(?s)<[^>]*>").unwrap());
    let newlines = NEWLINES_RE.get_or_init(|| Regex::new(r"[ \t\r\f]*\n[ \t\r\n\f]*").unwrap());

    let text = blocks.replace_all(html, " ");
    let text = tags.replace_all(&text, "\n");
    let text = text
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");
    newlines.replace_all(&text, "\n").trim().to_string()
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

/// Load the e-mails matching `query` and embed them into `store`.
/// Returns the number stored.
pub async fn ingest_emails(
    reader: &GmailReader,
    query: &str,
    limit: usize,
    embedder: &dyn Embedder,
    store: &dyn VectorStore,
) -> Result<usize, IngestError> {
    let documents = reader.load(query, limit).await?;
    store_emails(&documents, embedder, store).await
}

/// Embed `documents` into `store`, replacing earlier copies by id.
pub async fn store_emails(
    documents: &[EmailDocument],
    embedder: &dyn Embedder,
    store: &dyn VectorStore,
) -> Result<usize, IngestError> {
    let mut stored = 0;
    for batch in documents.chunks(INGEST_BATCH) {
        let texts: Vec<String> = batch.iter().map(EmailDocument::to_text).collect();
        let embeddings = embedder
            .embed_batch(&texts)
            .await
            .map_err(IngestError::Embedding)?;
        if embeddings.len() != batch.len() {
            return Err(IngestError::Embedding(anyhow::anyhow!(
                "got {} embeddings for {} e-mails",
                embeddings.len(),
                batch.len()
            )));
        }

        let records = batch
            .iter()
            .zip(texts)
            .zip(embeddings)
            .map(|((doc, text), embedding)| {
                VectorRecord::new(&doc.id, embedding, text)
                    .with_metadata("subject", doc.subject.as_str())
                    .with_metadata("from", doc.from.as_str())
                    .with_metadata("date", doc.date.as_str())
            })
            .collect();
        store.upsert(records).await?;
        stored += batch.len();
        tracing::debug!("Stored {}/{} e-mails", stored, documents.len());
    }

    tracing::info!(
        "Ingested {} e-mails into '{}'",
        stored,
        store.collection()
    );
    Ok(stored)
}
