//! Ollama client: chat with tool calling and embeddings, with automatic retry.
//!
//! Ollama's wire format differs from the OpenAI one in two ways that matter
//! here: tool call arguments are JSON objects instead of strings, and tool
//! calls carry no id. Both are normalised at this boundary.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::{parse_retry_after, LlmError, RetryConfig};
use super::{
    ChatMessage, ChatOptions, ChatResponse, Embedder, LlmClient, Role, TokenUsage, ToolCall,
    ToolDefinition,
};
use crate::config::DEFAULT_EMBED_MODEL;

/// Long generations on a local GPU are slow; match the daemon's patience.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(360);

/// Dimension of `bge-m3`.
const BGE_M3_DIMENSION: usize = 1024;

/// Ollama HTTP client.
pub struct OllamaClient {
    client: Client,
    base_url: String,
    embed_model: String,
    dimension: usize,
    retry_config: RetryConfig,
}

impl OllamaClient {
    /// Create a client for the daemon at `base_url` with default retry configuration.
    pub fn new(base_url: &str) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            embed_model: DEFAULT_EMBED_MODEL.to_string(),
            dimension: BGE_M3_DIMENSION,
            retry_config: RetryConfig::default(),
        }
    }

    /// Use another embedding model.
    pub fn with_embed_model(mut self, model: &str) -> Self {
        self.embed_model = model.to_string();
        self
    }

    /// Override the expected embedding dimension.
    #[cfg(test)]
    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.dimension = dimension;
        self
    }

    /// Use a custom retry configuration.
    pub fn with_retry_config(mut self, retry_config: RetryConfig) -> Self {
        self.retry_config = retry_config;
        self
    }

    /// Check if the daemon is reachable.
    pub async fn health_check(&self) -> bool {
        self.client
            .get(format!("{}/api/tags", self.base_url))
            .timeout(Duration::from_secs(3))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    /// POST a JSON body and decode the JSON reply, classifying failures.
    async fn post_json<B, R>(&self, path: &str, body: &B) -> Result<R, LlmError>
    where
        B: Serialize + ?Sized,
        R: for<'de> Deserialize<'de>,
    {
        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .json(body)
            .send()
            .await
            .map_err(LlmError::from_reqwest)?;

        let status = response.status();
        let retry_after = parse_retry_after(response.headers());
        let text = response.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(LlmError::from_status(status.as_u16(), &text, retry_after));
        }

        serde_json::from_str(&text).map_err(|e| {
            LlmError::parse_error(format!("Failed to parse Ollama response: {}, body: {}", e, text))
        })
    }
}

#[async_trait]
impl LlmClient for OllamaClient {
    async fn chat_completion(
        &self,
        model: &str,
        messages: &[ChatMessage],
        tools: Option<&[ToolDefinition]>,
    ) -> anyhow::Result<ChatResponse> {
        self.chat_completion_with_options(model, messages, tools, ChatOptions::default())
            .await
    }

    async fn chat_completion_with_options(
        &self,
        model: &str,
        messages: &[ChatMessage],
        tools: Option<&[ToolDefinition]>,
        options: ChatOptions,
    ) -> anyhow::Result<ChatResponse> {
        let request = OllamaChatRequest {
            model: model.to_string(),
            messages: messages.iter().map(OllamaMessage::from).collect(),
            tools: tools.filter(|t| !t.is_empty()).map(|t| t.to_vec()),
            stream: false,
            format: options.json_mode.then(|| "json".to_string()),
            options: OllamaOptions::from_chat_options(&options),
        };

        tracing::debug!(
            "Sending chat request to Ollama: model={}, messages={}, tools={}",
            model,
            messages.len(),
            request.tools.as_ref().map_or(0, |t| t.len())
        );

        let parsed: OllamaChatResponse = self
            .retry_config
            .run("Ollama chat", || self.post_json("/api/chat", &request))
            .await?;

        Ok(parsed.into_chat_response(model))
    }
}

#[async_trait]
impl Embedder for OllamaClient {
    async fn embed_text(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        self.embed_batch(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("No embedding returned"))
    }

    async fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let request = OllamaEmbedRequest {
            model: self.embed_model.clone(),
            input: texts.to_vec(),
        };

        let response: OllamaEmbedResponse = self
            .retry_config
            .run("Ollama embed", || self.post_json("/api/embed", &request))
            .await?;

        if response.embeddings.len() != texts.len() {
            anyhow::bail!(
                "Ollama returned {} embeddings for {} inputs",
                response.embeddings.len(),
                texts.len()
            );
        }

        for (i, emb) in response.embeddings.iter().enumerate() {
            if emb.len() != self.dimension {
                tracing::warn!(
                    "Embedding {} has dimension {} but expected {}",
                    i,
                    emb.len(),
                    self.dimension
                );
            }
        }

        Ok(response.embeddings)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Ollama chat request format.
#[derive(Debug, Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<OllamaMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ToolDefinition>>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<String>,
    #[serde(skip_serializing_if = "OllamaOptions::is_empty")]
    options: OllamaOptions,
}

#[derive(Debug, Default, Serialize)]
struct OllamaOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u64>,
}

impl OllamaOptions {
    fn from_chat_options(options: &ChatOptions) -> Self {
        Self {
            temperature: options.temperature,
            top_p: options.top_p,
            num_predict: options.max_tokens,
        }
    }

    fn is_empty(&self) -> bool {
        self.temperature.is_none() && self.top_p.is_none() && self.num_predict.is_none()
    }
}

/// Message in Ollama's chat format.
#[derive(Debug, Serialize, Deserialize)]
struct OllamaMessage {
    role: Role,
    #[serde(default)]
    content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<OllamaToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_name: Option<String>,
}

impl From<&ChatMessage> for OllamaMessage {
    fn from(msg: &ChatMessage) -> Self {
        Self {
            role: msg.role.clone(),
            content: msg.content.clone().unwrap_or_default(),
            tool_calls: msg.tool_calls.as_ref().map(|calls| {
                calls
                    .iter()
                    .map(|c| OllamaToolCall {
                        function: OllamaFunctionCall {
                            name: c.function.name.clone(),
                            arguments: c.parsed_arguments(),
                        },
                    })
                    .collect()
            }),
            tool_name: msg.name.clone(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct OllamaToolCall {
    function: OllamaFunctionCall,
}

#[derive(Debug, Serialize, Deserialize)]
struct OllamaFunctionCall {
    name: String,
    #[serde(default)]
    arguments: Value,
}

/// Ollama chat response format.
#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    #[serde(default)]
    model: Option<String>,
    message: OllamaMessage,
    #[serde(default)]
    done_reason: Option<String>,
    #[serde(default)]
    prompt_eval_count: Option<u64>,
    #[serde(default)]
    eval_count: Option<u64>,
}

impl OllamaChatResponse {
    fn into_chat_response(self, requested_model: &str) -> ChatResponse {
        let tool_calls = self.message.tool_calls.map(|calls| {
            calls
                .into_iter()
                .map(|c| {
                    // Some models double-encode arguments as a JSON string.
                    let arguments = match c.function.arguments {
                        Value::String(s) => s,
                        Value::Null => "{}".to_string(),
                        other => other.to_string(),
                    };
                    ToolCall::function(c.function.name, arguments)
                })
                .collect::<Vec<_>>()
        });

        let content = Some(self.message.content).filter(|c| !c.trim().is_empty());

        let usage = match (self.prompt_eval_count, self.eval_count) {
            (Some(p), Some(e)) => Some(TokenUsage::new(p, e)),
            _ => None,
        };

        ChatResponse {
            content,
            tool_calls: tool_calls.filter(|t| !t.is_empty()),
            finish_reason: self.done_reason,
            usage,
            model: self.model.or_else(|| Some(requested_model.to_string())),
        }
    }
}

#[derive(Debug, Serialize)]
struct OllamaEmbedRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct OllamaEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> OllamaClient {
        OllamaClient::new(&server.uri())
            .with_retry_config(RetryConfig::disabled())
            .with_dimension(3)
    }

    #[tokio::test]
    async fn test_chat_maps_tool_calls() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .and(body_partial_json(json!({"model": "llama3.1", "stream": false})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "model": "llama3.1",
                "message": {
                    "role": "assistant",
                    "content": "",
                    "tool_calls": [
                        {"function": {"name": "convert", "arguments": {"amount": 10, "to_currency": "EUR"}}}
                    ]
                },
                "done": true,
                "done_reason": "stop",
                "prompt_eval_count": 12,
                "eval_count": 5
            })))
            .mount(&server)
            .await;

        let response = client(&server)
            .chat_completion("llama3.1", &[ChatMessage::user("10 USD in EUR?")], None)
            .await
            .unwrap();

        assert!(response.content.is_none());
        let calls = response.tool_calls.unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].function.name, "convert");
        assert!(calls[0].id.starts_with("call_"));
        assert_eq!(calls[0].parsed_arguments()["to_currency"], "EUR");
        assert_eq!(response.usage.unwrap().total_tokens, 17);
    }

    #[tokio::test]
    async fn test_chat_sends_tool_results_with_name() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .and(body_partial_json(json!({
                "messages": [
                    {"role": "user", "content": "rate?"},
                    {"role": "assistant", "tool_calls": [{"function": {"name": "get_exchange_rates", "arguments": {}}}]},
                    {"role": "tool", "content": "{\"EUR\":0.9}", "tool_name": "get_exchange_rates"}
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "message": {"role": "assistant", "content": "1 USD is 0.9 EUR"},
                "done": true
            })))
            .mount(&server)
            .await;

        let call = ToolCall::function("get_exchange_rates", "");
        let messages = vec![
            ChatMessage::user("rate?"),
            ChatMessage::assistant_tool_calls(None, vec![call.clone()]),
            ChatMessage::tool_result(&call, "{\"EUR\":0.9}"),
        ];
        let response = client(&server)
            .chat_completion("llama3.1", &messages, None)
            .await
            .unwrap();
        assert_eq!(response.content.as_deref(), Some("1 USD is 0.9 EUR"));
        assert!(!response.has_tool_calls());
    }

    #[tokio::test]
    async fn test_chat_reports_missing_tool_support() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_string(r#"{"error":"gemma does not support tools"}"#),
            )
            .mount(&server)
            .await;

        let err = client(&server)
            .chat_completion("gemma", &[ChatMessage::user("hi")], None)
            .await
            .unwrap_err();
        let llm_err = err.downcast_ref::<LlmError>().unwrap();
        assert_eq!(llm_err.kind, crate::llm::LlmErrorKind::IncompatibleModel);
    }

    #[tokio::test]
    async fn test_embed_batch() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/embed"))
            .and(body_partial_json(json!({"model": "bge-m3", "input": ["a", "b"]})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "embeddings": [[0.1, 0.2, 0.3], [0.4, 0.5, 0.6]]
            })))
            .mount(&server)
            .await;

        let embeddings = client(&server)
            .embed_batch(&["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert_eq!(embeddings.len(), 2);
        assert_eq!(embeddings[1], vec![0.4, 0.5, 0.6]);
    }

    #[tokio::test]
    async fn test_health_check_unreachable() {
        let client = OllamaClient::new("http://127.0.0.1:9");
        assert!(!client.health_check().await);
    }
}
