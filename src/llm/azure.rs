//! Azure OpenAI client implementation with automatic retry for transient errors.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::error::{parse_retry_after, LlmError, RetryConfig};
use super::{
    ChatMessage, ChatOptions, ChatResponse, Embedder, LlmClient, Role, TokenUsage, ToolCall,
    ToolDefinition,
};
use crate::config::AzureConfig;

/// Dimension of `text-embedding-ada-002`.
const ADA_002_DIMENSION: usize = 1536;

/// Azure OpenAI client. The `model` argument of each call names a deployment.
pub struct AzureOpenAiClient {
    client: Client,
    config: AzureConfig,
    retry_config: RetryConfig,
}

impl AzureOpenAiClient {
    /// Create a new client with default retry configuration.
    pub fn new(config: AzureConfig) -> Self {
        Self {
            client: Client::new(),
            config,
            retry_config: RetryConfig::default(),
        }
    }

    /// Create a new client with custom retry configuration.
    pub fn with_retry_config(config: AzureConfig, retry_config: RetryConfig) -> Self {
        Self {
            client: Client::new(),
            config,
            retry_config,
        }
    }

    fn deployment_url(&self, deployment: &str, operation: &str) -> String {
        format!(
            "{}/openai/deployments/{}/{}?api-version={}",
            self.config.endpoint.trim_end_matches('/'),
            deployment,
            operation,
            self.config.api_version
        )
    }

    async fn post_json<B, R>(&self, url: &str, body: &B) -> Result<R, LlmError>
    where
        B: Serialize + ?Sized,
        R: for<'de> Deserialize<'de>,
    {
        let response = self
            .client
            .post(url)
            .header("api-key", &self.config.api_key)
            .header("Content-Type", "application/json")
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
            LlmError::parse_error(format!("Failed to parse Azure response: {}, body: {}", e, text))
        })
    }
}

#[async_trait]
impl LlmClient for AzureOpenAiClient {
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
        let tools = tools.filter(|t| !t.is_empty());
        let request = AzureChatRequest {
            messages: messages.iter().map(AzureMessage::from).collect(),
            tools: tools.map(|t| t.to_vec()),
            tool_choice: tools.map(|_| "auto".to_string()),
            temperature: options.temperature,
            top_p: options.top_p,
            max_tokens: options.max_tokens,
            response_format: options
                .json_mode
                .then(|| serde_json::json!({"type": "json_object"})),
        };

        tracing::debug!("Sending request to Azure OpenAI: deployment={}", model);

        let url = self.deployment_url(model, "chat/completions");
        let parsed: AzureChatResponse = self
            .retry_config
            .run("Azure chat", || self.post_json(&url, &request))
            .await?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::parse_error("No choices in response".to_string()))?;

        Ok(ChatResponse {
            content: choice.message.content,
            tool_calls: choice.message.tool_calls.filter(|t| !t.is_empty()),
            finish_reason: choice.finish_reason,
            usage: parsed
                .usage
                .map(|u| TokenUsage::new(u.prompt_tokens, u.completion_tokens)),
            model: parsed.model.or_else(|| Some(model.to_string())),
        })
    }
}

#[async_trait]
impl Embedder for AzureOpenAiClient {
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

        let url = self.deployment_url(&self.config.embed_deployment, "embeddings");
        let request = AzureEmbeddingRequest {
            input: texts.to_vec(),
        };
        let response: AzureEmbeddingResponse = self
            .retry_config
            .run("Azure embed", || self.post_json(&url, &request))
            .await?;

        let mut data = response.data;
        data.sort_by_key(|d| d.index);
        Ok(data.into_iter().map(|d| d.embedding).collect())
    }

    fn dimension(&self) -> usize {
        ADA_002_DIMENSION
    }
}

#[derive(Debug, Serialize)]
struct AzureChatRequest {
    messages: Vec<AzureMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ToolDefinition>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<serde_json::Value>,
}

/// OpenAI-format message; tool results are matched by `tool_call_id`, not name.
#[derive(Debug, Serialize)]
struct AzureMessage {
    role: Role,
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl From<&ChatMessage> for AzureMessage {
    fn from(msg: &ChatMessage) -> Self {
        Self {
            role: msg.role.clone(),
            content: msg.content.clone(),
            tool_calls: msg.tool_calls.clone(),
            tool_call_id: msg.tool_call_id.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct AzureChatResponse {
    choices: Vec<AzureChoice>,
    #[serde(default)]
    usage: Option<AzureUsage>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AzureChoice {
    message: AzureResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AzureResponseMessage {
    content: Option<String>,
    tool_calls: Option<Vec<ToolCall>>,
}

#[derive(Debug, Deserialize)]
struct AzureUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

#[derive(Debug, Serialize)]
struct AzureEmbeddingRequest {
    input: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct AzureEmbeddingResponse {
    data: Vec<AzureEmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct AzureEmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn azure_config(endpoint: String) -> AzureConfig {
        AzureConfig {
            api_key: "secret".to_string(),
            endpoint,
            api_version: "2024-05-01-preview".to_string(),
            chat_deployment: "gpt-4o-mini".to_string(),
            embed_deployment: "text-embedding-ada-002".to_string(),
        }
    }

    #[tokio::test]
    async fn test_chat_completion_hits_deployment() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/openai/deployments/gpt-4o-mini/chat/completions"))
            .and(query_param("api-version", "2024-05-01-preview"))
            .and(header("api-key", "secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "model": "gpt-4o-mini",
                "choices": [{
                    "message": {"role": "assistant", "content": "Hello, sir."},
                    "finish_reason": "stop"
                }],
                "usage": {"prompt_tokens": 3, "completion_tokens": 4, "total_tokens": 7}
            })))
            .mount(&server)
            .await;

        let client = AzureOpenAiClient::with_retry_config(
            azure_config(server.uri()),
            RetryConfig::disabled(),
        );
        let response = client
            .chat_completion("gpt-4o-mini", &[ChatMessage::user("hi")], None)
            .await
            .unwrap();
        assert_eq!(response.content.as_deref(), Some("Hello, sir."));
        assert_eq!(response.usage.unwrap().total_tokens, 7);
    }

    #[tokio::test]
    async fn test_embeddings_sorted_by_index() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/openai/deployments/text-embedding-ada-002/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [
                    {"embedding": [2.0], "index": 1},
                    {"embedding": [1.0], "index": 0}
                ]
            })))
            .mount(&server)
            .await;

        let client = AzureOpenAiClient::with_retry_config(
            azure_config(server.uri()),
            RetryConfig::disabled(),
        );
        let embeddings = client
            .embed_batch(&["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert_eq!(embeddings, vec![vec![1.0], vec![2.0]]);
    }
}
