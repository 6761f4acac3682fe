//! LLM client module for interacting with language models.
//!
//! This module provides a trait-based abstraction over chat and embedding
//! providers, with Ollama as the primary implementation and Azure OpenAI as
//! the hosted alternative.

mod azure;
mod error;
mod ollama;
#[cfg(test)]
pub(crate) mod scripted;

pub use azure::AzureOpenAiClient;
pub use error::{classify_http_status, LlmError, LlmErrorKind, RetryConfig};
pub use ollama::OllamaClient;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::{Config, Provider};

/// Role in a chat conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A message in a chat conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Tool name for `Role::Tool` messages (Ollama matches results by name).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ChatMessage {
    /// Create a simple text message.
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        ChatMessage {
            role,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
            name: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Assistant turn that requested tool calls.
    pub fn assistant_tool_calls(content: Option<String>, tool_calls: Vec<ToolCall>) -> Self {
        ChatMessage {
            role: Role::Assistant,
            content,
            tool_calls: Some(tool_calls),
            tool_call_id: None,
            name: None,
        }
    }

    /// Result of a tool call, linked back to the call that produced it.
    pub fn tool_result(call: &ToolCall, output: impl Into<String>) -> Self {
        ChatMessage {
            role: Role::Tool,
            content: Some(output.into()),
            tool_calls: None,
            tool_call_id: Some(call.id.clone()),
            name: Some(call.function.name.clone()),
        }
    }

    /// Get the text content of this message.
    pub fn text_content(&self) -> Option<&str> {
        self.content.as_deref()
    }
}

/// A tool call requested by the LLM.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub call_type: String,
    pub function: FunctionCall,
}

impl ToolCall {
    /// Build a function tool call with a fresh id.
    pub fn function(name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: format!("call_{}", &uuid::Uuid::new_v4().simple().to_string()[..12]),
            call_type: "function".to_string(),
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }

    /// Parse the arguments string. Empty or invalid arguments become `{}`.
    pub fn parsed_arguments(&self) -> serde_json::Value {
        if self.function.arguments.trim().is_empty() {
            return serde_json::json!({});
        }
        serde_json::from_str(&self.function.arguments).unwrap_or_else(|e| {
            tracing::warn!(
                "Tool call '{}' has invalid JSON arguments ({}): {}",
                self.function.name,
                e,
                self.function.arguments
            );
            serde_json::json!({})
        })
    }
}

/// Function call details.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FunctionCall {
    pub name: String,
    /// Arguments as a JSON string. May be empty for no-argument functions.
    #[serde(default)]
    pub arguments: String,
}

/// Tool definition for the LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    #[serde(rename = "type")]
    pub tool_type: String,
    pub function: FunctionDefinition,
}

/// Function definition with schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Response from a chat completion.
#[derive(Debug, Clone, Default)]
pub struct ChatResponse {
    pub content: Option<String>,
    pub tool_calls: Option<Vec<ToolCall>>,
    pub finish_reason: Option<String>,
    pub usage: Option<TokenUsage>,
    pub model: Option<String>,
}

impl ChatResponse {
    /// Whether the model asked for at least one tool call.
    pub fn has_tool_calls(&self) -> bool {
        self.tool_calls.as_ref().is_some_and(|t| !t.is_empty())
    }
}

/// Token usage information (if provided by the upstream provider).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    /// Create a usage object ensuring `total_tokens` is consistent.
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens.saturating_add(completion_tokens),
        }
    }
}

/// Optional parameters for chat completions.
#[derive(Debug, Clone, Default)]
pub struct ChatOptions {
    /// Sampling temperature (0 = deterministic).
    pub temperature: Option<f64>,
    /// Top-p nucleus sampling.
    pub top_p: Option<f64>,
    /// Maximum output tokens to generate.
    pub max_tokens: Option<u64>,
    /// Ask the provider for a JSON object reply.
    pub json_mode: bool,
}

/// Trait for LLM clients.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Send a chat completion request.
    async fn chat_completion(
        &self,
        model: &str,
        messages: &[ChatMessage],
        tools: Option<&[ToolDefinition]>,
    ) -> anyhow::Result<ChatResponse>;

    /// Send a chat completion request with optional parameters.
    ///
    /// Default implementation ignores options and calls `chat_completion`.
    async fn chat_completion_with_options(
        &self,
        model: &str,
        messages: &[ChatMessage],
        tools: Option<&[ToolDefinition]>,
        _options: ChatOptions,
    ) -> anyhow::Result<ChatResponse> {
        self.chat_completion(model, messages, tools).await
    }

    /// Single-prompt completion returning the text of the reply.
    async fn complete(&self, model: &str, prompt: &str) -> anyhow::Result<String> {
        let response = self
            .chat_completion(model, &[ChatMessage::user(prompt)], None)
            .await?;
        response
            .content
            .ok_or_else(|| anyhow::anyhow!("LLM returned empty completion"))
    }
}

/// Trait for embedding models.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a document for storage.
    async fn embed_text(&self, text: &str) -> anyhow::Result<Vec<f32>>;

    /// Embed a search query. Models without a query instruction reuse `embed_text`.
    async fn embed_query(&self, query: &str) -> anyhow::Result<Vec<f32>> {
        self.embed_text(query).await
    }

    /// Embed several documents, preserving order.
    async fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        let mut embeddings = Vec::with_capacity(texts.len());
        for text in texts {
            embeddings.push(self.embed_text(text).await?);
        }
        Ok(embeddings)
    }

    /// Expected vector dimension.
    fn dimension(&self) -> usize;
}

/// Chat client plus the model name to send with each request.
#[derive(Clone)]
pub struct ChatModel {
    pub client: Arc<dyn LlmClient>,
    pub model: String,
}

/// Build the chat client for the configured provider.
///
/// Embeddings are always served by Ollama, whichever provider handles chat.
pub fn build_chat_model(config: &Config) -> anyhow::Result<ChatModel> {
    match config.provider() {
        Provider::Ollama => Ok(ChatModel {
            client: Arc::new(OllamaClient::new(&config.ollama_url)),
            model: config.model.clone(),
        }),
        Provider::Azure => {
            let azure = config
                .azure
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("Azure OpenAI selected but not configured"))?;
            Ok(ChatModel {
                client: Arc::new(AzureOpenAiClient::new(azure.clone())),
                model: azure.chat_deployment.clone(),
            })
        }
    }
}

/// Build the embedding model (Ollama `bge-m3` by default).
pub fn build_embedder(config: &Config) -> Arc<dyn Embedder> {
    Arc::new(OllamaClient::new(&config.ollama_url).with_embed_model(&config.embed_model))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_result_links_call() {
        let call = ToolCall::function("convert", r#"{"amount": 10}"#);
        let msg = ChatMessage::tool_result(&call, "9.2");
        assert_eq!(msg.role, Role::Tool);
        assert_eq!(msg.tool_call_id.as_deref(), Some(call.id.as_str()));
        assert_eq!(msg.name.as_deref(), Some("convert"));
    }

    #[test]
    fn test_parsed_arguments_tolerates_garbage() {
        let empty = ToolCall::function("airports_information", "");
        assert_eq!(empty.parsed_arguments(), serde_json::json!({}));

        let broken = ToolCall::function("convert", "{amount: 10");
        assert_eq!(broken.parsed_arguments(), serde_json::json!({}));

        let ok = ToolCall::function("convert", r#"{"amount": 10}"#);
        assert_eq!(ok.parsed_arguments()["amount"], 10);
    }

    #[test]
    fn test_message_roundtrip_skips_empty_fields() {
        let json = serde_json::to_value(ChatMessage::user("hello")).unwrap();
        assert_eq!(json, serde_json::json!({"role": "user", "content": "hello"}));
    }

    #[test]
    fn test_build_chat_model_for_ollama() {
        let config = Config::new("mistral", "http://localhost:11434");
        let chat = build_chat_model(&config).unwrap();
        assert_eq!(chat.model, "mistral");
    }
}
