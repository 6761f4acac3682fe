//! API request and response types.

use serde::{Deserialize, Serialize};

use crate::agents::ToolInvocation;

/// Request to the chat endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    pub message: String,

    /// Optional model override (uses the configured model if not specified)
    pub model: Option<String>,

    /// Agent to talk to, `alfred` by default
    pub agent: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatResponse {
    pub answer: String,
    pub agent: String,
    pub model: String,
    pub tools_used: Vec<ToolInvocation>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub model: String,
    pub max_iterations: usize,
}

/// A tool as listed by `/api/tools`.
#[derive(Debug, Clone, Serialize)]
pub struct AgentTools {
    pub agent: String,
    pub description: String,
    pub tools: Vec<crate::tools::ToolInfo>,
}

// OpenAI-compatible surface, enough for chat front-ends that speak it.

#[derive(Debug, Clone, Deserialize)]
pub struct CompletionMessage {
    pub role: String,
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompletionRequest {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub messages: Vec<CompletionMessage>,
    #[serde(default)]
    pub stream: bool,
}

impl CompletionRequest {
    /// The most recent non-empty user message.
    pub fn last_user_message(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .filter(|m| m.role == "user")
            .filter_map(|m| m.content.as_deref())
            .find(|c| !c.trim().is_empty())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CompletionResponse {
    pub id: String,
    pub object: &'static str,
    pub created: i64,
    pub model: String,
    pub choices: Vec<CompletionChoice>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompletionChoice {
    pub index: u32,
    pub message: AssistantMessage,
    pub finish_reason: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct AssistantMessage {
    pub role: &'static str,
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelList {
    pub object: &'static str,
    pub data: Vec<ModelCard>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelCard {
    pub id: String,
    pub object: &'static str,
    pub created: i64,
    pub owned_by: &'static str,
}
