//! In-process LLM that replays canned responses, for tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{ChatMessage, ChatOptions, ChatResponse, LlmClient, ToolCall, ToolDefinition};

#[derive(Default)]
pub struct ScriptedLlm {
    responses: Mutex<VecDeque<ChatResponse>>,
    pub requests: Mutex<Vec<Vec<ChatMessage>>>,
    pub options: Mutex<Vec<ChatOptions>>,
}

impl ScriptedLlm {
    pub fn new(responses: Vec<ChatResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            ..Default::default()
        }
    }

    pub fn text(content: &str) -> ChatResponse {
        ChatResponse {
            content: Some(content.to_string()),
            finish_reason: Some("stop".to_string()),
            ..Default::default()
        }
    }

    pub fn tool_call(name: &str, arguments: serde_json::Value) -> ChatResponse {
        ChatResponse {
            tool_calls: Some(vec![ToolCall::function(name, arguments.to_string())]),
            finish_reason: Some("tool_calls".to_string()),
            ..Default::default()
        }
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
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
        _model: &str,
        messages: &[ChatMessage],
        _tools: Option<&[ToolDefinition]>,
        options: ChatOptions,
    ) -> anyhow::Result<ChatResponse> {
        self.requests.lock().unwrap().push(messages.to_vec());
        self.options.lock().unwrap().push(options);
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| anyhow::anyhow!("script exhausted"))
    }
}
