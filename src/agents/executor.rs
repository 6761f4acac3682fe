//! The tool-calling agent loop.

use crate::context::ConversationContext;
use crate::llm::{ChatMessage, ChatModel, ToolCall};
use crate::tools::ToolRegistry;

use super::prompts::with_tool_list;
use super::{AgentError, AgentOutcome, ToolInvocation};

/// What an agent is: a persona and the tools it may use.
pub struct AgentSpec {
    pub name: String,
    pub description: String,
    pub system_prompt: String,
    pub tools: ToolRegistry,
}

/// A model paired with an agent spec.
///
/// # Algorithm
/// 1. System prompt (with tool list), prior conversation, user question
/// 2. Call the LLM with the tool schemas
/// 3. If the LLM requests tool calls: execute each, feed back the results
/// 4. Repeat until the LLM answers in plain text or max iterations
pub struct Agent {
    spec: AgentSpec,
    chat: ChatModel,
    max_iterations: usize,
}

impl Agent {
    pub fn new(spec: AgentSpec, chat: ChatModel, max_iterations: usize) -> Self {
        Self {
            spec,
            chat,
            max_iterations: max_iterations.max(1),
        }
    }

    pub fn spec(&self) -> &AgentSpec {
        &self.spec
    }

    pub fn model(&self) -> &str {
        &self.chat.model
    }

    /// Execute a single tool call. Failures become the tool's output so the
    /// model can react to them.
    async fn execute_tool_call(&self, tool_call: &ToolCall) -> (String, bool) {
        let args = tool_call.parsed_arguments();
        match self.spec.tools.execute(&tool_call.function.name, args).await {
            Ok(output) => (output, true),
            Err(e) => {
                tracing::warn!("Tool '{}' failed: {}", tool_call.function.name, e);
                (format!("Error: {}", e), false)
            }
        }
    }

    /// Answer `question`, continuing the conversation in `context`.
    ///
    /// On success the question and answer are appended to the context; on
    /// failure the context is left untouched.
    pub async fn run(
        &self,
        question: &str,
        context: &mut ConversationContext,
    ) -> Result<AgentOutcome, AgentError> {
        let mut tool_log = Vec::new();

        let system_prompt = with_tool_list(&self.spec.system_prompt, &self.spec.tools);
        let mut messages = Vec::with_capacity(context.messages.len() + 2);
        messages.push(ChatMessage::system(system_prompt));
        messages.extend(context.messages.iter().cloned());
        messages.push(ChatMessage::user(question));

        let tool_schemas = self.spec.tools.get_tool_schemas();
        let tools = (!tool_schemas.is_empty()).then_some(tool_schemas.as_slice());

        tracing::info!(
            "Agent '{}' answering with {} ({} tools, {} prior messages)",
            self.spec.name,
            self.chat.model,
            tool_schemas.len(),
            context.messages.len()
        );

        for iteration in 0..self.max_iterations {
            tracing::debug!("Agent '{}' iteration {}", self.spec.name, iteration + 1);

            let response = self
                .chat
                .client
                .chat_completion(&self.chat.model, &messages, tools)
                .await
                .map_err(|e| AgentError::LlmError(e.to_string()))?;

            if let Some(tool_calls) = response.tool_calls.filter(|t| !t.is_empty()) {
                messages.push(ChatMessage::assistant_tool_calls(
                    response.content.clone(),
                    tool_calls.clone(),
                ));

                for tool_call in &tool_calls {
                    tracing::info!(
                        "Tool: {} Args: {}",
                        tool_call.function.name,
                        tool_call.function.arguments
                    );
                    let (result, success) = self.execute_tool_call(tool_call).await;
                    tool_log.push(ToolInvocation {
                        tool: tool_call.function.name.clone(),
                        arguments: tool_call.function.arguments.clone(),
                        success,
                    });
                    messages.push(ChatMessage::tool_result(tool_call, result));
                }
                continue;
            }

            let answer = response
                .content
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty())
                .ok_or(AgentError::EmptyResponse)?;

            context.record_exchange(question, &answer);
            return Ok(AgentOutcome {
                answer,
                tool_log,
                iterations: iteration + 1,
                model: self.chat.model.clone(),
            });
        }

        tracing::warn!(
            "Agent '{}' gave up after {} iterations",
            self.spec.name,
            self.max_iterations
        );
        Err(AgentError::MaxIterations(self.max_iterations))
    }
}
