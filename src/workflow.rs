//! Trader workflow: plan, route and fetch market data for a question.
//!
//! 1. The model decomposes the question into steps (JSON).
//! 2. Steps without dependencies are dispatched concurrently.
//! 3. Each step's action is routed to the nearest catalog function.
//! 4. The model fills in the function's required parameters and the
//!    function is called on Alpha Vantage.
//!
//! The whole run is bounded by a single timeout.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::llm::{ChatMessage, ChatModel, ChatOptions};
use crate::routing::{FunctionRouter, RoutedFunction};
use crate::tools::AlphaVantageClient;

pub const WORKFLOW_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("Could not plan the question: {0}")]
    Plan(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Workflow timed out after {0:?}")]
    Timeout(Duration),
}

/// One planned step. Models are loose with types, so `id` and
/// `depends_on` are kept as raw JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStep {
    #[serde(default)]
    pub id: Value,
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub depends_on: Value,
}

impl PlanStep {
    pub fn id_string(&self) -> String {
        match &self.id {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }

    /// `null`, a missing field, an empty list or an empty string all mean
    /// the step can run right away.
    pub fn is_independent(&self) -> bool {
        match &self.depends_on {
            Value::Null => true,
            Value::Array(items) => items.is_empty(),
            Value::String(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    fn query(&self) -> &str {
        if self.action.trim().is_empty() {
            &self.description
        } else {
            &self.action
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub steps: Vec<PlanStep>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StepResult {
    pub step: PlanStep,
    pub function: Option<String>,
    pub parameters: Map<String, Value>,
    pub data: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkflowOutcome {
    pub question: String,
    pub plan: Vec<PlanStep>,
    pub results: Vec<StepResult>,
    /// Ids of steps that waited on another step and were not run.
    pub skipped: Vec<String>,
}

pub struct TraderWorkflow {
    chat: ChatModel,
    router: Arc<FunctionRouter>,
    alpha_vantage: Arc<AlphaVantageClient>,
    timeout: Duration,
}

impl TraderWorkflow {
    pub fn new(
        chat: ChatModel,
        router: Arc<FunctionRouter>,
        alpha_vantage: Arc<AlphaVantageClient>,
    ) -> Self {
        Self {
            chat,
            router,
            alpha_vantage,
            timeout: WORKFLOW_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn run(&self, question: &str) -> Result<WorkflowOutcome, WorkflowError> {
        tokio::time::timeout(self.timeout, self.run_inner(question))
            .await
            .map_err(|_| WorkflowError::Timeout(self.timeout))?
    }

    async fn run_inner(&self, question: &str) -> Result<WorkflowOutcome, WorkflowError> {
        let plan = self.plan(question).await?;
        tracing::info!("Planned {} steps for '{}'", plan.steps.len(), question);

        let (ready, waiting): (Vec<&PlanStep>, Vec<&PlanStep>) =
            plan.steps.iter().partition(|s| s.is_independent());

        let results = join_all(ready.into_iter().map(|step| self.run_step(question, step))).await;
        let skipped = waiting.iter().map(|s| s.id_string()).collect();

        Ok(WorkflowOutcome {
            question: question.to_string(),
            plan: plan.steps.clone(),
            results,
            skipped,
        })
    }

    /// Ask the model to break the question into steps.
    pub async fn plan(&self, question: &str) -> Result<Plan, WorkflowError> {
        let prompt = format!(
            r#"You are a professional trading broker.
You have been asked the following question.

<question>
{question}
</question>

Reply with the list of steps to take to answer the question. State when a step depends on another.
Return a JSON object containing only the list, in the form {{"steps": [{{"id": 1, "action": "", "description": "", "depends_on": null}}]}}.
Use null for depends_on when the step depends on nothing. Return JSON ONLY, no markdown."#
        );
        let raw = self.complete_json(&prompt).await?;
        parse_plan(&raw)
    }

    async fn complete_json(&self, prompt: &str) -> Result<String, WorkflowError> {
        let response = self
            .chat
            .client
            .chat_completion_with_options(
                &self.chat.model,
                &[ChatMessage::user(prompt)],
                None,
                ChatOptions {
                    json_mode: true,
                    temperature: Some(0.0),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| WorkflowError::Llm(e.to_string()))?;
        response
            .content
            .ok_or_else(|| WorkflowError::Llm("empty completion".to_string()))
    }

    async fn run_step(&self, question: &str, step: &PlanStep) -> StepResult {
        tracing::info!("Running step {}: {}", step.id_string(), step.query());
        let mut result = StepResult {
            step: step.clone(),
            function: None,
            parameters: Map::new(),
            data: Value::Null,
            error: None,
        };

        let routed = match self.router.best(step.query()).await {
            Ok(routed) => routed,
            Err(e) => {
                result.error = Some(e.to_string());
                return result;
            }
        };
        result.function = Some(routed.function.clone());

        let required = self
            .router
            .catalog()
            .get(&routed.function)
            .map(|e| e.required_parameters())
            .unwrap_or_default();
        if !required.is_empty() {
            match self.fill_parameters(question, step, &routed, &required).await {
                Ok(parameters) => result.parameters = parameters,
                Err(e) => {
                    result.error = Some(e.to_string());
                    return result;
                }
            }
        }

        match self
            .alpha_vantage
            .execute(&routed.function, &result.parameters)
            .await
        {
            Ok(data) => result.data = data,
            Err(e) => result.error = Some(e.to_string()),
        }
        result
    }

    async fn fill_parameters(
        &self,
        question: &str,
        step: &PlanStep,
        routed: &RoutedFunction,
        required: &[String],
    ) -> Result<Map<String, Value>, WorkflowError> {
        let prompt = format!(
            r#"Fill in the parameters to call the function {function}.

Question: {question}
Step: {action}. {description}

Function documentation: {documentation}
Parameters: {parameters}

The required parameters are: {required}. Do not include apikey or function.
Return a JSON object mapping parameter names to values. Return JSON ONLY, no markdown."#,
            function = routed.function,
            action = step.action,
            description = step.description,
            documentation = routed.documentation,
            parameters = routed.parameters,
            required = required.join(", "),
        );
        let raw = self.complete_json(&prompt).await?;
        let json = extract_json_object(&raw)
            .ok_or_else(|| WorkflowError::Plan(format!("no parameters in: {}", raw)))?;
        match serde_json::from_str::<Value>(json) {
            Ok(Value::Object(map)) => Ok(map),
            _ => Err(WorkflowError::Plan(format!("invalid parameters: {}", raw))),
        }
    }
}

/// Locate the JSON object in a model reply, tolerating code fences and
/// chatter around it.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

pub fn parse_plan(raw: &str) -> Result<Plan, WorkflowError> {
    let json = extract_json_object(raw)
        .ok_or_else(|| WorkflowError::Plan(format!("no JSON object in: {}", raw)))?;
    serde_json::from_str::<Plan>(json).map_err(|e| WorkflowError::Plan(format!("{}: {}", e, raw)))
}
