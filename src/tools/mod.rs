//! Tool system for the agents.
//!
//! Tools are the agent's reach into the outside world: market data, currency
//! rates, flight search, the e-mail index and a Python interpreter running in Docker.
//! Most are thin wrappers over a REST API.
//!
//! Tools come in groups (`ToolSpec`) that mirror how an agent is equipped:
//! the broker gets the Alpha Vantage and exchange-rate groups, the travel
//! assistant gets flights and exchange rates, and so on.

mod alpha_vantage;
mod code_interpreter;
mod date_time;
mod email;
mod exchange_rate;
mod financial_data;
mod flights;

pub use alpha_vantage::{AlphaVantageClient, AlphaVantageToolSpec, ExecuteFunction, GetRelevantFunctions};
pub use code_interpreter::{CodeInterpreter, CodeInterpreterToolSpec};
pub use date_time::{current_date_and_time, CurrentDateTime, DateTimeToolSpec};
pub use email::{EmailReader, EmailReaderToolSpec};
pub use exchange_rate::{ExchangeRateClient, ExchangeRateToolSpec};
pub use financial_data::{FinancialDataToolSpec, FinancialEndpoint, FINANCIAL_ENDPOINTS};
pub use flights::FlightsToolSpec;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::llm::{FunctionDefinition, ToolDefinition};

/// Information about a tool for display purposes.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
}

/// Trait for implementing tools.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool.
    fn name(&self) -> &str;

    /// A description of what this tool does.
    fn description(&self) -> &str;

    /// JSON schema for the tool's parameters.
    fn parameters_schema(&self) -> Value;

    /// Execute the tool with the given arguments.
    async fn execute(&self, args: Value) -> anyhow::Result<String>;
}

/// A group of related tools handed to an agent together.
pub trait ToolSpec {
    fn to_tool_list(&self) -> Vec<Arc<dyn Tool>>;
}

/// Registry of available tools.
///
/// Ordered by name so schema lists are stable between runs.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tool, replacing any tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_some() {
            tracing::warn!("Tool '{}' registered twice, keeping the last", name);
        }
    }

    /// Add every tool of a group.
    pub fn with_spec(mut self, spec: &dyn ToolSpec) -> Self {
        for tool in spec.to_tool_list() {
            self.register(tool);
        }
        self
    }

    /// List all available tools.
    pub fn list_tools(&self) -> Vec<ToolInfo> {
        self.tools
            .values()
            .map(|t| ToolInfo {
                name: t.name().to_string(),
                description: t.description().to_string(),
            })
            .collect()
    }

    /// Check if a tool exists by name.
    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Get tool schemas in LLM-compatible format.
    pub fn get_tool_schemas(&self) -> Vec<ToolDefinition> {
        self.tools
            .values()
            .map(|t| ToolDefinition {
                tool_type: "function".to_string(),
                function: FunctionDefinition {
                    name: t.name().to_string(),
                    description: t.description().to_string(),
                    parameters: t.parameters_schema(),
                },
            })
            .collect()
    }

    /// Execute a tool by name.
    pub async fn execute(&self, name: &str, args: Value) -> anyhow::Result<String> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| anyhow::anyhow!("Unknown tool: {}", name))?;

        tool.execute(args).await
    }
}

// ============================================================================
// Argument and HTTP helpers shared by the tool groups
// ============================================================================

/// Read an argument as a string, accepting numbers and booleans.
/// Missing or null arguments take the default.
pub(crate) fn arg_string(args: &Value, key: &str, default: &str) -> String {
    query_value(&args[key]).unwrap_or_else(|| default.to_string())
}

/// Render a JSON value as a query-string value. `null` means "omit".
pub(crate) fn query_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => Some(
            items
                .iter()
                .filter_map(query_value)
                .collect::<Vec<_>>()
                .join(","),
        ),
        other => Some(other.to_string()),
    }
}

/// Send a GET and return its JSON body.
///
/// Upstream APIs signal failure with a non-200 status; that is logged and
/// returned as an empty object so the agent can carry on.
pub(crate) async fn get_json(request: reqwest::RequestBuilder, label: &str) -> anyhow::Result<Value> {
    let response = request.send().await?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        tracing::error!(
            "Failed to retrieve data from {}. Status code: {} {}",
            label,
            status.as_u16(),
            body.chars().take(200).collect::<String>()
        );
        return Ok(Value::Object(Default::default()));
    }
    Ok(response.json().await?)
}

/// The `x-rapidapi-host` header: the configured override, else the host
/// part of the API URL.
pub(crate) fn rapidapi_host(configured: Option<&str>, api_url: &str) -> Option<String> {
    configured
        .map(str::to_string)
        .or_else(|| url::Url::parse(api_url).ok()?.host_str().map(str::to_string))
}

/// Serialize a tool result for the model.
pub(crate) fn to_output(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_rapidapi_host_from_url() {
        assert_eq!(
            rapidapi_host(None, "https://investing11.p.rapidapi.com/").as_deref(),
            Some("investing11.p.rapidapi.com")
        );
        assert_eq!(
            rapidapi_host(Some("custom.host"), "https://investing11.p.rapidapi.com/").as_deref(),
            Some("custom.host")
        );
        assert_eq!(rapidapi_host(None, "not a url"), None);
    }

    struct Echo;

    #[async_trait]
    impl Tool for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echo the input"
        }

        fn parameters_schema(&self) -> Value {
            json!({"type": "object", "properties": {"text": {"type": "string"}}})
        }

        async fn execute(&self, args: Value) -> anyhow::Result<String> {
            Ok(arg_string(&args, "text", ""))
        }
    }

    struct EchoSpec;

    impl ToolSpec for EchoSpec {
        fn to_tool_list(&self) -> Vec<Arc<dyn Tool>> {
            vec![Arc::new(Echo)]
        }
    }

    #[tokio::test]
    async fn test_registry_executes_by_name() {
        let registry = ToolRegistry::new().with_spec(&EchoSpec);
        assert!(registry.has_tool("echo"));
        assert_eq!(
            registry.execute("echo", json!({"text": "hi"})).await.unwrap(),
            "hi"
        );

        let err = registry.execute("missing", json!({})).await.unwrap_err();
        assert_eq!(err.to_string(), "Unknown tool: missing");
    }

    #[test]
    fn test_schemas_are_function_tools() {
        let registry = ToolRegistry::new().with_spec(&EchoSpec);
        let schemas = registry.get_tool_schemas();
        assert_eq!(schemas.len(), 1);
        assert_eq!(schemas[0].tool_type, "function");
        assert_eq!(schemas[0].function.name, "echo");
    }

    #[test]
    fn test_query_value_rendering() {
        assert_eq!(query_value(&json!(null)), None);
        assert_eq!(query_value(&json!("IBM")).as_deref(), Some("IBM"));
        assert_eq!(query_value(&json!(2)).as_deref(), Some("2"));
        assert_eq!(query_value(&json!(false)).as_deref(), Some("false"));
        assert_eq!(
            query_value(&json!([-32753, -32695])).as_deref(),
            Some("-32753,-32695")
        );
        assert_eq!(arg_string(&json!({}), "adults", "2"), "2");
    }
}
