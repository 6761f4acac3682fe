//! Alpha Vantage market data tools.
//!
//! The catalog holds dozens of API functions, too many to expose as tools
//! directly. The model first asks `get_relevant_functions` which function
//! fits, then calls `execute_function` with the parameters it chose.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Map, Value};

use super::{get_json, query_value, to_output, Tool, ToolSpec};
use crate::routing::FunctionRouter;

/// GET access to the Alpha Vantage query endpoint. The API key is injected
/// into every request, the model never sees it.
pub struct AlphaVantageClient {
    http: Client,
    url: String,
    api_key: Option<String>,
}

impl AlphaVantageClient {
    pub fn new(url: &str, api_key: Option<String>) -> Self {
        if api_key.is_none() {
            tracing::warn!("ALPHA_VANTAGE_KEY is not set; Alpha Vantage calls will be rejected");
        }
        Self {
            http: Client::new(),
            url: url.to_string(),
            api_key,
        }
    }

    /// Call `function` with `parameters`. Non-200 replies yield `{}`.
    pub async fn execute(&self, function: &str, parameters: &Map<String, Value>) -> anyhow::Result<Value> {
        let mut query: Vec<(String, String)> = parameters
            .iter()
            .filter(|(k, _)| k.as_str() != "apikey" && k.as_str() != "function")
            .filter_map(|(k, v)| query_value(v).map(|v| (k.clone(), v)))
            .collect();
        query.push(("function".to_string(), function.to_string()));
        if let Some(key) = &self.api_key {
            query.push(("apikey".to_string(), key.clone()));
        }

        tracing::info!(
            "Executing Alpha Vantage function {} with {} parameters",
            function,
            parameters.len()
        );
        get_json(self.http.get(&self.url).query(&query), "Alpha Vantage").await
    }
}

/// Parameters may arrive as an object or, from weaker models, as a JSON string.
fn parameters_object(value: &Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map.clone(),
        Value::String(s) => match serde_json::from_str::<Value>(s) {
            Ok(Value::Object(map)) => map,
            _ => {
                tracing::warn!("Ignoring non-object parameters: {}", s);
                Map::new()
            }
        },
        _ => Map::new(),
    }
}

/// Finds the catalog function matching a natural-language request.
pub struct GetRelevantFunctions {
    router: Arc<FunctionRouter>,
}

impl GetRelevantFunctions {
    pub fn new(router: Arc<FunctionRouter>) -> Self {
        Self { router }
    }
}

#[async_trait]
impl Tool for GetRelevantFunctions {
    fn name(&self) -> &str {
        "get_relevant_functions"
    }

    fn description(&self) -> &str {
        "Retrieve the Alpha Vantage function most relevant to a query, with its description and parameters. Use the result as input for execute_function."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "What data is needed, e.g. 'daily prices of IBM'"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, args: Value) -> anyhow::Result<String> {
        let query = args["query"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("Missing 'query' argument"))?;
        tracing::info!("Retrieving relevant functions for query: {}", query);
        let best = self.router.best(query).await?;
        Ok(serde_json::to_string(&best)?)
    }
}

/// Calls an Alpha Vantage function.
pub struct ExecuteFunction {
    client: Arc<AlphaVantageClient>,
}

impl ExecuteFunction {
    pub fn new(client: Arc<AlphaVantageClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Tool for ExecuteFunction {
    fn name(&self) -> &str {
        "execute_function"
    }

    fn description(&self) -> &str {
        "Retrieve data from the Alpha Vantage server. Pass the function name returned by get_relevant_functions and its parameters as a key-value object. The apikey is added automatically."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "function": {
                    "type": "string",
                    "description": "Alpha Vantage function name, e.g. TIME_SERIES_DAILY"
                },
                "parameters": {
                    "type": "object",
                    "description": "Function parameters, e.g. {\"symbol\": \"IBM\"}"
                }
            },
            "required": ["function"]
        })
    }

    async fn execute(&self, args: Value) -> anyhow::Result<String> {
        let function = args["function"]
            .as_str()
            .filter(|f| !f.trim().is_empty())
            .ok_or_else(|| anyhow::anyhow!("Missing 'function' argument"))?;
        let parameters = parameters_object(&args["parameters"]);
        let data = self.client.execute(function, &parameters).await?;
        Ok(to_output(&data))
    }
}

pub struct AlphaVantageToolSpec {
    client: Arc<AlphaVantageClient>,
    router: Arc<FunctionRouter>,
}

impl AlphaVantageToolSpec {
    pub fn new(client: Arc<AlphaVantageClient>, router: Arc<FunctionRouter>) -> Self {
        Self { client, router }
    }
}

impl ToolSpec for AlphaVantageToolSpec {
    fn to_tool_list(&self) -> Vec<Arc<dyn Tool>> {
        vec![
            Arc::new(GetRelevantFunctions::new(Arc::clone(&self.router))),
            Arc::new(ExecuteFunction::new(Arc::clone(&self.client))),
        ]
    }
}
