//! Currency exchange rates from exchangerate-api.com.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use super::{arg_string, get_json, Tool, ToolSpec};

pub struct ExchangeRateClient {
    http: Client,
    url: String,
}

impl ExchangeRateClient {
    /// `url` is the base the currency code is appended to.
    pub fn new(url: &str) -> Self {
        Self {
            http: Client::new(),
            url: url.to_string(),
        }
    }

    /// Rates keyed by currency code relative to `from_currency`; `{}` on failure.
    pub async fn rates(&self, from_currency: &str) -> anyhow::Result<Value> {
        let url = format!("{}{}", self.url, from_currency.to_uppercase());
        let body = get_json(self.http.get(url), "exchange rate API").await?;
        Ok(body
            .get("rates")
            .cloned()
            .unwrap_or_else(|| json!({})))
    }

    pub async fn convert(&self, amount: f64, from_currency: &str, to_currency: &str) -> anyhow::Result<f64> {
        let rates = self.rates(from_currency).await?;
        let to = to_currency.to_uppercase();
        let rate = rates
            .get(&to)
            .and_then(Value::as_f64)
            .ok_or_else(|| anyhow::anyhow!("Currency {} not supported.", to))?;
        Ok(amount * rate)
    }
}

struct GetExchangeRates {
    client: Arc<ExchangeRateClient>,
}

#[async_trait]
impl Tool for GetExchangeRates {
    fn name(&self) -> &str {
        "get_exchange_rates"
    }

    fn description(&self) -> &str {
        "Get exchange rates for a given currency."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "from_currency": {
                    "type": "string",
                    "description": "ISO currency code (default: USD)"
                }
            }
        })
    }

    async fn execute(&self, args: Value) -> anyhow::Result<String> {
        let from = arg_string(&args, "from_currency", "USD");
        let rates = self.client.rates(&from).await?;
        Ok(rates.to_string())
    }
}

struct Convert {
    client: Arc<ExchangeRateClient>,
}

#[async_trait]
impl Tool for Convert {
    fn name(&self) -> &str {
        "convert"
    }

    fn description(&self) -> &str {
        "Convert an amount from one currency to another."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "amount": {"type": "number", "description": "Amount to convert"},
                "from_currency": {"type": "string", "description": "Source currency (default: USD)"},
                "to_currency": {"type": "string", "description": "Target currency (default: EUR)"}
            },
            "required": ["amount"]
        })
    }

    async fn execute(&self, args: Value) -> anyhow::Result<String> {
        // Models sometimes quote numbers.
        let amount = match &args["amount"] {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
        .ok_or_else(|| anyhow::anyhow!("Missing or invalid 'amount' argument"))?;

        let from = arg_string(&args, "from_currency", "USD");
        let to = arg_string(&args, "to_currency", "EUR");
        let converted = self.client.convert(amount, &from, &to).await?;
        Ok(converted.to_string())
    }
}

pub struct ExchangeRateToolSpec {
    client: Arc<ExchangeRateClient>,
}

impl ExchangeRateToolSpec {
    pub fn new(client: Arc<ExchangeRateClient>) -> Self {
        Self { client }
    }
}

impl ToolSpec for ExchangeRateToolSpec {
    fn to_tool_list(&self) -> Vec<Arc<dyn Tool>> {
        vec![
            Arc::new(GetExchangeRates {
                client: Arc::clone(&self.client),
            }),
            Arc::new(Convert {
                client: Arc::clone(&self.client),
            }),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolRegistry;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn registry(server: &MockServer) -> ToolRegistry {
        Mock::given(method("GET"))
            .and(path("/latest/USD"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "base": "USD",
                "rates": {"USD": 1.0, "EUR": 0.5, "JPY": 150.0}
            })))
            .mount(server)
            .await;
        let client = Arc::new(ExchangeRateClient::new(&format!("{}/latest/", server.uri())));
        ToolRegistry::new().with_spec(&ExchangeRateToolSpec::new(client))
    }

    #[tokio::test]
    async fn test_convert_uses_defaults() {
        let server = MockServer::start().await;
        let tools = registry(&server).await;
        let out = tools.execute("convert", json!({"amount": 100})).await.unwrap();
        assert_eq!(out, "50");

        let out = tools
            .execute("convert", json!({"amount": "2", "to_currency": "jpy"}))
            .await
            .unwrap();
        assert_eq!(out, "300");
    }

    #[tokio::test]
    async fn test_unknown_currency_is_an_error() {
        let server = MockServer::start().await;
        let tools = registry(&server).await;
        let err = tools
            .execute("convert", json!({"amount": 1, "to_currency": "XYZ"}))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Currency XYZ not supported.");
    }

    #[tokio::test]
    async fn test_rates_empty_on_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        let client = ExchangeRateClient::new(&format!("{}/latest/", server.uri()));
        assert_eq!(client.rates("GBP").await.unwrap(), json!({}));
        assert!(client.convert(1.0, "GBP", "EUR").await.is_err());
    }
}
