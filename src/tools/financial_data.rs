//! Financial news and market data over the RapidAPI investing11 API.
//!
//! Every endpoint has the same shape (GET with a few query parameters,
//! payload under `data`), so the tools are generated from a table.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Map, Value};

use super::{get_json, query_value, rapidapi_host, to_output, Tool, ToolSpec};
use crate::config::RapidApiConfig;

/// One API endpoint exposed as a tool.
#[derive(Debug)]
pub struct FinancialEndpoint {
    pub name: &'static str,
    pub path: &'static str,
    pub description: &'static str,
    /// Parameters the model may set. `None` default means required.
    pub params: &'static [(&'static str, Option<&'static str>)],
    /// Parameters always sent with a fixed value.
    pub fixed: &'static [(&'static str, &'static str)],
}

const SYMBOL: &[(&str, Option<&str>)] = &[("symbol", None)];
const STATEMENT: &[(&str, Option<&str>)] = &[("symbol", None), ("type", Some("annual"))];

pub const FINANCIAL_ENDPOINTS: &[FinancialEndpoint] = &[
    FinancialEndpoint {
        name: "get_news_list",
        path: "get_news",
        description: "Latest financial news. news_type can be: latest, popular, crypto, stock_markets, commodities, currencies, economy, economic_indicators, politics, world.",
        params: &[("news_type", Some("latest"))],
        fixed: &[("page", "1")],
    },
    FinancialEndpoint {
        name: "search_news",
        path: "search_news",
        description: "Search for news by keyword.",
        params: &[("query", None)],
        fixed: &[],
    },
    FinancialEndpoint {
        name: "get_page_content_by_url",
        path: "get_page_content_by_url",
        description: "Get the content of a news page by URL.",
        params: &[("url", None)],
        fixed: &[],
    },
    FinancialEndpoint {
        name: "get_market_data",
        path: "get_market_data",
        description: "Get market data by type and country. data_type can be: indices, stocks, commodities, currencies, crypto, etfs, funds.",
        params: &[("data_type", None), ("country", Some("US"))],
        fixed: &[],
    },
    FinancialEndpoint {
        name: "get_stock_overview",
        path: "get_stock_overview",
        description: "Get the stock overview by symbol, e.g. NVDA or Nvidia.",
        params: SYMBOL,
        fixed: &[],
    },
    FinancialEndpoint {
        name: "get_stock_news",
        path: "get_stock_news",
        description: "Get the stock news by symbol, e.g. NVDA or Nvidia.",
        params: SYMBOL,
        fixed: &[],
    },
    FinancialEndpoint {
        name: "get_stock_analysis",
        path: "get_stock_analysis",
        description: "Get the stock analysis by symbol, e.g. NVDA or Nvidia.",
        params: SYMBOL,
        fixed: &[("page", "1")],
    },
    FinancialEndpoint {
        name: "get_stock_technical_analysis",
        path: "get_stock_technical_analysis",
        description: "Get the stock technical analysis by symbol, e.g. NVDA or Nvidia.",
        params: SYMBOL,
        fixed: &[],
    },
    FinancialEndpoint {
        name: "get_stock_history_price_chart",
        path: "history",
        description: "Get the stock price history by symbol, e.g. NVDA or Nvidia. period can be: 1d, 5d, 1m, 3m, 6m, 1y, 2y, 5y, 10y, ytd, max. interval can be: 1m, 5m, 15m, 30m, 1h, 1d, 5d, 1w, 1mo, 3mo.",
        params: &[("symbol", None), ("period", Some("1d")), ("interval", Some("1m"))],
        fixed: &[],
    },
    FinancialEndpoint {
        name: "get_stock_info",
        path: "info",
        description: "Get the stock information by symbol, e.g. NVDA or Nvidia.",
        params: SYMBOL,
        fixed: &[],
    },
    FinancialEndpoint {
        name: "get_stock_dividends",
        path: "dividends",
        description: "Get the stock dividends by symbol, e.g. NVDA or Nvidia.",
        params: SYMBOL,
        fixed: &[],
    },
    FinancialEndpoint {
        name: "get_stock_splits",
        path: "splits",
        description: "Get the stock splits by symbol, e.g. NVDA or Nvidia.",
        params: SYMBOL,
        fixed: &[],
    },
    FinancialEndpoint {
        name: "get_stock_earnings",
        path: "get_stock_earnings",
        description: "Get the stock earnings by symbol, e.g. NVDA or Nvidia.",
        params: SYMBOL,
        fixed: &[],
    },
    FinancialEndpoint {
        name: "get_eps_trend",
        path: "eps_trend",
        description: "Get the stock earnings per share trend, e.g. NVDA or Nvidia.",
        params: SYMBOL,
        fixed: &[],
    },
    FinancialEndpoint {
        name: "get_earnings_dates",
        path: "earnings_dates",
        description: "Get the stock earnings dates, e.g. NVDA or Nvidia.",
        params: SYMBOL,
        fixed: &[],
    },
    FinancialEndpoint {
        name: "get_earnings_estimate",
        path: "earnings_estimate",
        description: "Get the stock earnings estimate, e.g. NVDA or Nvidia.",
        params: SYMBOL,
        fixed: &[],
    },
    FinancialEndpoint {
        name: "get_growth_estimate",
        path: "growth_estimate",
        description: "Get the stock growth estimate, e.g. NVDA or Nvidia.",
        params: SYMBOL,
        fixed: &[],
    },
    FinancialEndpoint {
        name: "get_analyst_price_targets",
        path: "analyst_price_targets",
        description: "Get the stock analyst price targets, e.g. NVDA or Nvidia.",
        params: SYMBOL,
        fixed: &[],
    },
    FinancialEndpoint {
        name: "get_income_statement",
        path: "income_statement",
        description: "Get the stock income statement, e.g. NVDA or Nvidia. type can be: annual, quarterly.",
        params: STATEMENT,
        fixed: &[],
    },
    FinancialEndpoint {
        name: "get_cash_flow",
        path: "cash_flow",
        description: "Get the stock cash flow, e.g. NVDA or Nvidia. type can be: annual, quarterly.",
        params: STATEMENT,
        fixed: &[],
    },
    FinancialEndpoint {
        name: "get_balance_sheet",
        path: "balance_sheet",
        description: "Get the stock balance sheet, e.g. NVDA or Nvidia. type can be: annual, quarterly.",
        params: STATEMENT,
        fixed: &[],
    },
    FinancialEndpoint {
        name: "get_supported_countries",
        path: "get_supported_countries",
        description: "Get the list of supported countries.",
        params: &[],
        fixed: &[],
    },
];

impl FinancialEndpoint {
    fn parameters_schema(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for (name, default) in self.params {
            let description = match default {
                Some(d) => format!("Default: {}", d),
                None => "Required".to_string(),
            };
            properties.insert(
                name.to_string(),
                json!({"type": "string", "description": description}),
            );
            if default.is_none() {
                required.push(*name);
            }
        }
        json!({"type": "object", "properties": properties, "required": required})
    }

    fn query(&self, args: &Value) -> anyhow::Result<Vec<(String, String)>> {
        let mut query = Vec::with_capacity(self.params.len() + self.fixed.len());
        for (name, default) in self.params {
            let value = query_value(&args[*name])
                .filter(|v| !v.trim().is_empty())
                .or_else(|| default.map(String::from))
                .ok_or_else(|| anyhow::anyhow!("Missing '{}' argument", name))?;
            query.push((name.to_string(), value));
        }
        for (name, value) in self.fixed {
            query.push((name.to_string(), value.to_string()));
        }
        Ok(query)
    }
}

struct FinancialDataApi {
    http: Client,
    url: String,
    key: Option<String>,
    host: Option<String>,
}

struct FinancialDataTool {
    api: Arc<FinancialDataApi>,
    endpoint: &'static FinancialEndpoint,
}

#[async_trait]
impl Tool for FinancialDataTool {
    fn name(&self) -> &str {
        self.endpoint.name
    }

    fn description(&self) -> &str {
        self.endpoint.description
    }

    fn parameters_schema(&self) -> Value {
        self.endpoint.parameters_schema()
    }

    async fn execute(&self, args: Value) -> anyhow::Result<String> {
        let query = self.endpoint.query(&args)?;
        let mut request = self
            .api
            .http
            .get(format!("{}{}", self.api.url, self.endpoint.path))
            .query(&query);
        if let Some(key) = &self.api.key {
            request = request.header("x-rapidapi-key", key);
        }
        if let Some(host) = &self.api.host {
            request = request.header("x-rapidapi-host", host);
        }

        let body = get_json(request, "financial data API").await?;
        let data = body.get("data").cloned().unwrap_or_else(|| json!({}));
        Ok(to_output(&data))
    }
}

pub struct FinancialDataToolSpec {
    api: Arc<FinancialDataApi>,
}

impl FinancialDataToolSpec {
    pub fn new(config: &RapidApiConfig) -> Self {
        Self {
            api: Arc::new(FinancialDataApi {
                http: Client::new(),
                url: config.financial_data_url.clone(),
                key: config.key.clone(),
                host: rapidapi_host(config.host.as_deref(), &config.financial_data_url),
            }),
        }
    }
}

impl ToolSpec for FinancialDataToolSpec {
    fn to_tool_list(&self) -> Vec<Arc<dyn Tool>> {
        FINANCIAL_ENDPOINTS
            .iter()
            .map(|endpoint| {
                Arc::new(FinancialDataTool {
                    api: Arc::clone(&self.api),
                    endpoint,
                }) as Arc<dyn Tool>
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolRegistry;
    use std::collections::HashSet;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn registry(server: &MockServer) -> ToolRegistry {
        let config = RapidApiConfig {
            key: Some("k".to_string()),
            host: Some("investing11.p.rapidapi.com".to_string()),
            flights_url: String::new(),
            financial_data_url: format!("{}/", server.uri()),
        };
        ToolRegistry::new().with_spec(&FinancialDataToolSpec::new(&config))
    }

    #[test]
    fn test_table_has_unique_names() {
        let names: HashSet<_> = FINANCIAL_ENDPOINTS.iter().map(|e| e.name).collect();
        assert_eq!(names.len(), 22);
        assert_eq!(FINANCIAL_ENDPOINTS.len(), 22);
    }

    #[tokio::test]
    async fn test_history_uses_defaults_and_unwraps_data() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/history"))
            .and(query_param("symbol", "NVDA"))
            .and(query_param("period", "1d"))
            .and(query_param("interval", "1m"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"status": "ok", "data": {"close": [1, 2]}})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let out = registry(&server)
            .execute("get_stock_history_price_chart", json!({"symbol": "NVDA"}))
            .await
            .unwrap();
        assert_eq!(out, r#"{"close":[1,2]}"#);
    }

    #[tokio::test]
    async fn test_news_sends_fixed_page() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/get_news"))
            .and(query_param("news_type", "crypto"))
            .and(query_param("page", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
            .expect(1)
            .mount(&server)
            .await;

        let out = registry(&server)
            .execute("get_news_list", json!({"news_type": "crypto"}))
            .await
            .unwrap();
        assert_eq!(out, "[]");
    }

    #[tokio::test]
    async fn test_missing_symbol_and_failures() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;
        let tools = registry(&server);

        let err = tools.execute("get_stock_info", json!({})).await.unwrap_err();
        assert_eq!(err.to_string(), "Missing 'symbol' argument");

        let out = tools
            .execute("get_balance_sheet", json!({"symbol": "AAPL"}))
            .await
            .unwrap();
        assert_eq!(out, "{}");
    }
}
