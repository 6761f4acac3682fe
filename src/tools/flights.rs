//! Flight search over the RapidAPI sky-scanner API.
//!
//! Prices are always requested in EUR and sorted cheapest first.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use super::{arg_string, get_json, query_value, rapidapi_host, to_output, Tool, ToolSpec};
use crate::config::RapidApiConfig;

const CABIN_CLASSES: [&str; 4] = ["economy", "premium_economy", "business", "first"];

const SEARCH_NOTES: &str = "cabinClass is exactly one of: economy, premium_economy, business, first. \
stops is one or more of: direct, 1stop, 2stops. \
airlines are carrier ids from a previous search (data.filterStats.carriers.id), comma separated, e.g. -32753,-32695. \
includeOriginNearbyAirports and includeDestinationNearbyAirports are true or false.";

struct FlightsApi {
    http: Client,
    url: String,
    key: Option<String>,
    host: Option<String>,
}

impl FlightsApi {
    async fn get(&self, endpoint: &str, query: &[(String, String)]) -> anyhow::Result<Value> {
        let mut request = self
            .http
            .get(format!("{}{}", self.url, endpoint))
            .query(query);
        if let Some(key) = &self.key {
            request = request.header("x-rapidapi-key", key);
        }
        if let Some(host) = &self.host {
            request = request.header("x-rapidapi-host", host);
        }
        get_json(request, "flight search API").await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlightEndpoint {
    OneWayMonth,
    TwoWayMonth,
    Airports,
    OneWay,
    RoundTrip,
}

impl FlightEndpoint {
    const ALL: [FlightEndpoint; 5] = [
        FlightEndpoint::OneWayMonth,
        FlightEndpoint::TwoWayMonth,
        FlightEndpoint::Airports,
        FlightEndpoint::OneWay,
        FlightEndpoint::RoundTrip,
    ];

    fn tool_name(self) -> &'static str {
        match self {
            FlightEndpoint::OneWayMonth => "oneway_flights_month",
            FlightEndpoint::TwoWayMonth => "twoway_flights_month",
            FlightEndpoint::Airports => "airports_information",
            FlightEndpoint::OneWay => "one_way_flight",
            FlightEndpoint::RoundTrip => "round_trip_flight",
        }
    }

    fn path(self) -> &'static str {
        match self {
            FlightEndpoint::OneWayMonth => "price-calendar-web",
            FlightEndpoint::TwoWayMonth => "price-calendar-web-return",
            FlightEndpoint::Airports => "airports",
            FlightEndpoint::OneWay => "search-one-way",
            FlightEndpoint::RoundTrip => "search-roundtrip",
        }
    }

    fn description(self) -> String {
        match self {
            FlightEndpoint::OneWayMonth => "Cheapest one-way prices per day for a month, given source and destination airport codes and the month (YYYY-MM).".to_string(),
            FlightEndpoint::TwoWayMonth => "Cheapest return-trip prices per day, given source and destination airport codes, the outbound month and the return month (YYYY-MM).".to_string(),
            FlightEndpoint::Airports => "List of airports and their information.".to_string(),
            FlightEndpoint::OneWay => format!("Search one-way flights with filters. {}", SEARCH_NOTES),
            FlightEndpoint::RoundTrip => format!("Search round-trip flights with filters. {}", SEARCH_NOTES),
        }
    }

    fn parameters_schema(self) -> Value {
        let route = json!({
            "from_airport_code": {"type": "string", "description": "Source airport code (default: FRA)"},
            "to_airport_code": {"type": "string", "description": "Destination airport code (default: STR)"}
        });
        let mut properties = match self {
            FlightEndpoint::Airports => return json!({"type": "object", "properties": {}}),
            _ => route,
        };
        let extra = match self {
            FlightEndpoint::OneWayMonth => json!({
                "year_month": {"type": "string", "description": "Month, YYYY-MM"}
            }),
            FlightEndpoint::TwoWayMonth => json!({
                "year_month": {"type": "string", "description": "Outbound month, YYYY-MM"},
                "return_year_month": {"type": "string", "description": "Return month, YYYY-MM"}
            }),
            FlightEndpoint::OneWay | FlightEndpoint::RoundTrip => {
                let mut search = json!({
                    "depart_date": {"type": "string", "description": "Departure date, YYYY-MM-DD or YYYY-MM"},
                    "stops": {"type": "string"},
                    "children": {"type": "string"},
                    "infants": {"type": "string"},
                    "cabinClass": {"type": "string", "enum": CABIN_CLASSES},
                    "adults": {"type": "string"},
                    "includeOriginNearbyAirports": {"type": "string"},
                    "includeDestinationNearbyAirports": {"type": "string"},
                    "airlines": {"type": "string"}
                });
                if self == FlightEndpoint::RoundTrip {
                    search["return_date"] =
                        json!({"type": "string", "description": "Return date, YYYY-MM-DD or YYYY-MM"});
                }
                search
            }
            FlightEndpoint::Airports => json!({}),
        };
        if let (Some(base), Value::Object(more)) = (properties.as_object_mut(), extra) {
            base.extend(more);
        }
        json!({"type": "object", "properties": properties})
    }

    /// Query string for a call, with defaults filled in.
    fn query(self, args: &Value) -> anyhow::Result<Vec<(String, String)>> {
        let mut query: Vec<(String, String)> = Vec::new();
        if self == FlightEndpoint::Airports {
            return Ok(query);
        }
        let mut push = |key: &str, value: String| query.push((key.to_string(), value));

        push("fromEntityId", arg_string(args, "from_airport_code", "FRA"));
        push("toEntityId", arg_string(args, "to_airport_code", "STR"));

        match self {
            FlightEndpoint::OneWayMonth | FlightEndpoint::TwoWayMonth => {
                push("yearMonth", arg_string(args, "year_month", "2025-03"));
                if self == FlightEndpoint::TwoWayMonth {
                    push(
                        "yearMonthReturn",
                        arg_string(args, "return_year_month", "2025-04"),
                    );
                }
                push("currency", "EUR".to_string());
            }
            FlightEndpoint::OneWay | FlightEndpoint::RoundTrip => {
                let cabin = arg_string(args, "cabinClass", "economy");
                if !CABIN_CLASSES.contains(&cabin.as_str()) {
                    anyhow::bail!(
                        "Invalid cabinClass '{}', expected one of: {}",
                        cabin,
                        CABIN_CLASSES.join(", ")
                    );
                }
                push("departDate", arg_string(args, "depart_date", "2025-03"));
                if self == FlightEndpoint::RoundTrip {
                    push("returnDate", arg_string(args, "return_date", "2025-04"));
                }
                push("currency", "EUR".to_string());
                push("stops", arg_string(args, "stops", "direct"));
                push("children", arg_string(args, "children", "0"));
                push("infants", arg_string(args, "infants", "0"));
                push("cabinClass", cabin);
                push("adults", arg_string(args, "adults", "2"));
                push(
                    "includeOriginNearbyAirports",
                    arg_string(args, "includeOriginNearbyAirports", "false"),
                );
                push(
                    "includeDestinationNearbyAirports",
                    arg_string(args, "includeDestinationNearbyAirports", "false"),
                );
                push("sort", "cheapest_first".to_string());
                if let Some(airlines) = query_value(&args["airlines"]).filter(|a| !a.is_empty()) {
                    push("airlines", airlines);
                }
            }
            FlightEndpoint::Airports => {}
        }
        Ok(query)
    }
}

struct FlightTool {
    api: Arc<FlightsApi>,
    endpoint: FlightEndpoint,
    description: String,
}

#[async_trait]
impl Tool for FlightTool {
    fn name(&self) -> &str {
        self.endpoint.tool_name()
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> Value {
        self.endpoint.parameters_schema()
    }

    async fn execute(&self, args: Value) -> anyhow::Result<String> {
        let query = self.endpoint.query(&args)?;
        tracing::debug!(
            "Flight search {} with {:?}",
            self.endpoint.path(),
            query
        );
        let data = self.api.get(self.endpoint.path(), &query).await?;
        Ok(to_output(&data))
    }
}

pub struct FlightsToolSpec {
    api: Arc<FlightsApi>,
}

impl FlightsToolSpec {
    pub fn new(config: &RapidApiConfig) -> Self {
        if config.key.is_none() {
            tracing::warn!("RAPIDAPI_KEY is not set; flight search will be rejected");
        }
        Self {
            api: Arc::new(FlightsApi {
                http: Client::new(),
                url: config.flights_url.clone(),
                key: config.key.clone(),
                host: rapidapi_host(config.host.as_deref(), &config.flights_url),
            }),
        }
    }
}

impl ToolSpec for FlightsToolSpec {
    fn to_tool_list(&self) -> Vec<Arc<dyn Tool>> {
        FlightEndpoint::ALL
            .iter()
            .map(|&endpoint| {
                Arc::new(FlightTool {
                    api: Arc::clone(&self.api),
                    endpoint,
                    description: endpoint.description(),
                }) as Arc<dyn Tool>
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolRegistry;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn rapidapi(server: &MockServer) -> RapidApiConfig {
        RapidApiConfig {
            key: Some("k".to_string()),
            host: Some("sky-scanner3.p.rapidapi.com".to_string()),
            flights_url: format!("{}/flights/", server.uri()),
            financial_data_url: String::new(),
        }
    }

    fn lookup(query: &[(String, String)], key: &str) -> Option<String> {
        query.iter().find(|(k, _)| k == key).map(|(_, v)| v.clone())
    }

    #[test]
    fn test_one_way_defaults() {
        let query = FlightEndpoint::OneWay.query(&json!({})).unwrap();
        assert_eq!(lookup(&query, "fromEntityId").as_deref(), Some("FRA"));
        assert_eq!(lookup(&query, "toEntityId").as_deref(), Some("STR"));
        assert_eq!(lookup(&query, "adults").as_deref(), Some("2"));
        assert_eq!(lookup(&query, "cabinClass").as_deref(), Some("economy"));
        assert_eq!(lookup(&query, "stops").as_deref(), Some("direct"));
        assert_eq!(lookup(&query, "sort").as_deref(), Some("cheapest_first"));
        assert_eq!(lookup(&query, "currency").as_deref(), Some("EUR"));
        assert_eq!(lookup(&query, "airlines"), None);
        assert_eq!(lookup(&query, "returnDate"), None);
    }

    #[test]
    fn test_round_trip_and_airlines() {
        let query = FlightEndpoint::RoundTrip
            .query(&json!({"return_date": "2025-05-02", "airlines": [-32753, -32695]}))
            .unwrap();
        assert_eq!(lookup(&query, "returnDate").as_deref(), Some("2025-05-02"));
        assert_eq!(lookup(&query, "airlines").as_deref(), Some("-32753,-32695"));
    }

    #[test]
    fn test_invalid_cabin_class() {
        let err = FlightEndpoint::OneWay
            .query(&json!({"cabinClass": "luxury"}))
            .unwrap_err();
        assert!(err.to_string().contains("Invalid cabinClass"));
    }

    #[test]
    fn test_airports_takes_no_parameters() {
        assert!(FlightEndpoint::Airports.query(&json!({"from_airport_code": "JFK"})).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_month_calendar_request() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/flights/price-calendar-web-return"))
            .and(header("x-rapidapi-key", "k"))
            .and(query_param("fromEntityId", "MUC"))
            .and(query_param("yearMonth", "2025-06"))
            .and(query_param("yearMonthReturn", "2025-04"))
            .and(query_param("currency", "EUR"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {"flights": []}})))
            .expect(1)
            .mount(&server)
            .await;

        let tools = ToolRegistry::new().with_spec(&FlightsToolSpec::new(&rapidapi(&server)));
        assert_eq!(tools.len(), 5);
        let out = tools
            .execute(
                "twoway_flights_month",
                json!({"from_airport_code": "MUC", "year_month": "2025-06"}),
            )
            .await
            .unwrap();
        assert!(out.contains("flights"));
    }
}
