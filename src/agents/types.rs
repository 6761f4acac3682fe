//! Core types for the agent system.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::context::ContextError;

/// The built-in agents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    /// Stock broker: Alpha Vantage data and currency conversion
    #[value(alias = "stockbroker")]
    Broker,
    /// Flight search and currency conversion
    #[value(alias = "flightassistant")]
    Travel,
    /// General butler: date, e-mail search, code interpreter
    Alfred,
    /// Market news and fundamentals from the financial data API
    Investor,
}

impl AgentKind {
    pub const ALL: [AgentKind; 4] = [
        AgentKind::Broker,
        AgentKind::Travel,
        AgentKind::Alfred,
        AgentKind::Investor,
    ];

    /// Stable name, also used for the context file.
    pub fn name(&self) -> &'static str {
        match self {
            AgentKind::Broker => "broker",
            AgentKind::Travel => "travel",
            AgentKind::Alfred => "alfred",
            AgentKind::Investor => "investor",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            AgentKind::Broker => "Stock broker agent",
            AgentKind::Travel => "Perform flight search and exchange rate conversion",
            AgentKind::Alfred => "Personal butler with access to the date, your e-mails and a Python interpreter",
            AgentKind::Investor => "Financial news, market data and company fundamentals",
        }
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for AgentKind {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "broker" | "stockbroker" => Ok(AgentKind::Broker),
            "travel" | "flightassistant" => Ok(AgentKind::Travel),
            "alfred" => Ok(AgentKind::Alfred),
            "investor" => Ok(AgentKind::Investor),
            other => Err(AgentError::UnknownAgent(other.to_string())),
        }
    }
}

/// One tool call made during a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub tool: String,
    pub arguments: String,
    pub success: bool,
}

/// Result of a completed agent run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentOutcome {
    pub answer: String,
    pub tool_log: Vec<ToolInvocation>,
    pub iterations: usize,
    pub model: String,
}

/// Errors that can occur in agent operations.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("Unknown agent: {0}")]
    UnknownAgent(String),

    #[error("LLM error: {0}")]
    LlmError(String),

    #[error("LLM returned an empty response")]
    EmptyResponse,

    #[error("Max iterations reached: {0}")]
    MaxIterations(usize),

    #[error(transparent)]
    Context(#[from] ContextError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_parsing_accepts_aliases() {
        assert_eq!("broker".parse::<AgentKind>().unwrap(), AgentKind::Broker);
        assert_eq!("StockBroker".parse::<AgentKind>().unwrap(), AgentKind::Broker);
        assert_eq!("flightassistant".parse::<AgentKind>().unwrap(), AgentKind::Travel);
        assert!(matches!(
            "butler".parse::<AgentKind>(),
            Err(AgentError::UnknownAgent(_))
        ));
    }

    #[test]
    fn test_names_roundtrip() {
        for kind in AgentKind::ALL {
            assert_eq!(kind.name().parse::<AgentKind>().unwrap(), kind);
            assert_eq!(
                serde_json::to_value(kind).unwrap(),
                serde_json::json!(kind.name())
            );
        }
    }
}
