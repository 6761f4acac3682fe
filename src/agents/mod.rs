//! Agents module - tool-calling assistants.
//!
//! # Agent Types
//! - **broker**: Alpha Vantage market data with semantic function routing
//! - **travel**: flight search
//! - **alfred**: the general butler (date, e-mail search, code interpreter)
//! - **investor**: financial news and company fundamentals
//!
//! Every agent runs the same loop (`Agent::run`); they differ only in
//! system prompt and tools. All of them can convert currencies except alfred.

mod executor;
mod prompts;
mod types;

pub use executor::{Agent, AgentSpec};
pub use prompts::{load_prompt, with_tool_list};
pub use types::{AgentError, AgentKind, AgentOutcome, ToolInvocation};
