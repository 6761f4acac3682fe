//! # Alfred
//!
//! A personal AI butler: tool-calling agents backed by a local Ollama model
//! (or Azure OpenAI), a Chroma vector database and a handful of REST APIs.
//!
//! ```text
//!   CLI / web chat / OpenAI-compatible hook
//!                    │
//!                    ▼
//!               ┌─────────┐       ┌──────────────┐
//!               │ Runtime │──────▶│ Agent (loop) │──▶ tools ──▶ HTTP APIs
//!               └─────────┘       └──────────────┘
//!                    │                   │
//!                    ▼                   ▼
//!            vector store          conversation context
//! ```
//!
//! ## Modules
//! - `agents`: agent kinds, prompts and the tool-calling loop
//! - `tools`: the tools agents call (market data, flights, e-mail, ...)
//! - `routing`: semantic routing of questions to Alpha Vantage functions
//! - `workflow`: the plan-route-execute trader workflow
//! - `gmail`: e-mail ingestion into the vector store
//! - `context`: per-agent conversation memory on disk
//! - `api`: the web server

pub mod agents;
pub mod api;
pub mod catalog;
pub mod config;
pub mod context;
pub mod gmail;
pub mod llm;
pub mod routing;
pub mod runtime;
pub mod tools;
pub mod vector;
pub mod workflow;

pub use config::Config;
pub use runtime::Runtime;
