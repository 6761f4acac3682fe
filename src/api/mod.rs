//! HTTP API for Alfred.
//!
//! ## Endpoints
//!
//! - `GET /` - Chat page
//! - `POST /api/chat` - Ask an agent; the conversation is remembered
//! - `GET /api/health` - Health check
//! - `GET /api/tools` - Tools per agent
//! - `GET /v1/models` - OpenAI-compatible model list
//! - `POST /v1/chat/completions` - OpenAI-compatible chat (alfred, stateless)

mod routes;
pub mod types;

pub use routes::{router, serve, AppState};
pub use types::*;
