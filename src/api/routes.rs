//! HTTP route handlers.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::Html,
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::agents::{AgentError, AgentKind};
use crate::runtime::Runtime;

use super::types::*;

/// Model id the OpenAI-compatible endpoints answer to.
const PIPELINE_MODEL: &str = "alfred";

const INDEX_HTML: &str = include_str!("index.html");

/// Shared application state.
pub struct AppState {
    pub runtime: Runtime,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/api/chat", post(chat))
        .route("/api/health", get(health))
        .route("/api/tools", get(list_tools))
        .route("/v1/models", get(list_models))
        .route("/v1/chat/completions", post(chat_completions))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server.
pub async fn serve(runtime: Runtime) -> anyhow::Result<()> {
    let addr = format!("{}:{}", runtime.config.host, runtime.config.port);
    let app = router(Arc::new(AppState { runtime }));

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}

fn error_status(e: &anyhow::Error) -> StatusCode {
    match e.downcast_ref::<AgentError>() {
        Some(AgentError::UnknownAgent(_)) => StatusCode::BAD_REQUEST,
        Some(AgentError::LlmError(_)) | Some(AgentError::EmptyResponse) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        model: state.runtime.config.model.clone(),
        max_iterations: state.runtime.config.max_iterations,
    })
}

async fn list_tools(State(state): State<Arc<AppState>>) -> Json<Vec<AgentTools>> {
    let agents = AgentKind::ALL
        .iter()
        .map(|&kind| AgentTools {
            agent: kind.name().to_string(),
            description: kind.description().to_string(),
            tools: state.runtime.tools_for(kind).list_tools(),
        })
        .collect();
    Json(agents)
}

/// Ask an agent. The agent's conversation context is loaded and saved
/// around the run.
async fn chat(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, (StatusCode, String)> {
    let message = req.message.trim();
    if message.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "Empty message".to_string()));
    }

    let kind: AgentKind = req
        .agent
        .as_deref()
        .unwrap_or("alfred")
        .parse()
        .map_err(|e: AgentError| (StatusCode::BAD_REQUEST, e.to_string()))?;

    let outcome = state
        .runtime
        .ask(kind, message, req.model.as_deref(), true)
        .await
        .map_err(|e| {
            tracing::error!("Chat with {} failed: {:#}", kind, e);
            (error_status(&e), e.to_string())
        })?;

    Ok(Json(ChatResponse {
        answer: outcome.answer,
        agent: kind.name().to_string(),
        model: outcome.model,
        tools_used: outcome.tool_log,
    }))
}

async fn list_models() -> Json<ModelList> {
    Json(ModelList {
        object: "list",
        data: vec![ModelCard {
            id: PIPELINE_MODEL.to_string(),
            object: "model",
            created: 0,
            owned_by: "alfred",
        }],
    })
}

/// Answer the last user message with the alfred agent, without memory.
async fn chat_completions(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CompletionRequest>,
) -> Result<Json<CompletionResponse>, (StatusCode, String)> {
    if req.stream {
        return Err((
            StatusCode::BAD_REQUEST,
            "Streaming is not supported".to_string(),
        ));
    }
    let message = req
        .last_user_message()
        .ok_or_else(|| (StatusCode::BAD_REQUEST, "No user message".to_string()))?;

    let model_override = req.model.as_deref().filter(|m| *m != PIPELINE_MODEL);
    let outcome = state
        .runtime
        .ask(AgentKind::Alfred, message, model_override, false)
        .await
        .map_err(|e| {
            tracing::error!("Pipeline completion failed: {:#}", e);
            (error_status(&e), e.to_string())
        })?;

    Ok(Json(CompletionResponse {
        id: format!("chatcmpl-{}", uuid::Uuid::new_v4().simple()),
        object: "chat.completion",
        created: chrono::Utc::now().timestamp(),
        model: req.model.clone().unwrap_or_else(|| PIPELINE_MODEL.to_string()),
        choices: vec![CompletionChoice {
            index: 0,
            message: AssistantMessage {
                role: "assistant",
                content: outcome.answer,
            },
            finish_reason: "stop",
        }],
    }))
}
