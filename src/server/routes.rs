//! Request handlers.
//!
//! Session routes resolve the [`SessionAgent`](crate::agent_core::session_agent::SessionAgent)
//! for the path's session id and return the resulting snapshot inside a
//! `{success: true, data}` envelope. Streamed chats return the raw text instead.

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use super::error::{ApiError, ApiJson};
use super::state::AppState;
use super::stream::text_stream;
use crate::agent_core::types::SessionState;
use crate::inference::ToolDefinition;

// ─── Payloads ───────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub success: bool,
    pub data: T,
}

fn ok<T: Serialize>(data: T) -> Json<Envelope<T>> {
    Json(Envelope {
        success: true,
        data,
    })
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub mode: &'static str,
    pub version: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub stream: bool,
}

#[derive(Debug, Deserialize)]
pub struct ModelRequest {
    pub model: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemPromptRequest {
    pub system_prompt: String,
}

#[derive(Debug, Deserialize)]
pub struct ToolsRequest {
    pub tools: Vec<String>,
}

// ─── Service ────────────────────────────────────────────────────────────────

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        mode: state.mode(),
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Full catalog: built-ins followed by whatever the bridge advertises.
pub async fn list_tools(State(state): State<AppState>) -> Json<Envelope<Vec<ToolDefinition>>> {
    let definitions = state.registry().list_definitions().await;
    tracing::debug!(tool_count = definitions.len(), "serving tool catalog");
    ok(definitions)
}

pub async fn not_found() -> ApiError {
    ApiError::not_found()
}

// ─── Sessions ───────────────────────────────────────────────────────────────

pub async fn get_messages(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<Envelope<SessionState>>, ApiError> {
    Ok(ok(state.store().snapshot(&session_id)?))
}

pub async fn post_chat(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    ApiJson(body): ApiJson<ChatRequest>,
) -> Result<Response, ApiError> {
    tracing::info!(
        session_id = %session_id,
        stream = body.stream,
        chars = body.message.len(),
        "chat request"
    );
    let agent = state.agents.get(&session_id)?;

    if body.stream {
        let chunks = agent
            .run_streaming(&body.message, body.model.as_deref())
            .await?;
        return Ok(text_stream(chunks));
    }

    let snapshot = agent.run_buffered(&body.message, body.model.as_deref()).await?;
    Ok(ok(snapshot).into_response())
}

pub async fn post_model(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    ApiJson(body): ApiJson<ModelRequest>,
) -> Result<Json<Envelope<SessionState>>, ApiError> {
    Ok(ok(state.store().set_model(&session_id, &body.model)?))
}

pub async fn post_system_prompt(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    ApiJson(body): ApiJson<SystemPromptRequest>,
) -> Result<Json<Envelope<SessionState>>, ApiError> {
    if body.system_prompt.trim().is_empty() {
        return Err(ApiError::bad_request("systemPrompt must not be empty"));
    }
    Ok(ok(state
        .store()
        .set_system_prompt(&session_id, &body.system_prompt)?))
}

pub async fn post_tools(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    ApiJson(body): ApiJson<ToolsRequest>,
) -> Result<Json<Envelope<SessionState>>, ApiError> {
    Ok(ok(state.store().set_enabled_tools(&session_id, &body.tools)?))
}

pub async fn delete_clear(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<Envelope<SessionState>>, ApiError> {
    Ok(ok(state.store().clear(&session_id)?))
}
