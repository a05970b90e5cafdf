//! Version 1 of the PulseChat HTTP API.
//!
//! | Method | Path | Purpose |
//! |---|---|---|
//! | POST | `/v1/chat` | One conversational turn |
//! | GET | `/v1/chat/history/{session_id}` | Stored history of a conversation |
//! | DELETE | `/v1/chat/history/{session_id}` | Reset a conversation |
//! | GET | `/v1/sessions/{session_id}/snapshot` | Latest snapshot of a monitoring session |
//!
//! A failed upstream call is still a valid answer: `/v1/chat` responds 200
//! with `success: false`, the error text and the apology.

use axum::{
    Router,
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use pulsechat_chat::{ChatError, ChatOutcome, ChatRequest};
use pulsechat_core::error::StorageError;
use pulsechat_core::message::{Message, Role};
use pulsechat_core::Snapshot;

use crate::SharedState;

// ── Router ────────────────────────────────────────────────────────────────

/// Build the v1 API router. Nest this under "/v1" in the main router.
pub fn v1_router(state: SharedState) -> Router {
    Router::new()
        .route("/chat", post(chat_handler))
        .route(
            "/chat/history/{session_id}",
            get(get_history_handler).delete(clear_history_handler),
        )
        .route("/sessions/{session_id}/snapshot", get(snapshot_handler))
        .with_state(state)
}

// ── Request / Response types ──────────────────────────────────────────────

fn default_include_context() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct ChatRequestDto {
    pub message: String,
    /// Snapshot to ground this turn on.
    #[serde(default)]
    pub session_data: Option<Snapshot>,
    /// Conversational session; `"default"` when omitted.
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default = "default_include_context")]
    pub include_context: bool,
}

/// Both outcome shapes. Fields that do not apply to a shape are omitted.
#[derive(Debug, Serialize, Deserialize)]
pub struct ChatResponseDto {
    pub success: bool,
    pub response: String,
    pub timestamp: String,
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_used: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<ChatOutcome> for ChatResponseDto {
    fn from(outcome: ChatOutcome) -> Self {
        match outcome {
            ChatOutcome::Replied(reply) => Self {
                success: true,
                response: reply.response,
                timestamp: reply.timestamp.to_rfc3339(),
                session_id: reply.session_id,
                tokens_used: Some(reply.tokens_used),
                model: Some(reply.model),
                error: None,
            },
            ChatOutcome::Failed(failure) => Self {
                success: false,
                response: failure.response,
                timestamp: failure.timestamp.to_rfc3339(),
                session_id: failure.session_id,
                tokens_used: None,
                model: None,
                error: Some(failure.error),
            },
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageDto {
    pub role: Role,
    pub content: String,
}

impl From<Message> for MessageDto {
    fn from(message: Message) -> Self {
        Self {
            role: message.role,
            content: message.content,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub session_id: String,
    pub messages: Vec<MessageDto>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

// ── Handlers ──────────────────────────────────────────────────────────────

async fn chat_handler(
    State(state): State<SharedState>,
    Json(payload): Json<ChatRequestDto>,
) -> Result<Json<ChatResponseDto>, ApiError> {
    let request = ChatRequest::new(
        payload.message,
        payload.session_id,
        payload.session_data,
        payload.include_context,
    )
    .map_err(|e| match e {
        ChatError::EmptyMessage | ChatError::InvalidSnapshot(_) => {
            api_error(StatusCode::BAD_REQUEST, e.to_string())
        }
        ChatError::Config(_) => api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    })?;

    info!(session_id = %request.session_id, "v1/chat request");
    let outcome = state.engine.chat(request).await;
    Ok(Json(outcome.into()))
}

async fn get_history_handler(
    State(state): State<SharedState>,
    Path(session_id): Path<String>,
) -> Json<HistoryResponse> {
    let messages = state
        .engine
        .history(&session_id)
        .await
        .into_iter()
        .map(MessageDto::from)
        .collect();
    Json(HistoryResponse {
        session_id,
        messages,
    })
}

async fn clear_history_handler(
    State(state): State<SharedState>,
    Path(session_id): Path<String>,
) -> StatusCode {
    state.engine.clear_history(&session_id).await;
    info!(session_id = %session_id, "History cleared via API");
    StatusCode::NO_CONTENT
}

async fn snapshot_handler(
    State(state): State<SharedState>,
    Path(session_id): Path<String>,
) -> Result<Json<Snapshot>, ApiError> {
    match state.store.latest_snapshot(&session_id).await {
        Ok(Some(snapshot)) => Ok(Json(snapshot)),
        Ok(None) => Err(api_error(
            StatusCode::NOT_FOUND,
            format!("No readings recorded for session '{session_id}'"),
        )),
        Err(e @ StorageError::NotFound { .. }) => {
            Err(api_error(StatusCode::NOT_FOUND, e.to_string()))
        }
        Err(e) => {
            error!(session_id = %session_id, error = %e, "Snapshot lookup failed");
            Err(api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to load snapshot",
            ))
        }
    }
}
