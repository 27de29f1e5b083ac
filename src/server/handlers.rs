//! HTTP handlers for the relay API.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::Json;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::api::{
    CompletionResponse, HealthResponse, MessagesQuery, MessagesResponse, SendRequest, SendResponse,
};
use super::error::ApiError;
use super::queue::MessageQueue;
use crate::relay::RetryCoordinator;

/// Application state shared across all handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    pub coordinator: Arc<RetryCoordinator>,
    pub queue: Arc<MessageQueue>,
    /// Tripped on server shutdown; in-flight relays are cancelled.
    pub shutdown: CancellationToken,
}

impl AppState {
    #[must_use]
    pub fn new(coordinator: Arc<RetryCoordinator>, queue: Arc<MessageQueue>) -> Self {
        Self {
            coordinator,
            queue,
            shutdown: CancellationToken::new(),
        }
    }

    /// Use an externally owned shutdown token.
    #[must_use]
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }
}

/// POST /api/claude - Relay `{text}` to the Claude CLI.
///
/// # Errors
///
/// 400 for a malformed body or a missing or empty `text`, 503 when retries
/// ran out on overloads, 500 for every other failure.
pub async fn post_claude(
    State(state): State<AppState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<CompletionResponse>, ApiError> {
    let Json(body) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let text = body
        .get("text")
        .and_then(Value::as_str)
        .filter(|text| !text.is_empty())
        .ok_or_else(|| ApiError::BadRequest("Missing text field".to_string()))?;

    let completion = state.coordinator.relay(text, &state.shutdown).await?;
    Ok(Json(CompletionResponse { completion }))
}

/// GET /health - Liveness probe.
pub async fn get_health() -> Json<HealthResponse> {
    Json(HealthResponse::ok())
}

/// POST /send - Queue a chat message.
///
/// # Errors
///
/// 400 if the body is malformed or carries no message.
pub async fn post_send(
    State(state): State<AppState>,
    payload: Result<Json<SendRequest>, JsonRejection>,
) -> Result<Json<SendResponse>, ApiError> {
    let message = payload
        .ok()
        .and_then(|Json(req)| req.message)
        .filter(|m| !m.is_empty())
        .ok_or_else(|| ApiError::BadRequest("No message provided".to_string()))?;

    let id = state.queue.push(message).await;
    tracing::debug!(id, "Message queued");
    Ok(Json(SendResponse { success: true, id }))
}

/// GET /messages - Unread chat messages.
pub async fn get_messages(
    State(state): State<AppState>,
    query: Option<Query<MessagesQuery>>,
) -> Json<MessagesResponse> {
    let query = query.map_or_else(MessagesQuery::default, |Query(q)| q);
    let messages = state.queue.unread(query.mark_as_read).await;
    Json(MessagesResponse { messages })
}
