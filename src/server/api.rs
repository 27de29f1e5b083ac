//! Request and response bodies for the HTTP endpoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::QueuedMessage;

/// Response for POST /api/claude.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub completion: String,
}

/// Response for GET /health.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
}

impl HealthResponse {
    /// A healthy response stamped with the current time.
    #[must_use]
    pub fn ok() -> Self {
        Self {
            status: "ok".to_string(),
            timestamp: Utc::now(),
        }
    }
}

/// Body for POST /send.
#[derive(Debug, Clone, Deserialize)]
pub struct SendRequest {
    #[serde(default)]
    pub message: Option<String>,
}

/// Response for POST /send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendResponse {
    pub success: bool,
    pub id: u64,
}

/// Query parameters for GET /messages.
#[derive(Debug, Clone, Deserialize)]
pub struct MessagesQuery {
    /// Mark returned messages as read.
    #[serde(default = "default_mark_as_read")]
    pub mark_as_read: bool,
}

fn default_mark_as_read() -> bool {
    true
}

impl Default for MessagesQuery {
    fn default() -> Self {
        Self {
            mark_as_read: default_mark_as_read(),
        }
    }
}

/// Response for GET /messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagesResponse {
    pub messages: Vec<QueuedMessage>,
}
