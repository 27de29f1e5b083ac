//! In-memory queue of chat messages posted from the web interface.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

/// Default number of retained messages.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// A message waiting to be read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedMessage {
    pub id: u64,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub read: bool,
}

#[derive(Debug)]
struct QueueInner {
    next_id: u64,
    messages: VecDeque<QueuedMessage>,
}

/// Bounded message queue. When full, the oldest message is evicted.
#[derive(Debug)]
pub struct MessageQueue {
    capacity: usize,
    inner: Mutex<QueueInner>,
}

impl MessageQueue {
    /// Create a queue holding at most `capacity` messages (minimum 1).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            inner: Mutex::new(QueueInner {
                next_id: 1,
                messages: VecDeque::with_capacity(capacity),
            }),
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append a message and return its id.
    pub async fn push(&self, message: impl Into<String>) -> u64 {
        let mut inner = self.inner.lock().await;
        let id = inner.next_id;
        inner.next_id += 1;

        if inner.messages.len() >= self.capacity {
            if let Some(evicted) = inner.messages.pop_front() {
                tracing::debug!(id = evicted.id, "Queue full, evicting oldest message");
            }
        }

        inner.messages.push_back(QueuedMessage {
            id,
            message: message.into(),
            timestamp: Utc::now(),
            read: false,
        });
        id
    }

    /// Return unread messages oldest first, optionally marking them read.
    pub async fn unread(&self, mark_as_read: bool) -> Vec<QueuedMessage> {
        let mut inner = self.inner.lock().await;
        let mut out = Vec::new();

        for msg in inner.messages.iter_mut().filter(|m| !m.read) {
            out.push(msg.clone());
            if mark_as_read {
                msg.read = true;
            }
        }
        out
    }

    /// Number of retained messages, read or not.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.messages.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for MessageQueue {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}
