//! Relay HTTP server with axum router and graceful shutdown.

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::handlers::{get_health, get_messages, post_claude, post_send, AppState};
use super::queue::MessageQueue;
use crate::config::{RelayConfig, ServerConfig};
use crate::relay::{RetryCoordinator, RetryPolicyError};

/// HTTP server exposing the relay and the message queue.
pub struct RelayServer {
    config: ServerConfig,
    state: AppState,
}

impl RelayServer {
    /// Create a server around an existing coordinator and queue.
    #[must_use]
    pub fn new(coordinator: Arc<RetryCoordinator>, queue: Arc<MessageQueue>) -> Self {
        Self {
            config: ServerConfig::default(),
            state: AppState::new(coordinator, queue),
        }
    }

    /// Wire the CLI runner, retry policy and queue from a loaded config.
    ///
    /// # Errors
    ///
    /// Returns `RetryPolicyError` if the retry section is inconsistent.
    pub fn from_config(config: &RelayConfig) -> Result<Self, RetryPolicyError> {
        let coordinator = config.coordinator()?;
        let queue = MessageQueue::new(config.queue.capacity);

        Ok(Self::new(Arc::new(coordinator), Arc::new(queue)).with_config(config.server.clone()))
    }

    /// Set the server configuration (builder pattern).
    #[must_use]
    pub fn with_config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Use an externally owned shutdown token.
    #[must_use]
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.state = self.state.with_shutdown(shutdown);
        self
    }

    /// Token that stops the server and cancels in-flight relays.
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.state.shutdown.clone()
    }

    /// Get the configured address as a string.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.config.host, self.config.port)
    }

    /// Build the axum router with all routes and middleware.
    pub fn build_router(&self) -> Router {
        let router = Router::new()
            .route("/api/claude", post(post_claude))
            .route("/health", get(get_health))
            .route("/send", post(post_send))
            .route("/messages", get(get_messages))
            .with_state(self.state.clone())
            .layer(TraceLayer::new_for_http());

        if self.config.cors_permissive {
            router.layer(CorsLayer::permissive())
        } else {
            router
        }
    }

    /// Bind the configured address and serve until the shutdown token fires.
    ///
    /// # Errors
    ///
    /// Returns an error if the server fails to bind or serve.
    pub async fn run(self) -> std::io::Result<()> {
        let listener = TcpListener::bind(self.address()).await?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener.
    ///
    /// # Errors
    ///
    /// Returns an error if serving fails.
    pub async fn serve(self, listener: TcpListener) -> std::io::Result<()> {
        let cancel = self.state.shutdown.clone();
        let app = self.build_router();

        tracing::info!(address = %listener.local_addr()?, "Starting relay server");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                cancel.cancelled().await;
                tracing::info!("Relay server shutting down gracefully");
            })
            .await
    }
}
