//! HTTP server setup and configuration.

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::handlers;
use super::service::Relay;
use super::transport::HttpTransport;
use crate::config::Config;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub relay: Arc<Relay>,
}

impl AppState {
    pub fn new(relay: Relay) -> Self {
        Self {
            relay: Arc::new(relay),
        }
    }
}

/// Create the axum router with all endpoints.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/chat", post(handlers::chat))
        .route("/api/models", get(handlers::list_models))
        .route("/health", get(handlers::health))
        // State and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Build the production relay from configuration.
pub fn build_relay(config: &Config) -> anyhow::Result<Relay> {
    let transport = HttpTransport::with_connect_timeout(config.relay.connect_timeout())?;
    Ok(Relay::new(
        Arc::new(transport),
        config.endpoints(),
        config.relay.retry_policy(),
    )
    .with_log_previews(config.logging.log_previews))
}

/// Run the HTTP server.
pub async fn run_server(config: Config) -> anyhow::Result<()> {
    let listen_addr = config.server.listen.clone();

    let relay = build_relay(&config)?;
    let policy = relay.policy();
    tracing::info!(
        max_attempts = policy.max_attempts,
        attempt_timeout_secs = policy.attempt_timeout.as_secs(),
        backoff_step_ms = policy.backoff_step.as_millis() as u64,
        "Relay configured"
    );

    let app = create_router(AppState::new(relay));

    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    tracing::info!(address = %listen_addr, "Starting chatrelay server");

    axum::serve(listener, app).await?;

    Ok(())
}
