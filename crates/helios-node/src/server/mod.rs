//! Status server
//!
//! A small REST API over a running monitor: connection state, session
//! counters, the latest telemetry record, and one-shot commands.

pub mod rest;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::AppState;

/// Create the server router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health check
        .route("/health", get(rest::health))
        // Link status
        .route("/api/status", get(rest::status))
        .route("/api/telemetry", get(rest::latest_telemetry))
        .route("/api/command", post(rest::send_command))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
