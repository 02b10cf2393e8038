//! REST API endpoints

use axum::{extract::State, http::StatusCode, Json};
use helios_core::{ChargeState, Command, TelemetryRecord};
use helios_link::{ConnectionState, LinkError, LinkStats};
use serde::Serialize;
use std::sync::Arc;

use crate::AppState;

/// Link status
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub state: ConnectionState,
    pub port: Option<String>,
    pub baud_rate: u32,
    pub uptime_seconds: u64,
    pub stats: LinkStats,
}

/// Latest distributed record
#[derive(Debug, Serialize)]
pub struct TelemetryResponse {
    pub received_at: String,
    pub charge_state: ChargeState,
    pub fields: TelemetryRecord,
}

/// Error body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: &'static str,
    pub message: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(err: LinkError) -> ApiError {
    let status = match &err {
        LinkError::NotConnected => StatusCode::CONFLICT,
        LinkError::Encoding(_) | LinkError::InvalidConfig(_) => StatusCode::BAD_REQUEST,
        e if e.is_protocol_error() => StatusCode::BAD_GATEWAY,
        _ => StatusCode::SERVICE_UNAVAILABLE,
    };
    (
        status,
        Json(ErrorResponse {
            code: err.error_code(),
            message: err.to_string(),
        }),
    )
}

/// Connection state and session counters
pub async fn status(State(state): State<Arc<AppState>>) -> Result<Json<StatusResponse>, ApiError> {
    let config = state.handle.config().await.map_err(api_error)?;
    let stats = state.handle.stats().await.map_err(api_error)?;
    Ok(Json(StatusResponse {
        state: state.handle.state(),
        port: config.port,
        baud_rate: config.baud_rate,
        uptime_seconds: state.start_time.elapsed().as_secs(),
        stats,
    }))
}

/// Most recent record seen by the distributor
pub async fn latest_telemetry(
    State(state): State<Arc<AppState>>,
) -> Json<Option<TelemetryResponse>> {
    Json(state.latest.get().map(|update| TelemetryResponse {
        received_at: update.received_at.to_rfc3339(),
        charge_state: update.charge_state,
        fields: (*update.record).clone(),
    }))
}

/// Send a command, reply with the frame it produced
pub async fn send_command(
    State(state): State<Arc<AppState>>,
    Json(command): Json<Command>,
) -> Result<Json<Option<TelemetryRecord>>, ApiError> {
    state
        .handle
        .send_command(command)
        .await
        .map(Json)
        .map_err(api_error)
}

/// Health check endpoint
pub async fn health() -> &'static str {
    "OK"
}
