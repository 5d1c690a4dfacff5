//! # REST API Endpoints
//!
//! Provides HTTP API endpoints for querying server state.
//! Currently only exposes the process uptime.

use crate::state::AppState;
use axum::{extract::State, Json};
use serde::Serialize;

/// Response body of the status endpoint.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    /// Whole seconds since the relay started.
    pub uptime: u64,
}

/// `GET /health` — Returns how long the relay has been running.
pub async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        uptime: state.started_at.elapsed().as_secs(),
    })
}
