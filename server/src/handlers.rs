//! # WebSocket Handlers
//!
//! Contains the HTTP edge of the relay:
//! - Decrypting and validating the descriptor carried by the upgrade request
//! - Rejecting bad requests with a JSON error body *before* upgrading
//! - Upgrading accepted requests and handing the socket to the relay session
//!
//! Failures before the upgrade can only be reported as HTTP responses; once
//! the connection is a WebSocket, failures become close frames (see
//! [`relay`](crate::relay)).

use crate::error::{ErrorBody, RelayError};
use crate::relay::run_session;
use crate::state::AppState;
use axum::{
    extract::{
        rejection::QueryRejection, ws::rejection::WebSocketUpgradeRejection, Query, State,
        WebSocketUpgrade,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use relay_protocol::DescriptorError;
use serde::Deserialize;
use tracing::info;

/// Query parameters of the upgrade request.
#[derive(Debug, Deserialize)]
pub struct UpgradeParams {
    /// Encrypted descriptor in `<hex(iv)>:<hex(ciphertext)>` form.
    pub payload: Option<String>,
}

// ─── WebSocket Upgrade Endpoint ─────────────────────────────────

/// `GET /?payload=...` — Validates the descriptor, then upgrades.
///
/// The descriptor is decoded and validated before the upgrade is attempted,
/// so a bad payload gets a `400` with a JSON body instead of a WebSocket that
/// immediately closes.
pub async fn ws_handler(
    State(state): State<AppState>,
    params: Result<Query<UpgradeParams>, QueryRejection>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let Ok(Query(params)) = params else {
        let err = DescriptorError::MalformedPayload("unparseable query string".into());
        return RelayError::from(err).into_response();
    };
    let payload = match params.payload.as_deref() {
        Some(p) if !p.is_empty() => p,
        _ => return RelayError::MissingPayload.into_response(),
    };

    let descriptor = match relay_protocol::open(payload, &state.key) {
        Ok(descriptor) => descriptor,
        Err(e) => return RelayError::from(e).into_response(),
    };

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };

    info!(
        guest_id = descriptor.guest_id,
        guest_type = %descriptor.guest_type,
        host = %descriptor.host,
        "accepted upgrade request"
    );
    ws.on_upgrade(move |socket| run_session(socket, descriptor, state))
}

/// Any method other than `GET` on the upgrade route.
pub async fn method_not_allowed() -> impl IntoResponse {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        Json(ErrorBody::new("method not allowed", "METHOD_NOT_ALLOWED")),
    )
}
