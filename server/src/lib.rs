//! # Console Relay Server
//!
//! Authenticated WebSocket relay between browser console clients and the
//! console endpoints of a virtualization cluster.
//!
//! A trusted backend hands the client an encrypted descriptor. The client
//! opens `GET /?payload=<descriptor>`; the relay decrypts and validates it,
//! opens the authenticated upstream connection on the client's behalf and
//! forwards frames both ways until either side closes.

pub mod api;
pub mod config;
pub mod error;
pub mod handlers;
pub mod protocol;
pub mod registry;
pub mod relay;
pub mod state;
pub mod tls;
pub mod upstream;

use axum::{routing::get, Router};
use state::AppState;
use tower_http::cors::CorsLayer;

/// Builds the relay's router.
///
/// - `GET /` — descriptor-authenticated WebSocket upgrade
/// - `GET /health` — uptime
pub fn app(state: AppState) -> Router {
    Router::new()
        .route(
            "/",
            get(handlers::ws_handler).fallback(handlers::method_not_allowed),
        )
        .route("/health", get(api::status))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
