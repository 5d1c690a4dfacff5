//! # Relay Frame Protocol
//!
//! The relay never looks inside console frames. This module only defines the
//! fixed close codes/reasons the relay itself emits and translates frames
//! between the client side (axum's WebSocket types) and the upstream side
//! (tungstenite's), keeping payloads byte-for-byte identical.

use axum::extract::ws::{self, Utf8Bytes};
use tokio_tungstenite::tungstenite::{self, protocol::frame::coding::CloseCode};

/// A close code and reason the relay sends on its own behalf.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloseReason {
    pub code: u16,
    pub reason: &'static str,
}

// ── Close codes (RFC 6455 §7.4.1) ────────────────────────────────

pub const CLOSE_NORMAL: u16 = 1000;
pub const CLOSE_INTERNAL_ERROR: u16 = 1011;

// ── Fixed close reasons ──────────────────────────────────────────

/// The upstream console endpoint could not be reached or refused the handshake.
pub const UPSTREAM_CONNECT_FAILED: CloseReason = CloseReason {
    code: CLOSE_INTERNAL_ERROR,
    reason: "upstream connection failed",
};

/// A client frame arrived but the registry has no upstream for the guest.
pub const UPSTREAM_NOT_FOUND: CloseReason = CloseReason {
    code: CLOSE_INTERNAL_ERROR,
    reason: "upstream not found",
};

/// The upstream connection failed while the session was active.
pub const UPSTREAM_ERROR: CloseReason = CloseReason {
    code: CLOSE_INTERNAL_ERROR,
    reason: "upstream error",
};

/// A newer session for the same guest took over the registry slot.
pub const SESSION_REPLACED: CloseReason = CloseReason {
    code: CLOSE_NORMAL,
    reason: "session replaced",
};

/// Reason sent to the client when the upstream closed; the code is the
/// upstream's own.
pub const UPSTREAM_CLOSED_REASON: &str = "upstream closed";

/// Maps a close code received from one peer to one that may be sent to the
/// other.
///
/// 1005 ("no status") becomes a normal close. 1004, 1006, 1014, 1015 and anything
/// outside the registrable ranges must never appear on the wire and become
/// an internal-error close.
pub fn sendable_close_code(code: u16) -> u16 {
    match code {
        1005 => CLOSE_NORMAL,
        1000..=1003 | 1007..=1013 | 3000..=4999 => code,
        _ => CLOSE_INTERNAL_ERROR,
    }
}

// ── Client side ──────────────────────────────────────────────────

/// A close frame for the client connection.
pub fn client_close(code: u16, reason: &str) -> ws::Message {
    ws::Message::Close(Some(ws::CloseFrame {
        code: sendable_close_code(code),
        reason: Utf8Bytes::from(reason.to_owned()),
    }))
}

// ── Upstream side ────────────────────────────────────────────────

/// A close frame for the upstream connection, carrying over the client's
/// close code and reason when it sent one.
pub fn upstream_close(frame: Option<&ws::CloseFrame>) -> tungstenite::Message {
    let frame = frame.map(|f| tungstenite::protocol::CloseFrame {
        code: CloseCode::from(sendable_close_code(f.code)),
        reason: tungstenite::Utf8Bytes::from(f.reason.as_str().to_owned()),
    });
    tungstenite::Message::Close(frame)
}

/// Close code of an upstream close frame, or [`CLOSE_NORMAL`] if it had none.
pub fn upstream_close_code(frame: Option<&tungstenite::protocol::CloseFrame>) -> u16 {
    frame.map_or(CLOSE_NORMAL, |f| u16::from(f.code))
}

// ── Data frames ──────────────────────────────────────────────────

/// Converts a client data frame for the upstream. Control frames yield `None`.
pub fn client_to_upstream(msg: ws::Message) -> Option<tungstenite::Message> {
    match msg {
        ws::Message::Text(text) => Some(tungstenite::Message::Text(
            tungstenite::Utf8Bytes::from(text.as_str().to_owned()),
        )),
        ws::Message::Binary(data) => Some(tungstenite::Message::Binary(data)),
        ws::Message::Ping(_) | ws::Message::Pong(_) | ws::Message::Close(_) => None,
    }
}

/// Converts an upstream data frame for the client. Control frames yield `None`.
pub fn upstream_to_client(msg: tungstenite::Message) -> Option<ws::Message> {
    match msg {
        tungstenite::Message::Text(text) => {
            Some(ws::Message::Text(Utf8Bytes::from(text.as_str().to_owned())))
        }
        tungstenite::Message::Binary(data) => Some(ws::Message::Binary(data)),
        tungstenite::Message::Ping(_)
        | tungstenite::Message::Pong(_)
        | tungstenite::Message::Close(_)
        | tungstenite::Message::Frame(_) => None,
    }
}
