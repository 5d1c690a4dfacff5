//! # Relay Session
//!
//! Drives one client connection and its upstream counterpart from upgrade
//! to teardown.
//!
//! ## States
//!
//! ```text
//! Connecting ──upstream open──▶ Active ──either side closes/fails──▶ Closing ──▶ Closed
//!     │                                                                         ▲
//!     └──────────────────────────upstream connect failed───────────────────────┘
//! ```
//!
//! While `Active`, a single task selects over both connections and forwards
//! each data frame unmodified before reading the next one from the same
//! side, so frames in one direction keep their order. The session is the
//! only owner of both connections and the only place that closes one in
//! reaction to the other. Teardown always deregisters first, then closes the
//! other side.

use crate::error::RelayError;
use crate::protocol::{
    client_close, client_to_upstream, upstream_close, upstream_close_code, upstream_to_client,
    CloseReason, CLOSE_NORMAL, SESSION_REPLACED, UPSTREAM_CLOSED_REASON, UPSTREAM_CONNECT_FAILED,
    UPSTREAM_ERROR, UPSTREAM_NOT_FOUND,
};
use crate::registry::UpstreamHandle;
use crate::state::AppState;
use crate::upstream::UpstreamStream;
use axum::extract::ws::{self, WebSocket};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use relay_protocol::ConnectionDescriptor;
use tokio_tungstenite::tungstenite;
use tracing::{debug, error, info, warn};

/// Lifecycle state of a relay session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Client upgraded, upstream connection being opened.
    Connecting,
    /// Upstream open and registered; frames are being forwarded.
    Active,
    /// One side closed or failed; the other is being closed.
    Closing,
    /// Both sides released.
    Closed,
}

/// Something that happened on one of the session's connections.
enum Event {
    Client(Option<Result<ws::Message, axum::Error>>),
    Upstream(Option<Result<tungstenite::Message, tungstenite::Error>>),
    Displaced,
}

enum Flow {
    Continue,
    Stop,
}

/// Bookkeeping shared by every state of a session.
struct Session {
    guest_id: u32,
    handle: UpstreamHandle,
    state: SessionState,
}

impl Session {
    fn transition(&mut self, next: SessionState) {
        debug!(
            guest_id = self.guest_id,
            session_id = %self.handle.session_id(),
            from = ?self.state,
            to = ?next,
            "session state change"
        );
        self.state = next;
    }
}

/// Runs a session to completion. Spawned once per upgraded client connection.
pub async fn run_session(socket: WebSocket, descriptor: ConnectionDescriptor, app: AppState) {
    let mut session = Session {
        guest_id: descriptor.guest_id,
        handle: UpstreamHandle::new(),
        state: SessionState::Connecting,
    };
    info!(
        guest_id = session.guest_id,
        session_id = %session.handle.session_id(),
        guest_type = %descriptor.guest_type,
        node = %descriptor.node,
        "session connecting"
    );

    let (mut client_tx, client_rx) = socket.split();

    let upstream = match app.connector.connect(&descriptor).await {
        Ok(upstream) => upstream,
        Err(e) => {
            warn!(
                guest_id = session.guest_id,
                session_id = %session.handle.session_id(),
                error = %e,
                "upstream connect failed"
            );
            let _ = client_tx.send(close_message(UPSTREAM_CONNECT_FAILED)).await;
            session.transition(SessionState::Closed);
            return;
        }
    };
    let (upstream_tx, upstream_rx) = upstream.split();

    let mut relay = Relay {
        session,
        app,
        client: client_tx,
        upstream: upstream_tx,
    };
    relay.on_upstream_open();
    relay.forward(client_rx, upstream_rx).await;
}

fn close_message(reason: CloseReason) -> ws::Message {
    client_close(reason.code, reason.reason)
}

/// An active session: owns the write half of both connections.
struct Relay {
    session: Session,
    app: AppState,
    client: SplitSink<WebSocket, ws::Message>,
    upstream: SplitSink<UpstreamStream, tungstenite::Message>,
}

impl Relay {
    fn guest_id(&self) -> u32 {
        self.session.guest_id
    }

    // ── Connecting → Active ──────────────────────────────────────

    fn on_upstream_open(&mut self) {
        let guest_id = self.guest_id();
        if let Some(previous) = self.app.registry.register(guest_id, self.session.handle.clone()) {
            warn!(
                guest_id,
                session_id = %self.session.handle.session_id(),
                displaced_session_id = %previous.session_id(),
                close_displaced = self.app.close_displaced,
                "replacing existing session for guest"
            );
            if self.app.close_displaced {
                previous.displace();
            }
        }
        self.session.transition(SessionState::Active);
        info!(
            guest_id,
            session_id = %self.session.handle.session_id(),
            "session active"
        );
    }

    // ── Active ───────────────────────────────────────────────────

    async fn forward<C, U>(mut self, mut client_rx: C, mut upstream_rx: U)
    where
        C: futures::Stream<Item = Result<ws::Message, axum::Error>> + Unpin,
        U: futures::Stream<Item = Result<tungstenite::Message, tungstenite::Error>> + Unpin,
    {
        let close_displaced = self.app.close_displaced;
        let handle = self.session.handle.clone();

        // One frame at a time from either side; each is fully handled before
        // the next read, which keeps per-direction order. The displacement
        // branch is only armed when displaced sessions are closed.

        loop {
            let event = tokio::select! {
                frame = client_rx.next() => Event::Client(frame),
                frame = upstream_rx.next() => Event::Upstream(frame),
                _ = handle.displaced(), if close_displaced => Event::Displaced,
            };

            // Dispatch to the handler for the side that produced the event
            let flow = match event {
                Event::Client(frame) => self.on_client_frame(frame).await,
                Event::Upstream(frame) => self.on_upstream_frame(frame).await,
                Event::Displaced => self.on_displaced().await,
            };
            if let Flow::Stop = flow {
                break;
            }
        }

        self.session.transition(SessionState::Closed);
        info!(
            guest_id = self.guest_id(),
            session_id = %self.session.handle.session_id(),
            "session closed"
        );
    }

    async fn on_client_frame(&mut self, frame: Option<Result<ws::Message, axum::Error>>) -> Flow {
        match frame {
            Some(Ok(ws::Message::Close(frame))) => self.on_client_close(frame.as_ref()).await,
            Some(Ok(msg)) => {
                // Pings and pongs stay on this hop
                let Some(msg) = client_to_upstream(msg) else {
                    return Flow::Continue;
                };

                // The guest must still have a registered upstream
                if self.app.registry.lookup(self.guest_id()).is_none() {
                    return self.on_missing_upstream().await;
                }
                match self.upstream.send(msg).await {
                    Ok(()) => Flow::Continue,
                    Err(e) => self.on_upstream_error(e).await,
                }
            }
            // A read error or end of stream is treated as a close without a frame
            Some(Err(e)) => {
                debug!(guest_id = self.guest_id(), error = %e, "client read failed");
                self.on_client_close(None).await
            }
            None => self.on_client_close(None).await,
        }
    }

    async fn on_upstream_frame(
        &mut self,
        frame: Option<Result<tungstenite::Message, tungstenite::Error>>,
    ) -> Flow {
        match frame {
            Some(Ok(tungstenite::Message::Close(frame))) => {
                self.on_upstream_close(upstream_close_code(frame.as_ref())).await
            }
            Some(Ok(msg)) => {
                let Some(msg) = upstream_to_client(msg) else {
                    return Flow::Continue;
                };
                match self.client.send(msg).await {
                    Ok(()) => Flow::Continue,
                    Err(e) => {
                        debug!(guest_id = self.guest_id(), error = %e, "client write failed");
                        self.on_client_close(None).await
                    }
                }
            }
            Some(Err(e)) => self.on_upstream_error(e).await,
            // Stream ended without a close frame
            None => self.on_upstream_close(CLOSE_NORMAL).await,
        }
    }

    // ── Active → Closing ─────────────────────────────────────────

    async fn on_client_close(&mut self, frame: Option<&ws::CloseFrame>) -> Flow {
        self.session.transition(SessionState::Closing);
        info!(
            guest_id = self.guest_id(),
            session_id = %self.session.handle.session_id(),
            code = ?frame.map(|f| f.code),
            "client closed"
        );
        self.unregister();

        // Pass the client's code and reason on to the upstream
        let _ = self.upstream.send(upstream_close(frame)).await;

        // Completes the client's close handshake: flushes the close reply
        // queued when its close frame was read
        let _ = self.client.close().await;
        Flow::Stop
    }

    async fn on_upstream_close(&mut self, code: u16) -> Flow {
        self.session.transition(SessionState::Closing);
        info!(
            guest_id = self.guest_id(),
            session_id = %self.session.handle.session_id(),
            code,
            "upstream closed"
        );
        self.unregister();

        // Flushes the close reply tungstenite queued for the upstream
        let _ = self.upstream.close().await;

        // Relay the upstream's code to the client, sanitized for the wire
        let _ = self.client.send(client_close(code, UPSTREAM_CLOSED_REASON)).await;
        Flow::Stop
    }

    async fn on_upstream_error(&mut self, err: tungstenite::Error) -> Flow {
        self.session.transition(SessionState::Closing);
        let err = RelayError::UpstreamProtocol(err.to_string());
        warn!(
            guest_id = self.guest_id(),
            session_id = %self.session.handle.session_id(),
            error = %err,
            "upstream failed"
        );
        self.unregister();
        let _ = self.client.send(close_message(UPSTREAM_ERROR)).await;
        Flow::Stop
    }

    async fn on_missing_upstream(&mut self) -> Flow {
        self.session.transition(SessionState::Closing);
        let err = RelayError::RegistryInvariantViolation(self.guest_id());
        error!(
            guest_id = self.guest_id(),
            session_id = %self.session.handle.session_id(),
            error = %err,
            "client frame for a guest with no registered upstream"
        );
        // Nothing to forward to: close both sides
        self.unregister();
        let _ = self.client.send(close_message(UPSTREAM_NOT_FOUND)).await;
        let _ = self.upstream.send(tungstenite::Message::Close(None)).await;
        Flow::Stop
    }

    async fn on_displaced(&mut self) -> Flow {
        self.session.transition(SessionState::Closing);
        info!(
            guest_id = self.guest_id(),
            session_id = %self.session.handle.session_id(),
            "session replaced by a newer one"
        );
        // No-op in the registry if the newer session already holds the slot
        self.unregister();
        let _ = self.client.send(close_message(SESSION_REPLACED)).await;
        let _ = self.upstream.send(tungstenite::Message::Close(None)).await;
        Flow::Stop
    }

    /// Removes this session's registry entry if it is still the current one.
    fn unregister(&self) {
        let removed = self
            .app
            .registry
            .unregister(self.guest_id(), &self.session.handle);
        if !removed {
            debug!(
                guest_id = self.guest_id(),
                session_id = %self.session.handle.session_id(),
                "registry entry already replaced"
            );
        }
    }
}
