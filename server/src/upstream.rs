//! # Upstream Connector
//!
//! Turns a validated [`ConnectionDescriptor`] into an authenticated
//! WebSocket connection to the real console endpoint:
//!
//! ```text
//! wss://<host>[:<upstream port>]/api2/json/nodes/<node>/<guestType>/<guestId>/vncwebsocket
//!     ?port=<port>&consoleTicket=<consoleTicket>
//! Authorization: <API token ticket> | PVEAuthCookie=<session ticket>
//! ```

use crate::config::UpstreamConfig;
use crate::error::{RelayError, RelayResult};
use crate::tls::{self, TlsError};
use relay_protocol::ConnectionDescriptor;
use rustls::ClientConfig;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{
    self,
    client::IntoClientRequest,
    http::{header::AUTHORIZATION, HeaderValue},
};
use tokio_tungstenite::{connect_async_tls_with_config, Connector, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};
use url::Url;

/// WebSocket connection to a console endpoint.
pub type UpstreamStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Auth tickets starting with this prefix are API tokens and are sent as-is.
pub const API_TOKEN_PREFIX: &str = "PVEAPIToken";

/// Cookie name used to wrap session tickets.
pub const AUTH_COOKIE_NAME: &str = "PVEAuthCookie";

/// Builds the console endpoint URL for `descriptor`.
///
/// `port_override` is appended to the authority when the host serves its
/// API on a non-default port. Query values decode back to exactly the
/// descriptor's `port` and `consoleTicket`.
pub fn build_target_url(
    descriptor: &ConnectionDescriptor,
    port_override: Option<u16>,
) -> Result<Url, url::ParseError> {
    let authority = match port_override {
        Some(port) => format!("{}:{}", descriptor.host, port),
        None => descriptor.host.clone(),
    };
    let mut url = Url::parse(&format!("wss://{authority}"))?;
    url.set_path(&format!(
        "/api2/json/nodes/{}/{}/{}/vncwebsocket",
        descriptor.node, descriptor.guest_type, descriptor.guest_id
    ));
    url.query_pairs_mut()
        .append_pair("port", &descriptor.port.to_string())
        .append_pair("consoleTicket", &descriptor.console_ticket);
    Ok(url)
}

/// Builds the `Authorization` header value for an auth ticket.
///
/// The descriptor does not say which kind of credential it carries, so the
/// literal prefix decides: API tokens pass through unchanged, anything else
/// is a session ticket in cookie form.
pub fn build_auth_header(auth_ticket: &str) -> String {
    if auth_ticket.starts_with(API_TOKEN_PREFIX) {
        auth_ticket.to_string()
    } else {
        format!("{AUTH_COOKIE_NAME}={auth_ticket}")
    }
}

/// Opens authenticated connections to console endpoints. Cheap to clone.
#[derive(Clone)]
pub struct UpstreamConnector {
    port: Option<u16>,
    tls: Arc<ClientConfig>,
}

impl UpstreamConnector {
    pub fn new(config: &UpstreamConfig) -> Result<Self, TlsError> {
        Ok(Self {
            port: config.port,
            tls: tls::client_config(&config.trust)?,
        })
    }

    pub fn target_url(&self, descriptor: &ConnectionDescriptor) -> RelayResult<Url> {
        build_target_url(descriptor, self.port)
            .map_err(|e| RelayError::UpstreamConnect(format!("invalid target url: {e}")))
    }

    /// Performs the TLS and WebSocket handshakes with the console endpoint.
    pub async fn connect(&self, descriptor: &ConnectionDescriptor) -> RelayResult<UpstreamStream> {
        let url = self.target_url(descriptor)?;
        // The query carries the console ticket; only log host and path.
        info!(
            guest_id = descriptor.guest_id,
            host = url.host_str().unwrap_or_default(),
            path = url.path(),
            "connecting upstream"
        );

        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| RelayError::UpstreamConnect(format!("invalid request: {e}")))?;
        let auth = HeaderValue::from_str(&build_auth_header(&descriptor.auth_ticket))
            .map_err(|_| RelayError::UpstreamConnect("auth ticket is not a valid header value".into()))?;
        request.headers_mut().insert(AUTHORIZATION, auth);

        let connector = Connector::Rustls(self.tls.clone());
        let (stream, response) = connect_async_tls_with_config(request, None, false, Some(connector))
            .await
            .map_err(handshake_error)?;

        debug!(guest_id = descriptor.guest_id, status = %response.status(), "upstream handshake complete");
        Ok(stream)
    }
}

fn handshake_error(err: tungstenite::Error) -> RelayError {
    match err {
        tungstenite::Error::Http(response) => RelayError::UpstreamConnect(format!(
            "upstream rejected handshake with status {}",
            response.status()
        )),
        other => RelayError::UpstreamConnect(other.to_string()),
    }
}
