//! Shared fixtures: an in-process relay and a fake TLS console endpoint.

#![allow(dead_code)]

use relay_protocol::{encode, ConnectionDescriptor, DescriptorKey, GuestType};
use relay_server::config::{RelayConfig, UpstreamConfig, UpstreamTrust};
use relay_server::state::AppState;
use rustls::pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_rustls::{server::TlsStream, TlsAcceptor};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{self, header::AUTHORIZATION, StatusCode};
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};

pub const TIMEOUT: Duration = Duration::from_secs(5);
pub const API_TOKEN: &str = "PVEAPIToken=root@pam!relay=00000000-0000-0000-0000-000000000000";

/// Descriptor for a qemu guest on the local fake endpoint.
pub fn descriptor(guest_id: u32) -> ConnectionDescriptor {
    ConnectionDescriptor {
        guest_id,
        guest_type: GuestType::Qemu,
        host: "127.0.0.1".into(),
        node: "pve01".into(),
        auth_ticket: API_TOKEN.into(),
        console_ticket: "T".into(),
        port: 5900,
    }
}

// ─── Relay ──────────────────────────────────────────────────────

pub struct TestRelay {
    pub addr: SocketAddr,
    pub state: AppState,
    pub key: DescriptorKey,
}

impl TestRelay {
    /// Starts a relay whose upstream connections go to `upstream_port` on
    /// localhost without certificate verification.
    pub async fn start(upstream_port: u16, close_displaced: bool) -> Self {
        let key = DescriptorKey::generate();
        let config = RelayConfig {
            listen: "127.0.0.1:0".parse().unwrap(),
            key: key.clone(),
            upstream: UpstreamConfig {
                port: Some(upstream_port),
                trust: UpstreamTrust::Insecure,
            },
            close_displaced,
        };
        let state = AppState::new(&config).unwrap();

        let listener = TcpListener::bind(config.listen).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = relay_server::app(state.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, state, key }
    }

    pub fn payload(&self, descriptor: &ConnectionDescriptor) -> String {
        encode(descriptor.to_json().as_bytes(), &self.key)
    }

    pub fn ws_url(&self, payload: &str) -> String {
        format!("ws://{}/?payload={}", self.addr, payload)
    }

    pub fn http_url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Waits until the registry has no entry for `guest_id`.
    pub async fn wait_unregistered(&self, guest_id: u32) {
        tokio::time::timeout(TIMEOUT, async {
            while self.state.registry.lookup(guest_id).is_some() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("registry entry was not removed");
    }
}

// ─── Fake console endpoint ──────────────────────────────────────

pub type UpstreamWs = WebSocketStream<TlsStream<TcpStream>>;

/// One accepted upstream connection along with what the relay sent.
pub struct UpstreamConn {
    pub uri: String,
    pub authorization: Option<String>,
    pub ws: UpstreamWs,
}

pub struct FakeUpstream {
    pub port: u16,
    accepted: mpsc::UnboundedReceiver<UpstreamConn>,
}

impl FakeUpstream {
    pub async fn start() -> Self {
        Self::start_with(None).await
    }

    /// An endpoint that completes TLS but answers every WebSocket handshake
    /// with `status`.
    pub async fn rejecting(status: StatusCode) -> Self {
        Self::start_with(Some(status)).await
    }

    async fn start_with(reject: Option<StatusCode>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let acceptor = tls_acceptor();
        let (tx, accepted) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Ok((tcp, _)) = listener.accept().await {
                let acceptor = acceptor.clone();
                let tx = tx.clone();
                tokio::spawn(async move {
                    let Ok(tls) = acceptor.accept(tcp).await else {
                        return;
                    };
                    let mut uri = String::new();
                    let mut authorization = None;
                    let callback = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                        if let Some(status) = reject {
                            let mut refusal = http::Response::new(Some("refused".to_string()));
                            *refusal.status_mut() = status;
                            return Err(refusal);
                        }
                        uri = req.uri().to_string();
                        authorization = req
                            .headers()
                            .get(AUTHORIZATION)
                            .and_then(|v| v.to_str().ok())
                            .map(str::to_string);
                        Ok(resp)
                    };
                    if let Ok(ws) = accept_hdr_async(tls, callback).await {
                        let _ = tx.send(UpstreamConn {
                            uri,
                            authorization,
                            ws,
                        });
                    }
                });
            }
        });

        Self { port, accepted }
    }

    pub async fn accept(&mut self) -> UpstreamConn {
        tokio::time::timeout(TIMEOUT, self.accepted.recv())
            .await
            .expect("relay never connected upstream")
            .expect("fake upstream stopped")
    }
}

fn tls_acceptor() -> TlsAcceptor {
    let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    let cert = certified.cert.der().clone();
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(certified.key_pair.serialize_der()));

    let config = rustls::ServerConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .unwrap()
    .with_no_client_auth()
    .with_single_cert(vec![cert], key)
    .unwrap();
    TlsAcceptor::from(Arc::new(config))
}

/// A port nothing listens on.
pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}
