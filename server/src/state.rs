//! # Server State
//!
//! Holds the shared application state for the relay server:
//! - **Descriptor key**: the shared secret every payload is decrypted with
//! - **Session registry**: maps guest ids to the session serving them
//! - **Upstream connector**: opens authenticated console connections
//!
//! The state is cloned into every request handler; all fields are cheap,
//! reference-counted handles.

use crate::config::RelayConfig;
use crate::registry::SessionRegistry;
use crate::tls::TlsError;
use crate::upstream::UpstreamConnector;
use relay_protocol::DescriptorKey;
use std::sync::Arc;
use std::time::Instant;

/// Shared application state, cloned and passed to each request handler.
#[derive(Clone)]
pub struct AppState {
    /// Secret used to decrypt connection descriptors.
    pub key: Arc<DescriptorKey>,

    /// Registry of active sessions, keyed by guest id.
    pub registry: SessionRegistry,

    /// Connector for the console endpoints.
    pub connector: UpstreamConnector,

    /// Close a session when a newer one for the same guest registers.
    pub close_displaced: bool,

    /// When the server started; reported by the status endpoint.
    pub started_at: Instant,
}

impl AppState {
    /// Creates the state for a resolved configuration with an empty registry.
    pub fn new(config: &RelayConfig) -> Result<Self, TlsError> {
        Ok(Self {
            key: Arc::new(config.key.clone()),
            registry: SessionRegistry::new(),
            connector: UpstreamConnector::new(&config.upstream)?,
            close_displaced: config.close_displaced,
            started_at: Instant::now(),
        })
    }
}
