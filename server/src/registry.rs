//! # Session Registry
//!
//! Maps each guest id to the upstream connection currently serving it. At
//! most one entry exists per guest.
//!
//! - **register** overwrites unconditionally (last open wins) and hands the
//!   displaced handle back to the caller. It never closes anything itself.
//! - **unregister** is compare-and-remove: a session tearing down only removes
//!   the entry if it still points at that same session, so a stale close
//!   cannot clobber a newer registration for the same guest.
//!
//! Backed by [`DashMap`], so mutations for different guests only contend on
//! a shard lock and each operation is atomic per key.

use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::debug;
use uuid::Uuid;

/// Identity of one session's upstream connection, as stored in the registry.
///
/// Cloning shares the same displacement signal. Two handles are equal when
/// they belong to the same session.
#[derive(Clone)]
pub struct UpstreamHandle {
    session_id: Uuid,
    displaced: Arc<Notify>,
}

impl UpstreamHandle {
    pub fn new() -> Self {
        Self {
            session_id: Uuid::new_v4(),
            displaced: Arc::new(Notify::new()),
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Asks the owning session to close because a newer session took its slot.
    ///
    /// The signal is remembered if the session is not waiting yet.
    pub fn displace(&self) {
        self.displaced.notify_one();
    }

    /// Resolves once [`displace`](Self::displace) has been called.
    pub async fn displaced(&self) {
        self.displaced.notified().await;
    }
}

impl Default for UpstreamHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for UpstreamHandle {
    fn eq(&self, other: &Self) -> bool {
        self.session_id == other.session_id
    }
}

impl Eq for UpstreamHandle {}

impl fmt::Debug for UpstreamHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("UpstreamHandle").field(&self.session_id).finish()
    }
}

/// Registry of active sessions keyed by guest id. Cheap to clone.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<DashMap<u32, UpstreamHandle>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `handle` for `guest_id`, returning whatever it replaced.
    pub fn register(&self, guest_id: u32, handle: UpstreamHandle) -> Option<UpstreamHandle> {
        debug!(guest_id, session_id = %handle.session_id, "registering session");
        self.sessions.insert(guest_id, handle)
    }

    pub fn lookup(&self, guest_id: u32) -> Option<UpstreamHandle> {
        self.sessions.get(&guest_id).map(|entry| entry.value().clone())
    }

    /// Removes the entry for `guest_id` only if it is `handle`.
    ///
    /// Returns `true` if an entry was removed.
    pub fn unregister(&self, guest_id: u32, handle: &UpstreamHandle) -> bool {
        let removed = self
            .sessions
            .remove_if(&guest_id, |_, current| current == handle)
            .is_some();
        debug!(guest_id, session_id = %handle.session_id, removed, "unregistering session");
        removed
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
