//! # Connection Descriptor
//!
//! The payload a trusted backend hands to the relay (encrypted) to describe
//! which guest console to open and which short-lived credentials to use.
//!
//! On the wire the descriptor is a JSON object with camelCase field names:
//!
//! ```json
//! {
//!   "guestId": 1000,
//!   "guestType": "qemu",
//!   "host": "pve01.example.com",
//!   "node": "pve01",
//!   "authTicket": "PVEAPIToken=root@pam!relay=...",
//!   "consoleTicket": "PVEVNC:...",
//!   "port": 5900
//! }
//! ```
//!
//! Deserialization goes through [`validate`](crate::validate) rather than a
//! serde derive so that every violated field can be reported at once.

use serde::Serialize;
use std::fmt;

/// Kind of guest whose console is being accessed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GuestType {
    /// A full virtual machine.
    Qemu,
    /// A system container.
    Lxc,
}

impl GuestType {
    pub fn as_str(&self) -> &'static str {
        match self {
            GuestType::Qemu => "qemu",
            GuestType::Lxc => "lxc",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "qemu" => Some(GuestType::Qemu),
            "lxc" => Some(GuestType::Lxc),
            _ => None,
        }
    }
}

impl fmt::Display for GuestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated connection descriptor.
///
/// Values of this type only come out of [`validate`](crate::validate) (or are
/// built directly by the encrypting side), so every invariant holds: positive
/// guest id, hostname-shaped `host`/`node`, non-empty tickets and a non-zero
/// port.
#[derive(Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionDescriptor {
    pub guest_id: u32,
    pub guest_type: GuestType,
    pub host: String,
    pub node: String,
    pub auth_ticket: String,
    pub console_ticket: String,
    pub port: u16,
}

impl ConnectionDescriptor {
    /// JSON form of the descriptor, ready to be passed to [`encode`](crate::encode).
    pub fn to_json(&self) -> String {
        // Serializing plain strings and integers cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}

// Tickets are credentials; keep them out of logs.
impl fmt::Debug for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionDescriptor")
            .field("guest_id", &self.guest_id)
            .field("guest_type", &self.guest_type)
            .field("host", &self.host)
            .field("node", &self.node)
            .field("auth_ticket", &"<redacted>")
            .field("console_ticket", &"<redacted>")
            .field("port", &self.port)
            .finish()
    }
}
