//! # Relay Protocol
//!
//! Shared types for the console relay: the [`ConnectionDescriptor`] a trusted
//! backend encrypts, the codec that protects it in transit, and the
//! validator the relay runs on the decrypted plaintext.
//!
//! ```
//! use relay_protocol::{decode, encode, validate, ConnectionDescriptor, DescriptorKey, GuestType};
//!
//! let key = DescriptorKey::generate();
//! let descriptor = ConnectionDescriptor {
//!     guest_id: 1000,
//!     guest_type: GuestType::Qemu,
//!     host: "pve01.example.com".into(),
//!     node: "pve01".into(),
//!     auth_ticket: "PVEAPIToken=root@pam!relay=secret".into(),
//!     console_ticket: "PVEVNC:ticket".into(),
//!     port: 5900,
//! };
//!
//! let wire = encode(descriptor.to_json().as_bytes(), &key);
//! let plaintext = decode(&wire, &key).unwrap();
//! assert_eq!(validate(&plaintext).unwrap(), descriptor);
//! ```

pub mod codec;
pub mod descriptor;
pub mod error;
pub mod validate;

pub use codec::{decode, encode, DescriptorKey};
pub use descriptor::{ConnectionDescriptor, GuestType};
pub use error::{DescriptorError, DescriptorResult, Issue, KeyError};
pub use validate::{is_valid_hostname, validate};

/// Decodes a wire string and validates the plaintext in one step.
pub fn open(wire: &str, key: &DescriptorKey) -> DescriptorResult<ConnectionDescriptor> {
    let plaintext = decode(wire, key)?;
    validate(&plaintext)
}
