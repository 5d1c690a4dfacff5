//! # Descriptor Errors
//!
//! Failures raised while turning a wire string back into a
//! [`ConnectionDescriptor`](crate::ConnectionDescriptor).

use serde::Serialize;
use thiserror::Error;

/// A single field-level violation found by the validator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Issue {
    /// Name of the offending descriptor field (camelCase, as on the wire).
    pub field: String,
    /// Human-readable description of the violation.
    pub message: String,
}

impl Issue {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Errors produced by the descriptor codec and validator.
#[derive(Debug, Error)]
pub enum DescriptorError {
    /// The wire string or decrypted plaintext is not in the expected shape.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// The ciphertext could not be decrypted under the configured key.
    #[error("decryption failed: {0}")]
    DecryptionFailure(String),

    /// The plaintext parsed, but one or more fields violate the schema.
    #[error("descriptor validation failed ({} issue(s))", .0.len())]
    ValidationFailure(Vec<Issue>),
}

impl DescriptorError {
    /// Field-level issues carried by a validation failure, empty otherwise.
    pub fn issues(&self) -> &[Issue] {
        match self {
            DescriptorError::ValidationFailure(issues) => issues,
            _ => &[],
        }
    }
}

/// Errors produced when loading the shared secret.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("secret key is not valid hex")]
    InvalidHex,

    #[error("secret key must be 32 bytes (64 hex characters), got {0} bytes")]
    InvalidLength(usize),
}

pub type DescriptorResult<T> = Result<T, DescriptorError>;
