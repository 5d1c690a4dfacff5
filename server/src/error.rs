//! # Relay Errors
//!
//! Every failure the relay can hit, and how pre-upgrade failures turn into
//! the JSON error body returned to the caller:
//!
//! ```json
//! { "error": "invalid payload", "code": "VALIDATION_FAILURE", "issues": [ ... ] }
//! ```
//!
//! The body only ever carries fixed messages and the validator's field-level
//! issues. Underlying error detail is logged, never returned.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use relay_protocol::{DescriptorError, Issue};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};

#[derive(Debug, Error)]
pub enum RelayError {
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),

    #[error("missing payload query parameter")]
    MissingPayload,

    #[error("upstream connection failed: {0}")]
    UpstreamConnect(String),

    #[error("upstream protocol error: {0}")]
    UpstreamProtocol(String),

    #[error("no upstream registered for guest {0}")]
    RegistryInvariantViolation(u32),
}

/// JSON error body shared by every non-2xx response of the relay.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: &'static str,
    pub issues: Vec<Issue>,
}

impl ErrorBody {
    pub fn new(error: impl Into<String>, code: &'static str) -> Self {
        Self {
            error: error.into(),
            code,
            issues: Vec::new(),
        }
    }
}

impl RelayError {
    /// HTTP status, machine-readable code and client-facing message.
    fn parts(&self) -> (StatusCode, &'static str, &'static str) {
        match self {
            RelayError::Descriptor(DescriptorError::MalformedPayload(_)) => {
                (StatusCode::BAD_REQUEST, "MALFORMED_PAYLOAD", "malformed payload")
            }
            RelayError::Descriptor(DescriptorError::DecryptionFailure(_)) => (
                StatusCode::BAD_REQUEST,
                "DECRYPTION_FAILURE",
                "payload could not be decrypted",
            ),
            RelayError::Descriptor(DescriptorError::ValidationFailure(_)) => {
                (StatusCode::BAD_REQUEST, "VALIDATION_FAILURE", "invalid payload")
            }
            RelayError::MissingPayload => (
                StatusCode::BAD_REQUEST,
                "MISSING_PAYLOAD",
                "missing payload query parameter",
            ),
            RelayError::UpstreamConnect(_)
            | RelayError::UpstreamProtocol(_)
            | RelayError::RegistryInvariantViolation(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "internal error",
            ),
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let (status, code, message) = self.parts();
        if status.is_server_error() {
            error!(error = %self, "request failed");
        } else {
            warn!(error = %self, code, "rejected upgrade request");
        }

        let issues = match self {
            RelayError::Descriptor(DescriptorError::ValidationFailure(issues)) => issues,
            _ => Vec::new(),
        };
        let body = ErrorBody {
            error: message.to_string(),
            code,
            issues,
        };
        (status, Json(body)).into_response()
    }
}

pub type RelayResult<T> = Result<T, RelayError>;
