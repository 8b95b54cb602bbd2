//! Error types for chat-gate

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::store::StoreError;

/// Result type alias for gate operations
pub type Result<T> = std::result::Result<T, GateError>;

/// Gate error types
#[derive(Error, Debug)]
pub enum GateError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(String),
}

/// Reasons a gated request is turned away.
///
/// The `Display` text is the plain-text body sent to the client, so
/// lookup failures never carry their cause into it.
#[derive(Error, Debug)]
pub enum AdmissionError {
    /// No identity was placed on the request by the upstream stage
    #[error("Not authenticated")]
    MissingIdentity,

    /// The request path is not valid percent-encoded UTF-8
    #[error("Error: '{0}' is not a valid request path.")]
    InvalidPath(String),

    /// The identity is not a non-negative integer user ID
    #[error("Error: '{0}' is not a valid user ID. Please enter a valid user ID.")]
    InvalidIdentifier(String),

    /// Message count lookup failed
    #[error("Could not get message count.")]
    UsageLookup(#[source] StoreError),

    /// Rate limit lookup failed for a reason other than a missing row
    #[error("Could not get rate limit.")]
    LimitLookup(#[source] StoreError),

    /// Usage is at or above the ceiling
    #[error("Too Many Requests")]
    QuotaExceeded { usage: i64, limit: i32 },
}

impl AdmissionError {
    /// HTTP status for this rejection
    pub fn status(&self) -> StatusCode {
        match self {
            AdmissionError::MissingIdentity => StatusCode::UNAUTHORIZED,
            AdmissionError::InvalidPath(_) | AdmissionError::InvalidIdentifier(_) => {
                StatusCode::BAD_REQUEST
            }
            AdmissionError::UsageLookup(_) | AdmissionError::LimitLookup(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            AdmissionError::QuotaExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
        }
    }

    /// Whether the rejection was caused by infrastructure rather than the caller
    pub fn is_dependency_failure(&self) -> bool {
        matches!(
            self,
            AdmissionError::UsageLookup(_) | AdmissionError::LimitLookup(_)
        )
    }
}

impl IntoResponse for AdmissionError {
    fn into_response(self) -> Response {
        (self.status(), self.to_string()).into_response()
    }
}
