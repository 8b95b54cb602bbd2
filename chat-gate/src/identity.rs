//! Request identity
//!
//! The gate does not authenticate anyone. The fronting gateway has already
//! done that and passes the user's ID in a trusted header; this module
//! lifts it into a typed request extension so later stages never look at
//! headers or untyped context.

use axum::{
    extract::{Request, State},
    http::HeaderName,
    middleware::Next,
    response::Response,
};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::trace;

/// Identity attached to a request by the upstream stage.
///
/// `user_id` is kept as received; it is only parsed when a gated route
/// needs it, so a malformed value can be reported back verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
}

impl Identity {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
        }
    }
}

/// Numeric user primary key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UserId(i32);

impl UserId {
    /// Create a user ID, rejecting negative keys
    pub fn new(id: i32) -> Option<Self> {
        (id >= 0).then_some(Self(id))
    }

    pub fn get(self) -> i32 {
        self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Error returned when a string is not a valid [`UserId`]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("'{0}' is not a valid user ID")]
pub struct ParseUserIdError(pub String);

impl FromStr for UserId {
    type Err = ParseUserIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<i32>()
            .ok()
            .and_then(UserId::new)
            .ok_or_else(|| ParseUserIdError(s.to_string()))
    }
}

/// Copies the trusted identity header into an [`Identity`] extension.
///
/// Requests without the header pass through untouched; whether that is
/// acceptable is decided by the admission stage for the route. A header
/// that is present but not visible ASCII is kept (lossily decoded) so it
/// is reported as an invalid user ID rather than as a missing one.
pub async fn identity_middleware(
    State(header): State<Arc<HeaderName>>,
    mut req: Request,
    next: Next,
) -> Response {
    let identity = req
        .headers()
        .get(&*header)
        .map(|v| Identity::new(String::from_utf8_lossy(v.as_bytes())));

    if let Some(identity) = identity {
        trace!("Request identity: {}", identity.user_id);
        req.extensions_mut().insert(identity);
    }

    next.run(req).await
}
