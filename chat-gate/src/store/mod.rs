//! Quota data sources
//!
//! The admission check reads two things per gated request: how many
//! messages a user has stored, and the ceiling configured for them.
//! - [`sqlite`]: `SqliteStore`, the production backend
//! - [`memory`]: `MemoryStore`, for development and tests

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use thiserror::Error;

use crate::identity::UserId;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Failure reaching or querying a data source
#[derive(Error, Debug)]
pub enum StoreError {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Source is unreachable or refused the query
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Source of per-user message counts
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UsageSource: Send + Sync {
    /// Cumulative number of messages stored for the user.
    ///
    /// A user with no messages yields `Ok(0)`.
    async fn message_count(&self, user: UserId) -> Result<i64, StoreError>;
}

/// Source of per-user rate limit configuration
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LimitSource: Send + Sync {
    /// Configured ceiling for the user.
    ///
    /// `Ok(None)` means no limit row exists for the user, which is a
    /// normal outcome and not a failure.
    async fn rate_limit(&self, user: UserId) -> Result<Option<i32>, StoreError>;
}

/// A backend that serves both lookups and can report its own health
#[async_trait]
pub trait QuotaStore: UsageSource + LimitSource {
    /// Cheap round trip used by the readiness endpoint
    async fn ping(&self) -> Result<(), StoreError>;
}
