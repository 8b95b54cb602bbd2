//! Per-user quota admission for the chat endpoints
//!
//! Every request to a gated path is checked against two lookups:
//! the user's cumulative message count and their configured ceiling.
//! The request is admitted while the count stays below the ceiling.
//!
//! - Ungated paths pass without touching either source
//! - A user with no configured ceiling gets the default (100)
//! - Any other lookup failure rejects the request (fail closed)
//! - Nothing is cached; both sources are queried on every gated request
//!
//! # Example
//! ```no_run
//! use chat_gate::admission::AdmissionCheck;
//! use chat_gate::identity::Identity;
//! use chat_gate::store::MemoryStore;
//! use std::sync::Arc;
//!
//! # async fn example() {
//! let store = Arc::new(MemoryStore::new());
//! let check = AdmissionCheck::new(store.clone(), store);
//!
//! let identity = Identity::new("7");
//! match check.check("/chat", Some(&identity)).await {
//!     Ok(admission) => println!("admitted: {:?}", admission),
//!     Err(rejection) => println!("rejected with {}", rejection.status()),
//! }
//! # }
//! ```

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::config::QuotaConfig;
use crate::error::AdmissionError;
use crate::identity::{Identity, UserId};
use crate::pipeline::{GateRequest, Stage};
use crate::store::{LimitSource, UsageSource};

/// Outcome of a successful check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Path is not gated; no lookups were made
    Bypassed,
    /// Usage is below the ceiling
    Admitted { user: UserId, usage: i64, limit: i32 },
}

/// Quota check for the gated chat routes
pub struct AdmissionCheck {
    usage: Arc<dyn UsageSource>,
    limits: Arc<dyn LimitSource>,
    gated_paths: HashSet<String>,
    default_limit: i32,
}

impl AdmissionCheck {
    /// Create a check for `/chat` and `/chat_stream` with the default ceiling
    pub fn new(usage: Arc<dyn UsageSource>, limits: Arc<dyn LimitSource>) -> Self {
        Self::with_policy(usage, limits, &QuotaConfig::default())
    }

    /// Create a check with an explicit policy
    pub fn with_policy(
        usage: Arc<dyn UsageSource>,
        limits: Arc<dyn LimitSource>,
        policy: &QuotaConfig,
    ) -> Self {
        Self {
            usage,
            limits,
            gated_paths: policy.gated_paths.iter().cloned().collect(),
            default_limit: policy.default_limit,
        }
    }

    /// Whether a decoded path is subject to the quota (exact match)
    pub fn is_gated(&self, path: &str) -> bool {
        self.gated_paths.contains(path)
    }

    /// Ceiling applied when a user has no configured limit
    pub fn default_limit(&self) -> i32 {
        self.default_limit
    }

    /// Decide whether a request may proceed
    pub async fn check(
        &self,
        path: &str,
        identity: Option<&Identity>,
    ) -> Result<Admission, AdmissionError> {
        if !self.is_gated(path) {
            return Ok(Admission::Bypassed);
        }

        let identity = identity.ok_or_else(|| {
            warn!("Gated request to {} without identity", path);
            AdmissionError::MissingIdentity
        })?;

        let user: UserId = identity.user_id.parse().map_err(|_| {
            warn!("Rejecting {}: invalid user ID '{}'", path, identity.user_id);
            AdmissionError::InvalidIdentifier(identity.user_id.clone())
        })?;

        let usage = self.usage.message_count(user).await.map_err(|e| {
            error!("Could not get message count for user {}: {}", user, e);
            AdmissionError::UsageLookup(e)
        })?;

        let limit = match self.limits.rate_limit(user).await {
            Ok(Some(limit)) => limit,
            Ok(None) => {
                debug!(
                    "No rate limit configured for user {}, using {}",
                    user, self.default_limit
                );
                self.default_limit
            }
            Err(e) => {
                error!("Could not get rate limit for user {}: {}", user, e);
                return Err(AdmissionError::LimitLookup(e));
            }
        };

        if usage >= i64::from(limit) {
            warn!(
                "Quota exceeded for user {} on {}: {} messages, limit {}",
                user, path, usage, limit
            );
            return Err(AdmissionError::QuotaExceeded { usage, limit });
        }

        debug!("Admitted user {} on {} ({}/{})", user, path, usage, limit);
        Ok(Admission::Admitted { user, usage, limit })
    }
}

#[async_trait]
impl Stage for AdmissionCheck {
    fn name(&self) -> &'static str {
        "quota"
    }

    async fn evaluate(&self, request: &GateRequest<'_>) -> Result<(), AdmissionError> {
        self.check(request.path, request.identity).await.map(|_| ())
    }
}

impl std::fmt::Debug for AdmissionCheck {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionCheck")
            .field("gated_paths", &self.gated_paths)
            .field("default_limit", &self.default_limit)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MockLimitSource, MockUsageSource, StoreError};
    use axum::http::StatusCode;

    fn check_with(usage: MockUsageSource, limits: MockLimitSource) -> AdmissionCheck {
        AdmissionCheck::new(Arc::new(usage), Arc::new(limits))
    }

    fn usage_returning(count: i64) -> MockUsageSource {
        let mut usage = MockUsageSource::new();
        usage
            .expect_message_count()
            .times(1)
            .returning(move |_| Ok(count));
        usage
    }

    fn limit_returning(limit: Option<i32>) -> MockLimitSource {
        let mut limits = MockLimitSource::new();
        limits
            .expect_rate_limit()
            .times(1)
            .returning(move |_| Ok(limit));
        limits
    }

    fn untouched() -> (MockUsageSource, MockLimitSource) {
        let mut usage = MockUsageSource::new();
        usage.expect_message_count().never();
        let mut limits = MockLimitSource::new();
        limits.expect_rate_limit().never();
        (usage, limits)
    }

    #[tokio::test]
    async fn test_ungated_path_makes_no_lookups() {
        let (usage, limits) = untouched();
        let check = check_with(usage, limits);

        for path in ["/other", "/chat/", "/chats", "/", "/health"] {
            let identity = Identity::new("7");
            assert_eq!(
                check.check(path, Some(&identity)).await.unwrap(),
                Admission::Bypassed
            );
            assert_eq!(check.check(path, None).await.unwrap(), Admission::Bypassed);
        }
    }

    #[tokio::test]
    async fn test_invalid_identifier_rejected_before_lookups() {
        let (usage, limits) = untouched();
        let check = check_with(usage, limits);

        let err = check
            .check("/chat", Some(&Identity::new("abc")))
            .await
            .unwrap_err();

        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert!(err.to_string().contains("'abc'"));
    }

    #[tokio::test]
    async fn test_missing_identity_rejected() {
        let (usage, limits) = untouched();
        let check = check_with(usage, limits);

        let err = check.check("/chat_stream", None).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_missing_limit_falls_back_to_default() {
        let check = check_with(usage_returning(50), limit_returning(None));

        let admission = check
            .check("/chat", Some(&Identity::new("7")))
            .await
            .unwrap();

        assert_eq!(
            admission,
            Admission::Admitted {
                user: UserId::new(7).unwrap(),
                usage: 50,
                limit: 100,
            }
        );
    }

    #[tokio::test]
    async fn test_default_ceiling_is_exactly_100() {
        let below = check_with(usage_returning(99), limit_returning(None));
        assert!(below.check("/chat", Some(&Identity::new("7"))).await.is_ok());

        let at = check_with(usage_returning(100), limit_returning(None));
        let err = at
            .check("/chat", Some(&Identity::new("7")))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AdmissionError::QuotaExceeded { usage: 100, limit: 100 }
        ));
    }

    #[tokio::test]
    async fn test_usage_at_configured_limit_rejected() {
        let check = check_with(usage_returning(100), limit_returning(Some(100)));

        let err = check
            .check("/chat_stream", Some(&Identity::new("7")))
            .await
            .unwrap_err();

        assert_eq!(err.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(err.to_string(), "Too Many Requests");
    }

    #[tokio::test]
    async fn test_configured_limit_overrides_default() {
        let check = check_with(usage_returning(150), limit_returning(Some(500)));
        assert!(check.check("/chat", Some(&Identity::new("7"))).await.is_ok());

        let check = check_with(usage_returning(5), limit_returning(Some(5)));
        assert!(check.check("/chat", Some(&Identity::new("7"))).await.is_err());
    }

    #[tokio::test]
    async fn test_zero_limit_blocks_everyone() {
        let check = check_with(usage_returning(0), limit_returning(Some(0)));
        let err = check
            .check("/chat", Some(&Identity::new("7")))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn test_usage_lookup_failure_is_server_error() {
        let mut usage = MockUsageSource::new();
        usage
            .expect_message_count()
            .times(1)
            .returning(|_| Err(StoreError::Unavailable("db down".to_string())));
        let mut limits = MockLimitSource::new();
        limits.expect_rate_limit().never();

        let err = check_with(usage, limits)
            .check("/chat", Some(&Identity::new("7")))
            .await
            .unwrap_err();

        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!err.to_string().contains("db down"));
    }

    #[tokio::test]
    async fn test_limit_lookup_failure_is_server_error() {
        let mut limits = MockLimitSource::new();
        limits
            .expect_rate_limit()
            .times(1)
            .returning(|_| Err(StoreError::Unavailable("db down".to_string())));

        let err = check_with(usage_returning(0), limits)
            .check("/chat", Some(&Identity::new("7")))
            .await
            .unwrap_err();

        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.to_string(), "Could not get rate limit.");
    }

    #[tokio::test]
    async fn test_lookups_use_parsed_user() {
        let mut usage = MockUsageSource::new();
        usage
            .expect_message_count()
            .withf(|user| user.get() == 42)
            .times(1)
            .returning(|_| Ok(1));
        let mut limits = MockLimitSource::new();
        limits
            .expect_rate_limit()
            .withf(|user| user.get() == 42)
            .times(1)
            .returning(|_| Ok(Some(10)));

        assert!(check_with(usage, limits)
            .check("/chat", Some(&Identity::new("42")))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_custom_policy() {
        let mut usage = MockUsageSource::new();
        usage.expect_message_count().times(1).returning(|_| Ok(3));
        let mut limits = MockLimitSource::new();
        limits.expect_rate_limit().times(1).returning(|_| Ok(None));

        let policy = QuotaConfig {
            default_limit: 3,
            gated_paths: vec!["/v2/chat".to_string()],
        };
        let check = AdmissionCheck::with_policy(Arc::new(usage), Arc::new(limits), &policy);

        assert!(!check.is_gated("/chat"));
        assert_eq!(check.default_limit(), 3);
        assert!(check
            .check("/v2/chat", Some(&Identity::new("1")))
            .await
            .is_err());
    }
}
