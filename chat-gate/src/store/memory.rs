//! In-memory quota store
//!
//! Keeps counts and ceilings in maps behind a `RwLock`. Failures can be
//! switched on per lookup so the gate's fail-closed paths can be exercised
//! without a broken database, and every lookup is counted.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::RwLock;

use super::{LimitSource, QuotaStore, StoreError, UsageSource};
use crate::identity::UserId;

/// Quota store held entirely in memory
#[derive(Default)]
pub struct MemoryStore {
    counts: RwLock<HashMap<UserId, i64>>,
    limits: RwLock<HashMap<UserId, i32>>,
    fail_usage: AtomicBool,
    fail_limits: AtomicBool,
    lookups: AtomicUsize,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the message count for a user
    pub async fn set_message_count(&self, user: UserId, count: i64) {
        self.counts.write().await.insert(user, count);
    }

    /// Add one message to a user's count
    pub async fn record_message(&self, user: UserId) {
        let mut counts = self.counts.write().await;
        let count = counts.entry(user).or_insert(0);
        *count = count.saturating_add(1);
    }

    /// Configure the ceiling for a user
    pub async fn set_rate_limit(&self, user: UserId, limit: i32) {
        self.limits.write().await.insert(user, limit);
    }

    /// Remove a user's configured ceiling
    pub async fn clear_rate_limit(&self, user: UserId) {
        self.limits.write().await.remove(&user);
    }

    /// Make message count lookups fail
    pub fn fail_usage_lookups(&self, fail: bool) {
        self.fail_usage.store(fail, Ordering::SeqCst);
    }

    /// Make rate limit lookups fail
    pub fn fail_limit_lookups(&self, fail: bool) {
        self.fail_limits.store(fail, Ordering::SeqCst);
    }

    /// Total lookups served (successful or not)
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UsageSource for MemoryStore {
    async fn message_count(&self, user: UserId) -> Result<i64, StoreError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);

        if self.fail_usage.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(
                "message count lookup disabled".to_string(),
            ));
        }

        Ok(self.counts.read().await.get(&user).copied().unwrap_or(0))
    }
}

#[async_trait]
impl LimitSource for MemoryStore {
    async fn rate_limit(&self, user: UserId) -> Result<Option<i32>, StoreError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);

        if self.fail_limits.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(
                "rate limit lookup disabled".to_string(),
            ));
        }

        Ok(self.limits.read().await.get(&user).copied())
    }
}

#[async_trait]
impl QuotaStore for MemoryStore {
    async fn ping(&self) -> Result<(), StoreError> {
        if self.fail_usage.load(Ordering::SeqCst) || self.fail_limits.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store failing".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: i32) -> UserId {
        UserId::new(id).unwrap()
    }

    #[tokio::test]
    async fn test_defaults() {
        let store = MemoryStore::new();
        assert_eq!(store.message_count(user(1)).await.unwrap(), 0);
        assert_eq!(store.rate_limit(user(1)).await.unwrap(), None);
        assert_eq!(store.lookups(), 2);
    }

    #[tokio::test]
    async fn test_record_message() {
        let store = MemoryStore::new();
        store.record_message(user(1)).await;
        store.record_message(user(1)).await;
        assert_eq!(store.message_count(user(1)).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let store = MemoryStore::new();
        store.fail_usage_lookups(true);
        assert!(store.message_count(user(1)).await.is_err());
        assert!(store.rate_limit(user(1)).await.is_ok());
        assert!(store.ping().await.is_err());

        store.fail_usage_lookups(false);
        store.fail_limit_lookups(true);
        assert!(store.message_count(user(1)).await.is_ok());
        assert!(store.rate_limit(user(1)).await.is_err());
    }
}
