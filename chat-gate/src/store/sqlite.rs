//! SQLite-backed quota store
//!
//! Reads message counts from `chat_message` and per-user ceilings from
//! `auth_user_management`. Both tables belong to the chat service; the gate
//! only creates them when asked to, so a fresh development database works
//! out of the box.
//!
//! # Usage
//! ```no_run
//! use chat_gate::config::DatabaseConfig;
//! use chat_gate::identity::UserId;
//! use chat_gate::store::{SqliteStore, UsageSource};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = SqliteStore::connect(&DatabaseConfig::default()).await?;
//! store.ensure_schema().await?;
//!
//! let user = UserId::new(7).unwrap();
//! let count = store.message_count(user).await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use tracing::{debug, info};

use super::{LimitSource, QuotaStore, StoreError, UsageSource};
use crate::config::DatabaseConfig;
use crate::identity::UserId;

/// Quota store on a shared SQLite pool
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Connect using the database section of the configuration
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(&config.url)?.create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await?;

        info!("Connected to quota database at {}", config.url);
        Ok(Self { pool })
    }

    /// Wrap an existing pool
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the message and limit tables if they do not exist
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chat_message (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                content TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_chat_message_user ON chat_message (user_id)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS auth_user_management (
                user_id INTEGER PRIMARY KEY,
                rate_limit INTEGER NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        debug!("Quota schema ready");
        Ok(())
    }

    /// Store a message for a user.
    ///
    /// Not used by the gate itself; operators and tests use it to seed data.
    pub async fn record_message(&self, user: UserId, content: &str) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO chat_message (user_id, content) VALUES (?, ?)")
            .bind(user.get())
            .bind(content)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Configure the ceiling for a user
    pub async fn set_rate_limit(&self, user: UserId, limit: i32) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO auth_user_management (user_id, rate_limit)
            VALUES (?, ?)
            ON CONFLICT(user_id) DO UPDATE SET
                rate_limit = excluded.rate_limit,
                updated_at = datetime('now')
            "#,
        )
        .bind(user.get())
        .bind(limit)
        .execute(&self.pool)
        .await?;

        info!("Rate limit for user {} set to {}", user, limit);
        Ok(())
    }

    /// Remove a user's configured ceiling, reverting them to the default
    pub async fn clear_rate_limit(&self, user: UserId) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM auth_user_management WHERE user_id = ?")
            .bind(user.get())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl UsageSource for SqliteStore {
    async fn message_count(&self, user: UserId) -> Result<i64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chat_message WHERE user_id = ?")
            .bind(user.get())
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

#[async_trait]
impl LimitSource for SqliteStore {
    async fn rate_limit(&self, user: UserId) -> Result<Option<i32>, StoreError> {
        let limit: Option<i32> =
            sqlx::query_scalar("SELECT rate_limit FROM auth_user_management WHERE user_id = ?")
                .bind(user.get())
                .fetch_optional(&self.pool)
                .await?;
        Ok(limit)
    }
}

#[async_trait]
impl QuotaStore for SqliteStore {
    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn test_store() -> (SqliteStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let config = DatabaseConfig {
            url: format!("sqlite://{}", dir.path().join("quota.db").display()),
            max_connections: 2,
            create_schema: true,
        };
        let store = SqliteStore::connect(&config).await.unwrap();
        store.ensure_schema().await.unwrap();
        (store, dir)
    }

    fn user(id: i32) -> UserId {
        UserId::new(id).unwrap()
    }

    #[tokio::test]
    async fn test_message_count_empty() {
        let (store, _dir) = test_store().await;
        assert_eq!(store.message_count(user(7)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_message_count_per_user() {
        let (store, _dir) = test_store().await;

        for _ in 0..3 {
            store.record_message(user(7), "hello").await.unwrap();
        }
        store.record_message(user(8), "hi").await.unwrap();

        assert_eq!(store.message_count(user(7)).await.unwrap(), 3);
        assert_eq!(store.message_count(user(8)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_rate_limit_missing_row() {
        let (store, _dir) = test_store().await;
        assert_eq!(store.rate_limit(user(7)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_set_and_clear_rate_limit() {
        let (store, _dir) = test_store().await;

        store.set_rate_limit(user(7), 25).await.unwrap();
        assert_eq!(store.rate_limit(user(7)).await.unwrap(), Some(25));

        store.set_rate_limit(user(7), 40).await.unwrap();
        assert_eq!(store.rate_limit(user(7)).await.unwrap(), Some(40));

        store.clear_rate_limit(user(7)).await.unwrap();
        assert_eq!(store.rate_limit(user(7)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_missing_table_is_an_error() {
        let dir = TempDir::new().unwrap();
        let config = DatabaseConfig {
            url: format!("sqlite://{}", dir.path().join("empty.db").display()),
            max_connections: 1,
            create_schema: false,
        };
        let store = SqliteStore::connect(&config).await.unwrap();

        assert!(store.message_count(user(7)).await.is_err());
        assert!(store.rate_limit(user(7)).await.is_err());
        assert!(store.ping().await.is_ok());
    }
}
