//! Health checking for the chat backend
//!
//! Periodically probes the backend and keeps its last known status for
//! the readiness endpoint.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::error::{GateError, Result};

/// Health status of the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    /// Backend is healthy and accepting requests
    Healthy,
    /// Backend failed enough consecutive checks
    Unhealthy,
    /// Never checked
    Unknown,
}

/// Health check result
#[derive(Debug, Clone)]
pub struct HealthCheckResult {
    /// Current status
    pub status: HealthStatus,
    /// Last check timestamp
    pub last_check: Option<Instant>,
    /// Number of consecutive failures
    pub consecutive_failures: u32,
    /// Response time of last successful check (milliseconds)
    pub response_time_ms: Option<u64>,
}

impl Default for HealthCheckResult {
    fn default() -> Self {
        Self {
            status: HealthStatus::Unknown,
            last_check: None,
            consecutive_failures: 0,
            response_time_ms: None,
        }
    }
}

/// Health checker for the chat backend
pub struct HealthChecker {
    /// Probe URL (backend + health path)
    url: String,
    status: Arc<RwLock<HealthCheckResult>>,
    client: reqwest::Client,
    interval: Duration,
    /// Number of failures before marking unhealthy
    failure_threshold: u32,
}

impl HealthChecker {
    /// Create a checker probing `health_path` on `backend`
    pub fn new(backend: &str, health_path: &str) -> Result<Self> {
        Self::with_config(backend, health_path, 30, 5, 3)
    }

    /// Create with custom configuration
    pub fn with_config(
        backend: &str,
        health_path: &str,
        interval_secs: u64,
        timeout_secs: u64,
        failure_threshold: u32,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| GateError::Http(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            url: format!("{}{}", backend.trim_end_matches('/'), health_path),
            status: Arc::new(RwLock::new(HealthCheckResult::default())),
            client,
            interval: Duration::from_secs(interval_secs),
            failure_threshold,
        })
    }

    /// Current status
    pub async fn status(&self) -> HealthStatus {
        self.status.read().await.status
    }

    /// Detailed result of the last check
    pub async fn result(&self) -> HealthCheckResult {
        self.status.read().await.clone()
    }

    /// Perform a single health check
    pub async fn check(&self) {
        debug!("Health check: {}", self.url);
        let start = Instant::now();
        let outcome = self.client.get(&self.url).send().await;
        let elapsed = start.elapsed();

        let mut entry = self.status.write().await;
        entry.last_check = Some(Instant::now());

        let failure = match outcome {
            Ok(response) if response.status().is_success() => {
                entry.consecutive_failures = 0;
                entry.response_time_ms = Some(elapsed.as_millis() as u64);
                if entry.status != HealthStatus::Healthy {
                    info!("Backend {} is now healthy ({}ms)", self.url, elapsed.as_millis());
                }
                entry.status = HealthStatus::Healthy;
                return;
            }
            Ok(response) => format!("HTTP {}", response.status()),
            Err(e) => e.to_string(),
        };

        entry.consecutive_failures += 1;
        warn!(
            "Backend {} health check failed: {} (failures: {})",
            self.url, failure, entry.consecutive_failures
        );

        if entry.consecutive_failures >= self.failure_threshold {
            if entry.status != HealthStatus::Unhealthy {
                error!("Backend {} is now unhealthy", self.url);
            }
            entry.status = HealthStatus::Unhealthy;
        }
    }

    /// Start background health checking
    pub fn start_background_checks(self: Arc<Self>) {
        tokio::spawn(async move {
            info!("Starting backend health checks against {}", self.url);
            loop {
                self.check().await;
                tokio::time::sleep(self.interval).await;
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_health_checker_default() {
        let checker = HealthChecker::new("http://localhost:8080/", "/health").unwrap();
        assert_eq!(checker.status().await, HealthStatus::Unknown);
        assert_eq!(checker.url, "http://localhost:8080/health");
    }

    #[tokio::test]
    async fn test_unreachable_backend_becomes_unhealthy() {
        // Port 9 (discard) is not expected to serve HTTP
        let checker = HealthChecker::with_config("http://127.0.0.1:9", "/health", 1, 1, 2).unwrap();

        checker.check().await;
        assert_eq!(checker.status().await, HealthStatus::Unknown);
        assert_eq!(checker.result().await.consecutive_failures, 1);

        checker.check().await;
        assert_eq!(checker.status().await, HealthStatus::Unhealthy);
    }

    #[test]
    fn test_health_check_result_default() {
        let result = HealthCheckResult::default();
        assert_eq!(result.status, HealthStatus::Unknown);
        assert_eq!(result.consecutive_failures, 0);
        assert!(result.last_check.is_none());
    }
}
