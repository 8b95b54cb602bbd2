//! Configuration for chat-gate
//!
//! Values are layered: built-in defaults, then an optional TOML file, then
//! `CHAT_GATE__<SECTION>__<KEY>` environment variables.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{GateError, Result};

/// Ceiling applied when a user has no configured rate limit
pub const DEFAULT_RATE_LIMIT: i32 = 100;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "CHAT_GATE";

/// Main gate configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct GateConfig {
    /// Server configuration
    pub server: ServerConfig,
    /// Quota database
    pub database: DatabaseConfig,
    /// Admission policy
    pub quota: QuotaConfig,
    /// Where the upstream identity is read from
    pub identity: IdentityConfig,
    /// Chat service receiving admitted traffic
    pub backend: BackendConfig,
    /// Logging
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address (e.g., "0.0.0.0:8080")
    pub listen_addr: String,
    /// Backend request timeout in seconds
    pub timeout_seconds: u64,
}

/// Database configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite URL (e.g., "sqlite://chat.db")
    pub url: String,
    /// Pool size
    pub max_connections: u32,
    /// Create the message and limit tables on startup
    pub create_schema: bool,
}

/// Admission policy
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct QuotaConfig {
    /// Ceiling for users without a configured limit
    pub default_limit: i32,
    /// Paths subject to the quota check (exact match)
    pub gated_paths: Vec<String>,
}

/// Identity propagation
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Trusted header carrying the user ID
    pub header: String,
}

/// Downstream chat service
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Backend URL (e.g., "http://localhost:3000")
    pub url: String,
    /// Health check path (e.g., "/health")
    pub health_check: Option<String>,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when RUST_LOG is unset
    pub level: String,
    /// "pretty" or "json"
    pub format: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            timeout_seconds: 30,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://chat.db".to_string(),
            max_connections: 5,
            create_schema: true,
        }
    }
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            default_limit: DEFAULT_RATE_LIMIT,
            gated_paths: vec!["/chat".to_string(), "/chat_stream".to_string()],
        }
    }
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            header: "x-user-id".to_string(),
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:3000".to_string(),
            health_check: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "chat_gate=info,tower_http=info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl GateConfig {
    /// Load configuration from defaults, an optional file, and the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let defaults = config::Config::try_from(&GateConfig::default())
            .map_err(|e| GateError::Config(format!("Failed to build defaults: {}", e)))?;

        let mut builder = config::Config::builder().add_source(defaults);

        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Toml)
                    .required(true),
            );
        }

        let config: GateConfig = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("quota.gated_paths"),
            )
            .build()
            .map_err(|e| GateError::Config(format!("Failed to load config: {}", e)))?
            .try_deserialize()
            .map_err(|e| GateError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file only
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| GateError::Config(format!("Failed to read config file: {}", e)))?;

        let config: GateConfig = toml::from_str(&content)
            .map_err(|e| GateError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Create a default development configuration
    pub fn development() -> Self {
        Self {
            server: ServerConfig {
                listen_addr: "127.0.0.1:8080".to_string(),
                ..ServerConfig::default()
            },
            database: DatabaseConfig {
                url: "sqlite://chat-dev.db".to_string(),
                ..DatabaseConfig::default()
            },
            logging: LoggingConfig {
                level: "chat_gate=debug,tower_http=debug".to_string(),
                ..LoggingConfig::default()
            },
            ..Self::default()
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.quota.gated_paths.is_empty() {
            return Err(GateError::Config("No gated paths configured".to_string()));
        }

        for path in &self.quota.gated_paths {
            if !path.starts_with('/') {
                return Err(GateError::Config(format!(
                    "Gated path '{}' must start with '/'",
                    path
                )));
            }
        }

        if self.quota.default_limit < 0 {
            return Err(GateError::Config(format!(
                "Default rate limit must not be negative, got {}",
                self.quota.default_limit
            )));
        }

        axum::http::HeaderName::try_from(self.identity.header.as_str()).map_err(|e| {
            GateError::Config(format!(
                "Invalid identity header '{}': {}",
                self.identity.header, e
            ))
        })?;

        url::Url::parse(&self.backend.url).map_err(|e| {
            GateError::Config(format!("Invalid backend URL '{}': {}", self.backend.url, e))
        })?;

        if self.database.max_connections == 0 {
            return Err(GateError::Config(
                "Database pool needs at least one connection".to_string(),
            ));
        }

        match self.logging.format.as_str() {
            "pretty" | "json" => Ok(()),
            other => Err(GateError::Config(format!(
                "Unknown log format '{}', expected 'pretty' or 'json'",
                other
            ))),
        }
    }
}
