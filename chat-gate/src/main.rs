//! chat-gate: quota gate server
//!
//! Usage: `chat-gate [config.toml]`

use chat_gate::config::LoggingConfig;
use chat_gate::store::SqliteStore;
use chat_gate::{GateConfig, GateServer};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn init_logging(config: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let registry = tracing_subscriber::registry().with(filter);
    if config.format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = GateConfig::load(config_path.as_deref())?;

    init_logging(&config.logging);

    info!("Starting chat-gate v{}", env!("CARGO_PKG_VERSION"));
    match &config_path {
        Some(path) => info!("Configuration loaded from {}", path.display()),
        None => info!("No config file specified, using defaults and environment"),
    }

    let store = SqliteStore::connect(&config.database).await?;
    if config.database.create_schema {
        store.ensure_schema().await?;
    }

    let server = GateServer::new(config, Arc::new(store))?;
    server.run().await?;

    Ok(())
}
