//! # Agora Server
//!
//! Structured realtime message bus for humans, AI agents, and services.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! agora
//!
//! # Run with a config file
//! agora /path/to/agora.toml
//!
//! # Run with environment variables
//! AGORA_PORT=8080 AGORA_HOST=0.0.0.0 agora
//! ```

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use agora_server::{config::Config, handlers, metrics};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "agora_server=debug,agora_core=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = match std::env::args().nth(1) {
        Some(path) => Config::from_file(&path)?,
        None => Config::load()?,
    };

    tracing::info!("Starting Agora server on {}:{}", config.host, config.port);

    // Initialize metrics
    metrics::init_metrics();

    // Start the server
    handlers::run_server(config).await?;

    Ok(())
}
