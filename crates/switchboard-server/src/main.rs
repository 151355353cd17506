//! # Switchboard Server
//!
//! Real-time channel broker over WebSocket.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! switchboard
//!
//! # Run with a specific config file
//! SWITCHBOARD_CONFIG=/path/to/switchboard.toml switchboard
//!
//! # Run with environment variables
//! SWITCHBOARD_PORT=8080 SWITCHBOARD_HOST=0.0.0.0 switchboard
//! ```
//!
//! Clients connect to `ws://<host>:<port>/ServerChannel/<channel>`.

mod auth;
mod config;
mod handlers;
mod metrics;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "switchboard=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = config::Config::load()?;

    tracing::info!(
        "Starting Switchboard on {}:{} with {} shared channel(s)",
        config.host,
        config.port,
        config.channels.len()
    );

    handlers::run_server(config).await?;

    Ok(())
}
