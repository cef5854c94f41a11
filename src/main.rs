//! slircb - Straylight IRC Bot
//!
//! A persistent IRC client engine: wire parsing, connection state tracking,
//! handler dispatch with nested command expansion, and flood-safe reply
//! pacing with pagination and paste escalation.

mod client;
mod config;
mod dispatch;
mod error;
mod session;
mod spool;
mod transport;

use crate::client::Client;
use crate::config::Config;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.toml".to_string());

    let config = Config::load(&config_path).map_err(|e| {
        error!(path = %config_path, error = %e, "Failed to load config");
        e
    })?;

    info!(
        nick = %config.identity.nick,
        servers = config.servers.len(),
        "Starting slircb"
    );

    let client = Client::new(config)?;
    client.run().await?;
    Ok(())
}
