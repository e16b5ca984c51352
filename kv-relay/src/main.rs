//! sharedkv-relay binary entry point.
//!
//! Usage:
//! ```bash
//! sharedkv-relay --config relay.toml
//! ```

use anyhow::{Context, Result};
use sharedkv_relay::{Config, Relay};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config_path = get_config_path();
    let config = if config_path.exists() {
        Config::from_file(&config_path)?
    } else {
        tracing::info!("No config at {:?}, using defaults", config_path);
        Config::default()
    };

    tracing::info!("sharedkv-relay v{}", env!("CARGO_PKG_VERSION"));
    let relay = Arc::new(Relay::new(config.server));
    let listener = relay
        .bind()
        .await
        .with_context(|| format!("Failed to bind {}", relay.config().bind_address))?;

    relay
        .serve(listener, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await?;
    Ok(())
}

fn get_config_path() -> PathBuf {
    std::env::args()
        .skip_while(|arg| arg != "--config")
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("relay.toml"))
}
