//! Show or change the sync endpoint.

use anyhow::{Context, Result};
use sharedkv_client::{PersistenceBridge, WebSocketTransport};

use super::Session;

/// Run the endpoint command. `None` prints the current endpoint.
pub async fn run(session: &Session, new: Option<String>) -> Result<()> {
    let Some(endpoint) = new else {
        let current = session.endpoint().await?;
        if current.is_empty() {
            println!("(sync disabled)");
        } else {
            println!("{current}");
        }
        return Ok(());
    };

    let endpoint = endpoint.trim().to_string();
    if !endpoint.is_empty() {
        WebSocketTransport::parse_endpoint(&endpoint)?;
    }
    session
        .persistence
        .save_endpoint(&endpoint)
        .await
        .context("Failed to save endpoint")?;

    if endpoint.is_empty() {
        println!("Sync disabled");
    } else {
        println!("Endpoint set to {endpoint}");
    }
    Ok(())
}
