//! Show settings, config and store summary.

use anyhow::Result;
use std::path::Path;

use super::Session;

/// Run the status command.
pub async fn run(session: &Session, config_path: &Path) -> Result<()> {
    println!("=== sharedkv status ===");
    println!();

    println!("Settings: {}", session.settings.display());
    println!("Entries:  {}", session.kv.len());

    let endpoint = session.endpoint().await?;
    println!();
    println!("Sync:");
    if endpoint.is_empty() {
        println!("  Endpoint: (disabled)");
    } else {
        println!("  Endpoint: {endpoint}");
    }

    let sync = &session.config.sync;
    println!("  Retry:    {}ms", sync.retry_delay_ms);
    println!("  Echoes:   {:?}", sync.echo_policy);
    println!("  Origin:   {}", if sync.tag_origin { "tagged" } else { "untagged" });

    println!();
    println!("Config: {}", config_path.display());
    if !config_path.exists() {
        println!("  (not present, using defaults)");
    }
    println!(
        "  Watch:  debounce {}ms, poll {}ms",
        session.config.watch.debounce_ms, session.config.watch.poll_interval_ms
    );

    Ok(())
}
