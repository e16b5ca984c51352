//! Import and export the whole store.

use anyhow::{Context, Result};
use std::path::Path;
use tokio::io::AsyncReadExt;

use super::Session;

/// Replace the store with the JSON object in `file` (`-` reads stdin).
pub async fn import(session: &Session, file: &Path) -> Result<()> {
    let text = if file == Path::new("-") {
        let mut text = String::new();
        tokio::io::stdin()
            .read_to_string(&mut text)
            .await
            .context("Failed to read stdin")?;
        text
    } else {
        tokio::fs::read_to_string(file)
            .await
            .with_context(|| format!("Failed to read {}", file.display()))?
    };

    session.kv.import_json(&text).context("Invalid JSON")?;
    println!("Imported {} entries", session.kv.len());
    Ok(())
}

/// Write the store as pretty JSON to `file`, or stdout.
pub async fn export(session: &Session, file: Option<&Path>) -> Result<()> {
    let text = serde_json::to_string_pretty(&session.kv.snapshot())?;
    match file {
        Some(path) => tokio::fs::write(path, text + "\n")
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?,
        None => println!("{text}"),
    }
    Ok(())
}
