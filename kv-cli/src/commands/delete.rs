//! Delete a key.

use anyhow::Result;

use super::Session;

/// Run the delete command.
pub async fn run(session: &Session, key: &str, publish: bool) -> Result<()> {
    if !session.kv.has(key) {
        eprintln!("Key not present: {key}");
    }
    session
        .edit(publish, |kv| {
            kv.delete(key);
            Ok(())
        })
        .await
}
