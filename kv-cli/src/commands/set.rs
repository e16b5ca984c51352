//! Set values, optionally at a position.

use anyhow::{Context, Result};

use super::{parse_value, Session};

/// Run the set command.
pub async fn run(session: &Session, key: &str, value: &str, raw: bool, publish: bool) -> Result<()> {
    let value = parse_value(value, raw);
    session
        .edit(publish, |kv| {
            kv.set(key, value);
            Ok(())
        })
        .await
}

/// Run the set-at command. Positional sets are never published.
pub async fn run_at(
    session: &Session,
    key: &str,
    value: &str,
    position: usize,
    raw: bool,
) -> Result<()> {
    let value = parse_value(value, raw);
    session
        .kv
        .set_at(key, value, position)
        .with_context(|| format!("Cannot move {key:?}"))?;
    Ok(())
}
