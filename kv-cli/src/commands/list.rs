//! List entries in store order.

use anyhow::Result;

use super::{render, Session};

/// Run the list command.
pub fn run(session: &Session, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(&session.kv.snapshot())?);
        return Ok(());
    }

    let entries = session.kv.entries();
    if entries.is_empty() {
        println!("(empty)");
    }
    for (position, (key, value)) in entries.iter().enumerate() {
        println!("{position:>4}  {key} = {}", render(value));
    }
    Ok(())
}
