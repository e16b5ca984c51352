//! Print one value.

use anyhow::{bail, Result};

use super::{render, Session};

/// Run the get command.
pub fn run(session: &Session, key: &str) -> Result<()> {
    match session.kv.get(key) {
        Some(value) => {
            println!("{}", render(&value));
            Ok(())
        }
        None => bail!("Key not found: {key}"),
    }
}
