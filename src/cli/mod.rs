//! Command implementations for the `mailsieve` binary

pub mod ingest;
pub mod list;
pub mod review;
pub mod view;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::model::{FeedId, Fingerprint};

/// Print `value` as pretty JSON on stdout
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("serializing output")?;
    println!("{}", json);
    Ok(())
}

/// Accept `mail:<id>` or a bare mail id
pub fn parse_fingerprint(raw: &str) -> Fingerprint {
    if raw.contains(':') {
        Fingerprint::from(raw)
    } else {
        Fingerprint::from_source(FeedId::Mail, raw)
    }
}

/// First line of `text`, cut to `max` characters
fn truncate(text: &str, max: usize) -> String {
    let line = text.lines().next().unwrap_or("");
    if line.chars().count() > max {
        let cut: String = line.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", cut)
    } else {
        line.to_string()
    }
}
