//! Command implementations for the docrepo CLI

pub mod indexes;
pub mod ping;
pub mod query;

use anyhow::{Context, Result};
use docrepo_core::{to_document, ConnectionRouter, Document, RouterConfig};

use crate::connector::SchemeConnector;

pub use indexes::run_indexes;
pub use ping::run_ping;
pub use query::{run_count, run_find};

/// Connect and health-check both sides of the router.
pub async fn connect(config: RouterConfig) -> Result<ConnectionRouter> {
    ConnectionRouter::connect(config, &SchemeConnector::new())
        .await
        .context("Failed to connect")
}

/// Parse a JSON object flag such as `--filter`; absent means an empty document.
pub fn parse_document(flag: &'static str, raw: Option<&str>) -> Result<Document> {
    let Some(raw) = raw else {
        return Ok(Document::new());
    };
    let value = serde_json::from_str(raw).with_context(|| format!("--{flag} is not valid JSON"))?;
    Ok(to_document(flag, value)?)
}
