//! CLI subcommand implementations for topicbus.
//!
//! Each command drives a connected [`crate::Bus`] against a gameapctl-style
//! server:
//!
//! - [`messaging`] - raw request, stream, watch and exit
//! - [`services`] - service status table and node info
//!
//! # Usage
//!
//! ```ignore
//! use topicbus::commands;
//!
//! commands::messaging::request(&bus, "node-info", "node-info", timeout).await?;
//! commands::services::print_status(&bus, timeout).await?;
//! ```

pub mod messaging;
pub mod services;

use std::time::Duration;

use anyhow::{Context, Result};

use crate::request::Reply;
use crate::Bus;

/// Wait for the bus to open, bounded by `timeout`.
pub(crate) async fn ready(bus: &Bus, timeout: Duration) -> Result<()> {
    tokio::time::timeout(timeout, bus.wait_ready())
        .await
        .context("Timed out waiting for the connection to open")?
        .with_context(|| format!("Could not connect to {}", bus.connection().endpoint()))
}

/// Render one reply as `code<TAB>value`.
pub(crate) fn format_reply(reply: &Reply) -> String {
    format!("{}\t{}", reply.code, reply.value_text())
}
