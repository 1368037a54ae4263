//! Raw messaging commands.
//!
//! ```bash
//! # One reply
//! topicbus request node-info node-info
//!
//! # Every reply until the server sends `end`
//! topicbus stream gameap-install "gameap-install --path=/srv/gameap"
//!
//! # Every frame on a topic until Ctrl-C
//! topicbus watch service-gameap-status
//! ```

use std::time::Duration;

use anyhow::{bail, Context, Result};

use super::{format_reply, ready};
use crate::Bus;

/// Send one request and print the first reply.
///
/// # Errors
///
/// Fails if the connection cannot be opened, closes early, or no reply
/// arrives within `timeout`. An `error` reply is printed and reported as an
/// error.
pub async fn request(bus: &Bus, topic: &str, message: &str, timeout: Duration) -> Result<()> {
    ready(bus, timeout).await?;

    let reply = tokio::time::timeout(timeout, bus.call(topic, message))
        .await
        .with_context(|| format!("No reply on '{}' within {}s", topic, timeout.as_secs()))??;

    println!("{}", format_reply(&reply));
    if reply.is_error() {
        bail!("Server reported an error on '{}'", topic);
    }
    Ok(())
}

/// Send one request and print every reply until `end`.
///
/// `timeout` bounds the wait for each individual reply.
pub async fn stream(bus: &Bus, topic: &str, message: &str, timeout: Duration) -> Result<()> {
    ready(bus, timeout).await?;

    let mut replies = bus.stream(topic, message);
    let mut failed = false;
    loop {
        let next = tokio::time::timeout(timeout, replies.next())
            .await
            .with_context(|| format!("No reply on '{}' within {}s", topic, timeout.as_secs()))?;
        let Some(reply) = next else {
            break;
        };
        failed |= reply.is_error();
        println!("{}", format_reply(&reply));
    }

    if failed {
        bail!("Server reported an error on '{}'", topic);
    }
    Ok(())
}

/// Print every frame on `topic` until Ctrl-C or the connection closes.
pub async fn watch(bus: &Bus, topic: &str, timeout: Duration) -> Result<()> {
    ready(bus, timeout).await?;

    let id = bus.subscribe(topic, |id, code, value| {
        println!("{}\t{}\t{}", id, code, value);
    });
    log::info!("Watching '{}' as {}", topic, id);

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for Ctrl-C")?;
        }
        () = bus.closed() => {
            log::info!("Connection closed");
        }
    }

    bus.unsubscribe(id);
    Ok(())
}

/// Ask the server to shut down and wait for it to close the connection.
pub async fn exit(bus: &Bus, timeout: Duration) -> Result<()> {
    ready(bus, timeout).await?;
    bus.exit();

    tokio::time::timeout(timeout, bus.closed())
        .await
        .context("Server did not close the connection")?;
    println!("Server closed the connection");
    Ok(())
}
