//! Service status and node info.
//!
//! Every service is queried on its own topic so the replies can be told apart
//! while all five requests are in flight on the same connection.

use std::fmt;
use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::future::join_all;

use super::{format_reply, ready};
use crate::request::Reply;
use crate::Bus;

/// Topic and `service-status` argument for each service shown in the table.
pub const SERVICES: &[(&str, &str)] = &[
    ("service-gameap-status", "gameap"),
    ("service-daemon-status", "gameap-daemon"),
    ("service-nginx-status", "nginx"),
    ("service-mysql-status", "mysql"),
    ("service-php-status", "php-fpm"),
];

/// Topic answered with a plain-text description of the host.
pub const NODE_INFO_TOPIC: &str = "node-info";

/// Reported state of one service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceStatus {
    /// Running.
    Active,
    /// Installed but stopped.
    Inactive,
    /// Not installed on the node.
    NotFound,
    /// Any other text the server sent back.
    Other(String),
    /// The server answered with an error frame, or never answered.
    Failed(String),
}

impl ServiceStatus {
    /// Interpret a reply to `service-status <name>`.
    #[must_use]
    pub fn from_reply(reply: &Reply) -> Self {
        if !reply.is_payload() {
            return Self::Failed(reply.value_text());
        }
        match reply.value_text().trim() {
            "active" => Self::Active,
            "inactive" => Self::Inactive,
            "not found" => Self::NotFound,
            other => Self::Other(other.to_string()),
        }
    }
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Inactive => write!(f, "inactive"),
            Self::NotFound => write!(f, "not found"),
            Self::Other(text) => write!(f, "{}", text),
            Self::Failed(reason) => write!(f, "error: {}", reason),
        }
    }
}

/// One row of the status table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceReport {
    /// Service name as shown to the user.
    pub name: String,
    /// What the server reported.
    pub status: ServiceStatus,
}

/// Query every entry in [`SERVICES`] concurrently.
///
/// Each query gets its own `timeout`; a slow service shows up as
/// [`ServiceStatus::Failed`] without holding up the rest. Rows come back in
/// [`SERVICES`] order.
pub async fn query_all(bus: &Bus, timeout: Duration) -> Vec<ServiceReport> {
    let queries = SERVICES.iter().map(|&(topic, name)| async move {
        let message = format!("service-status {}", name);
        let status = match tokio::time::timeout(timeout, bus.call(topic, message)).await {
            Ok(Ok(reply)) => ServiceStatus::from_reply(&reply),
            Ok(Err(e)) => ServiceStatus::Failed(e.to_string()),
            Err(_) => ServiceStatus::Failed("timed out".to_string()),
        };
        log::debug!("[services] {} -> {}", name, status);
        ServiceReport {
            name: name.to_string(),
            status,
        }
    });
    join_all(queries).await
}

/// Render reports as a two-column table.
#[must_use]
pub fn format_table(reports: &[ServiceReport]) -> String {
    let width = reports
        .iter()
        .map(|r| r.name.len())
        .chain(std::iter::once("SERVICE".len()))
        .max()
        .unwrap_or(0);

    let mut out = format!("{:<width$}  STATUS\n", "SERVICE", width = width);
    for report in reports {
        out.push_str(&format!(
            "{:<width$}  {}\n",
            report.name,
            report.status,
            width = width
        ));
    }
    out
}

/// Print the service status table.
pub async fn print_status(bus: &Bus, timeout: Duration) -> Result<()> {
    ready(bus, timeout).await?;
    let reports = query_all(bus, timeout).await;
    print!("{}", format_table(&reports));
    Ok(())
}

/// Print the server's node description.
pub async fn node_info(bus: &Bus, timeout: Duration) -> Result<()> {
    ready(bus, timeout).await?;
    let reply: Reply = tokio::time::timeout(timeout, bus.call(NODE_INFO_TOPIC, NODE_INFO_TOPIC))
        .await
        .with_context(|| format!("No node info within {}s", timeout.as_secs()))??;

    if reply.is_payload() {
        println!("{}", reply.value_text());
    } else {
        println!("{}", format_reply(&reply));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn reply(code: &str, value: serde_json::Value) -> Reply {
        Reply {
            code: code.to_string(),
            value,
        }
    }

    #[test]
    fn test_status_from_payload() {
        assert_eq!(
            ServiceStatus::from_reply(&reply("payload", json!("active"))),
            ServiceStatus::Active
        );
        assert_eq!(
            ServiceStatus::from_reply(&reply("payload", json!("inactive\n"))),
            ServiceStatus::Inactive
        );
        assert_eq!(
            ServiceStatus::from_reply(&reply("payload", json!("not found"))),
            ServiceStatus::NotFound
        );
        assert_eq!(
            ServiceStatus::from_reply(&reply("payload", json!("activating"))),
            ServiceStatus::Other("activating".to_string())
        );
    }

    #[test]
    fn test_error_reply_is_failed() {
        let status = ServiceStatus::from_reply(&reply("error", json!("no service name provided")));
        assert_eq!(
            status,
            ServiceStatus::Failed("no service name provided".to_string())
        );
        assert_eq!(status.to_string(), "error: no service name provided");
    }

    #[test]
    fn test_services_have_distinct_topics() {
        let mut topics: Vec<_> = SERVICES.iter().map(|(t, _)| *t).collect();
        topics.sort_unstable();
        topics.dedup();
        assert_eq!(topics.len(), SERVICES.len());
    }

    #[test]
    fn test_format_table_aligns_columns() {
        let table = format_table(&[
            ServiceReport {
                name: "nginx".to_string(),
                status: ServiceStatus::Active,
            },
            ServiceReport {
                name: "gameap-daemon".to_string(),
                status: ServiceStatus::NotFound,
            },
        ]);
        let lines: Vec<_> = table.lines().collect();
        assert_eq!(lines[0], "SERVICE        STATUS");
        assert_eq!(lines[1], "nginx          active");
        assert_eq!(lines[2], "gameap-daemon  not found");
    }
}
