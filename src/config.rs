//! Configuration loading and persistence.
//!
//! Settings come from `config.json` in the topicbus config directory, then
//! `TOPICBUS_*` environment variables override individual fields. A missing
//! or unreadable file means defaults.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use std::fs;

use crate::frame::ParsePolicy;

/// Endpoint served by `gameapctl ui`.
pub const DEFAULT_ENDPOINT: &str = "ws://localhost:17080/ws";

/// Configuration for a [`crate::Bus`].
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct BusConfig {
    /// WebSocket endpoint. `http(s)://` is rewritten to `ws(s)://`.
    pub endpoint: String,
    /// Seconds to wait for the WebSocket handshake. `0` waits forever.
    pub connect_timeout_secs: u64,
    /// Accept inbound frames without a `value` field (read as `null`).
    pub accept_missing_value: bool,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            connect_timeout_secs: 10,
            accept_missing_value: false,
        }
    }
}

impl BusConfig {
    /// Config for `endpoint` with every other field defaulted.
    #[must_use]
    pub fn with_endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Self::default()
        }
    }

    /// Returns the configuration directory, creating it if necessary.
    ///
    /// `TOPICBUS_CONFIG_DIR` overrides the platform config directory.
    pub fn config_dir() -> Result<PathBuf> {
        let dir = if let Ok(dir) = std::env::var("TOPICBUS_CONFIG_DIR") {
            PathBuf::from(dir)
        } else {
            dirs::config_dir()
                .context("Could not determine config directory")?
                .join("topicbus")
        };
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create config directory {}", dir.display()))?;
        Ok(dir)
    }

    /// Loads configuration from file, with environment variable overrides.
    pub fn load() -> Result<Self> {
        let path = Self::config_dir()?.join("config.json");
        let mut config = Self::load_from(&path).unwrap_or_else(|e| {
            log::debug!("[config] Using defaults: {:#}", e);
            Self::default()
        });
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Read a config file.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&content).with_context(|| format!("Invalid config in {}", path.display()))
    }

    /// Write the config as pretty JSON.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)
            .with_context(|| format!("Failed to write {}", path.display()))
    }

    /// Apply `TOPICBUS_*` overrides read through `lookup`.
    ///
    /// Unparseable values are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(endpoint) = lookup("TOPICBUS_ENDPOINT") {
            self.endpoint = endpoint;
        }

        if let Some(timeout) = lookup("TOPICBUS_CONNECT_TIMEOUT") {
            if let Ok(secs) = timeout.parse::<u64>() {
                self.connect_timeout_secs = secs;
            }
        }

        if let Some(lenient) = lookup("TOPICBUS_ACCEPT_MISSING_VALUE") {
            match lenient.as_str() {
                "1" | "true" | "yes" => self.accept_missing_value = true,
                "0" | "false" | "no" => self.accept_missing_value = false,
                _ => {}
            }
        }
    }

    /// Handshake timeout, `None` for no limit.
    #[must_use]
    pub fn connect_timeout(&self) -> Option<Duration> {
        (self.connect_timeout_secs > 0).then(|| Duration::from_secs(self.connect_timeout_secs))
    }

    /// Inbound frame validation policy.
    #[must_use]
    pub fn parse_policy(&self) -> ParsePolicy {
        if self.accept_missing_value {
            ParsePolicy::Lenient
        } else {
            ParsePolicy::Strict
        }
    }
}
