use std::fmt;
use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::repository::sqlite::DataSource;

/// Settings for a Grapio provider.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Configuration {
    /// Identifies this client to the server.
    #[serde(default)]
    pub requester: String,
    #[serde(default = "default_server_address")]
    pub server_address: String,
    #[serde(default = "default_connection_string")]
    pub connection_string: String,
    /// Seconds between refresh passes.
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval: i64,
    /// When set, the server is never contacted and the local cache is
    /// authoritative.
    #[serde(default)]
    pub offline: bool,
}

// ── Default value functions ──────────────────────────

fn default_server_address() -> String {
    "http://localhost:3278".to_string()
}

fn default_connection_string() -> String {
    "Data Source=grapio.db;Mode=ReadWriteCreate".to_string()
}

fn default_refresh_interval() -> i64 {
    30
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            requester: String::new(),
            server_address: default_server_address(),
            connection_string: default_connection_string(),
            refresh_interval: default_refresh_interval(),
            offline: false,
        }
    }
}

impl Configuration {
    /// The refresh interval as a `Duration`; negative values clamp to zero.
    pub fn refresh_period(&self) -> Duration {
        Duration::from_secs(self.refresh_interval.max(0) as u64)
    }
}

/// A configuration field that failed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub field: &'static str,
    pub message: String,
}

impl Violation {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

pub const MIN_REFRESH_INTERVAL: i64 = 5;
pub const MAX_REFRESH_INTERVAL: i64 = 7200;

/// Checks every rule and returns all violations; empty means valid.
///
/// Server related rules only apply when the provider is online.
pub fn validate(config: &Configuration) -> Vec<Violation> {
    let mut violations = Vec::new();

    if !is_valid_connection_string(&config.connection_string) {
        violations.push(Violation::new(
            "connection_string",
            "Connection string is invalid or contains :memory:",
        ));
    }

    if config.offline {
        return violations;
    }

    if config.requester.trim().is_empty() {
        violations.push(Violation::new(
            "requester",
            "A requester must be specified when Offline is false.",
        ));
    }

    if !is_valid_server_address(&config.server_address) {
        violations.push(Violation::new(
            "server_address",
            "Server URI is invalid and Offline is false.",
        ));
    }

    if !(MIN_REFRESH_INTERVAL..=MAX_REFRESH_INTERVAL).contains(&config.refresh_interval) {
        violations.push(Violation::new(
            "refresh_interval",
            "Refresh interval must be >= 5 and <= 7200 when Offline is false.",
        ));
    }

    violations
}

fn is_valid_connection_string(connection_string: &str) -> bool {
    !connection_string.trim().is_empty()
        && !connection_string.contains(":memory:")
        && DataSource::parse(connection_string).is_ok()
}

fn is_valid_server_address(address: &str) -> bool {
    match Url::parse(address) {
        Ok(url) => matches!(url.scheme(), "http" | "https") && url.host().is_some(),
        Err(_) => false,
    }
}
