use std::env;

use grapio::Configuration;
use serde::Deserialize;

/// Top-level grapio.toml configuration
#[derive(Debug, Deserialize, Default)]
pub struct CliConfig {
    #[serde(default)]
    pub grapio: Configuration,
}

/// Settings given on the command line; they win over the file and env.
#[derive(Debug, Default)]
pub struct Overrides {
    pub offline: bool,
    pub requester: Option<String>,
    pub server: Option<String>,
    pub connection_string: Option<String>,
    pub refresh_interval: Option<i64>,
}

impl CliConfig {
    /// Load configuration from a TOML file, falling back to defaults if the file
    /// doesn't exist or cannot be parsed.
    pub fn load(path: &str) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!("failed to parse {}: {}", path, e);
                    Self::default()
                }
            },
            Err(_) => {
                tracing::debug!("{} not found, using default configuration", path);
                Self::default()
            }
        }
    }

    /// Apply environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|name| env::var(name).ok());
    }

    fn apply_overrides_from(&mut self, var: impl Fn(&str) -> Option<String>) {
        let config = &mut self.grapio;

        // GRAPIO_OFFLINE
        if let Some(val) = var("GRAPIO_OFFLINE") {
            match val.to_lowercase().as_str() {
                "1" | "true" | "yes" => config.offline = true,
                "0" | "false" | "no" => config.offline = false,
                other => tracing::warn!("unknown GRAPIO_OFFLINE value: {}", other),
            }
        }

        if let Some(val) = var("GRAPIO_REQUESTER") {
            config.requester = val;
        }

        if let Some(val) = var("GRAPIO_SERVER_ADDRESS") {
            config.server_address = val;
        }

        if let Some(val) = var("GRAPIO_CONNECTION_STRING") {
            config.connection_string = val;
        }

        // GRAPIO_REFRESH_INTERVAL, in seconds
        if let Some(val) = var("GRAPIO_REFRESH_INTERVAL") {
            match val.trim().parse::<i64>() {
                Ok(seconds) => config.refresh_interval = seconds,
                Err(_) => tracing::warn!("invalid GRAPIO_REFRESH_INTERVAL value: {}", val),
            }
        }
    }

    pub fn apply_cli_overrides(&mut self, overrides: Overrides) {
        let config = &mut self.grapio;
        if overrides.offline {
            config.offline = true;
        }
        if let Some(requester) = overrides.requester {
            config.requester = requester;
        }
        if let Some(server) = overrides.server {
            config.server_address = server;
        }
        if let Some(connection_string) = overrides.connection_string {
            config.connection_string = connection_string;
        }
        if let Some(seconds) = overrides.refresh_interval {
            config.refresh_interval = seconds;
        }
    }
}
