//! Server configuration.

use std::path::Path;
use std::time::Duration;

use relay_policy::{Policy, PolicyOverrides};
use serde::{Deserialize, Serialize};

/// Environment variable holding the listen address.
pub const LISTEN_ADDR_ENV: &str = "RELAY_LISTEN_ADDR";

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address (e.g., "0.0.0.0:8787").
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Graceful shutdown timeout in seconds.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout: u64,

    /// Relay policy overrides, keyed by their environment names.
    #[serde(default)]
    pub policy: PolicyOverrides,
}

fn default_listen_addr() -> String {
    "0.0.0.0:8787".to_string()
}

fn default_shutdown_timeout() -> u64 {
    30
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            shutdown_timeout: default_shutdown_timeout(),
            policy: PolicyOverrides::default(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Load from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var(LISTEN_ADDR_ENV) {
            config.listen_addr = addr;
        }
        config.policy = PolicyOverrides::from_env();

        Ok(config)
    }

    /// Apply environment overrides on top of this configuration.
    ///
    /// Environment values win over file values, field by field.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(addr) = std::env::var(LISTEN_ADDR_ENV) {
            self.listen_addr = addr;
        }
        self.policy = PolicyOverrides::from_env().or(self.policy);
        self
    }

    /// Resolve the effective relay policy.
    pub fn resolve_policy(&self) -> Policy {
        Policy::resolve(&self.policy)
    }

    /// Get shutdown timeout as Duration.
    pub fn shutdown_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout)
    }
}
