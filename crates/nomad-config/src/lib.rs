//! Configuration management for Nomad clients
//!
//! Provides hierarchical configuration loading from multiple sources:
//! 1. Environment variables (NOMAD_* prefix, `__` between sections) (highest precedence)
//! 2. nomad.local.toml (gitignored, local overrides)
//! 3. nomad.toml (git-tracked, project config)
//! 4. ~/.config/nomad/config.toml (user defaults)
//! 5. Built-in defaults (lowest precedence)

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use nomad_types::HostPort;
use serde::{Deserialize, Serialize};

mod error;
mod loader;

pub use error::ConfigError;
pub use loader::{ConfigLoader, user_config_file};

/// Main Nomad configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NomadConfig {
    pub client: ClientConfig,
    pub cluster: ClusterConfig,
}

/// Identity and dispatch settings of the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Host recorded by servers as the origin of each mutation.
    pub host: String,
    /// User recorded by servers as the origin of each mutation.
    pub user: String,
    /// Deadline of a single server call.
    pub call_timeout_ms: u64,
    /// Maximum number of server calls in flight within one phase.
    pub max_concurrent_calls: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            user: "nomad".to_string(),
            call_timeout_ms: 10_000,
            max_concurrent_calls: 8,
        }
    }
}

impl ClientConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

/// The servers a client talks to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Server addresses as `host:port`.
    pub servers: Vec<String>,
    /// Number of nodes the cluster is known to contain, reachable or not.
    pub expected_node_count: Option<usize>,
}

impl ClusterConfig {
    /// Parses the configured server addresses.
    pub fn server_addresses(&self) -> Result<Vec<HostPort>, ConfigError> {
        self.servers
            .iter()
            .map(|s| s.parse::<HostPort>().map_err(ConfigError::from))
            .collect()
    }

    /// Expected node count, defaulting to the number of configured servers.
    pub fn expected_node_count(&self) -> usize {
        self.expected_node_count.unwrap_or(self.servers.len())
    }
}

impl NomadConfig {
    /// Load configuration from default locations
    pub fn load() -> Result<Self> {
        ConfigLoader::new().load()
    }

    /// Load configuration from specific project directory
    pub fn load_from_dir(project_dir: impl AsRef<Path>) -> Result<Self> {
        ConfigLoader::new().with_project_dir(project_dir).load()
    }

    /// Read a single TOML file, without layering.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
            path: path.to_path_buf(),
            source,
        })?;
        let config: NomadConfig =
            toml::from_str(&content).map_err(|source| ConfigError::ParseError {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the settings a client cannot run without.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.client.host.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "client.host must not be empty".to_string(),
            ));
        }
        if self.client.user.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "client.user must not be empty".to_string(),
            ));
        }
        if self.client.call_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "client.call_timeout_ms must be positive".to_string(),
            ));
        }
        if self.client.max_concurrent_calls == 0 {
            return Err(ConfigError::ValidationError(
                "client.max_concurrent_calls must be positive".to_string(),
            ));
        }

        let addresses = self.cluster.server_addresses()?;
        let mut seen = HashSet::new();
        for address in &addresses {
            if !seen.insert(address) {
                return Err(ConfigError::ValidationError(format!(
                    "server {address} is listed twice"
                )));
            }
        }

        if let Some(expected) = self.cluster.expected_node_count {
            if expected < addresses.len() {
                return Err(ConfigError::ValidationError(format!(
                    "cluster.expected_node_count ({expected}) is below the number of servers ({})",
                    addresses.len()
                )));
            }
        }
        Ok(())
    }
}
