//! Configuration loader with multi-source merging

use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::ProjectDirs;

use crate::{ConfigError, NomadConfig};

const USER_CONFIG_FILE: &str = "config.toml";
const PROJECT_CONFIG_FILE: &str = "nomad.toml";
/// Untracked overrides of the project file.
const LOCAL_CONFIG_FILE: &str = "nomad.local.toml";

/// The per-user config file, `~/.config/nomad/config.toml` on Linux.
pub fn user_config_file() -> Result<PathBuf, ConfigError> {
    ProjectDirs::from("org", "Nomad", "nomad")
        .map(|dirs| dirs.config_dir().join(USER_CONFIG_FILE))
        .ok_or_else(|| ConfigError::XdgError("no home directory for user config".to_string()))
}

/// Configuration loader with builder pattern
pub struct ConfigLoader {
    project_dir: PathBuf,
    env_prefix: String,
    user_config: bool,
}

impl ConfigLoader {
    /// Create a new config loader with default project directory (current dir)
    pub fn new() -> Self {
        Self {
            project_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            env_prefix: "NOMAD".to_string(),
            user_config: true,
        }
    }

    /// Set the project directory
    pub fn with_project_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.project_dir = dir.as_ref().to_path_buf();
        self
    }

    /// Set the environment variable prefix (default: "NOMAD")
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Skip the user config file (~/.config/nomad/config.toml)
    pub fn without_user_config(mut self) -> Self {
        self.user_config = false;
        self
    }

    /// TOML files consulted, lowest precedence first. Missing ones are skipped.
    pub fn config_files(&self) -> Vec<PathBuf> {
        let mut files = Vec::with_capacity(3);
        if self.user_config {
            if let Ok(file) = user_config_file() {
                files.push(file);
            }
        }
        files.push(self.project_dir.join(PROJECT_CONFIG_FILE));
        files.push(self.project_dir.join(LOCAL_CONFIG_FILE));
        files
    }

    /// Load configuration from all sources with proper precedence
    pub fn load(self) -> Result<NomadConfig> {
        let mut builder = config::Config::builder();

        // 1. Start with built-in defaults
        let defaults = NomadConfig::default();
        builder = builder.add_source(config::Config::try_from(&defaults)?);

        // 2-4. User, project and local files, where present
        for file in self.config_files() {
            if file.exists() {
                builder = builder.add_source(
                    config::File::from(file)
                        .required(false)
                        .format(config::FileFormat::Toml),
                );
            }
        }

        // 5. Environment variables (NOMAD_CLIENT__USER, NOMAD_CLUSTER__SERVERS=a:1,b:2)
        builder = builder.add_source(
            config::Environment::with_prefix(&self.env_prefix)
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("cluster.servers")
                .try_parsing(true),
        );

        let config = builder.build().context("Failed to build configuration")?;

        let nomad_config: NomadConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        nomad_config
            .validate()
            .context("Configuration failed validation")?;

        Ok(nomad_config)
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn loader(project_dir: &Path) -> ConfigLoader {
        ConfigLoader::new()
            .with_project_dir(project_dir)
            .with_env_prefix("NOMAD_LOADER_TEST")
            .without_user_config()
    }

    #[test]
    fn test_config_files_in_precedence_order() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let project_dir = temp_dir.path();

        assert_eq!(
            loader(project_dir).config_files(),
            vec![
                project_dir.join("nomad.toml"),
                project_dir.join("nomad.local.toml"),
            ]
        );

        let with_user = ConfigLoader::new().with_project_dir(project_dir);
        if let Ok(user_file) = user_config_file() {
            assert!(user_file.to_string_lossy().contains("nomad"));
            assert_eq!(with_user.config_files().first(), Some(&user_file));
        }
    }

    #[test]
    fn test_load_defaults() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let config = loader(temp_dir.path()).load().expect("Failed to load config");

        assert_eq!(config.client.host, "localhost");
        assert_eq!(config.client.call_timeout_ms, 10_000);
        assert!(config.cluster.servers.is_empty());
    }

    #[test]
    fn test_load_project_config() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let project_dir = temp_dir.path();

        let config_content = r#"
[client]
host = "ops-box"
user = "alice"
call_timeout_ms = 2500

[cluster]
servers = ["node-1:9410", "node-2:9410"]
expected_node_count = 3
"#;
        fs::write(project_dir.join("nomad.toml"), config_content).expect("Failed to write config");

        let config = loader(project_dir).load().expect("Failed to load config");

        assert_eq!(config.client.host, "ops-box");
        assert_eq!(config.client.user, "alice");
        assert_eq!(config.client.call_timeout_ms, 2500);
        assert_eq!(config.client.max_concurrent_calls, 8);
        assert_eq!(config.cluster.servers.len(), 2);
        assert_eq!(config.cluster.expected_node_count, Some(3));
    }

    #[test]
    fn test_local_overrides() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let project_dir = temp_dir.path();

        fs::write(
            project_dir.join("nomad.toml"),
            r#"
[client]
user = "project-user"
"#,
        )
        .expect("Failed to write project config");

        fs::write(
            project_dir.join("nomad.local.toml"),
            r#"
[client]
user = "local-user"
"#,
        )
        .expect("Failed to write local config");

        let config = loader(project_dir).load().expect("Failed to load config");

        // Local config should override project config
        assert_eq!(config.client.user, "local-user");
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let project_dir = temp_dir.path();

        fs::write(
            project_dir.join("nomad.toml"),
            r#"
[cluster]
servers = ["node-1"]
"#,
        )
        .expect("Failed to write config");

        assert!(loader(project_dir).load().is_err());
    }

    // Environment variables are not exercised here: they are process-global
    // and would leak between tests running in parallel. They follow the
    // pattern NOMAD_CLIENT__USER=bob, NOMAD_CLUSTER__SERVERS=a:9410,b:9410.
}
