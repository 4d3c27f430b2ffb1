//! Configuration file support for the plugin.
//!
//! Read from `--config` / `SSHFS_VOLUME_CONFIG`, or from
//! `/etc/docker-volume-sshfs/config.toml` when that exists. Every key is
//! optional.
//!
//! # Example configuration
//!
//! ```toml
//! socket = "/run/docker/plugins/sshfs.sock"
//!
//! [registry]
//! root = "/mnt"
//! sshfs_program = "/usr/bin/sshfs"
//! mount_timeout = "30s"
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use sshfs_volume::RegistryConfig;
use tracing::debug;

/// Socket the container runtime discovers the plugin on.
pub const DEFAULT_SOCKET: &str = "/run/docker/plugins/sshfs.sock";

/// Config file read when none is given explicitly.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/docker-volume-sshfs/config.toml";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PluginConfig {
    /// Unix socket the protocol server listens on.
    pub socket: PathBuf,
    pub registry: RegistryConfig,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            socket: PathBuf::from(DEFAULT_SOCKET),
            registry: RegistryConfig::default(),
        }
    }
}

impl PluginConfig {
    /// Load configuration from `path`, or from the default location.
    ///
    /// An explicit path must exist; a missing default file yields the
    /// built-in defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path,
            None => {
                let default = Path::new(DEFAULT_CONFIG_PATH);
                if !default.exists() {
                    return Ok(Self::default());
                }
                default
            }
        };

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        debug!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Apply command-line and environment overrides.
    #[must_use]
    pub fn with_root(mut self, root: Option<PathBuf>) -> Self {
        if let Some(root) = root {
            self.registry.root = root;
        }
        self
    }
}
