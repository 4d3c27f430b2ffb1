pub mod cleanup;
pub mod create;
pub mod inspect;
pub mod ls;
pub mod mount;
pub mod rm;
pub mod serve;
pub mod unmount;

use anyhow::{Context, Result};
use sshfs_volume::VolumeRegistry;

use crate::config::PluginConfig;

/// Open the registry for a one-shot command.
pub fn open_registry(config: &PluginConfig) -> Result<VolumeRegistry> {
    VolumeRegistry::open(&config.registry).with_context(|| {
        format!(
            "Failed to open volume registry at {}",
            config.registry.root.display()
        )
    })
}
