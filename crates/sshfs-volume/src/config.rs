//! Registry configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

/// Default storage root, matching the plugin's propagated mount.
pub const DEFAULT_ROOT: &str = "/mnt";

const VOLUMES_DIR: &str = "volumes";
const STATE_DIR: &str = "state";
const STATE_FILE: &str = "sshfs-state.json";
const LOCK_FILE: &str = "sshfs-state.lock";

/// Where the registry keeps its state and which tools it runs.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RegistryConfig {
    /// Storage root. Mount points live in `<root>/volumes`, state in `<root>/state`.
    pub root: PathBuf,
    pub sshfs_program: PathBuf,
    pub umount_program: PathBuf,
    pub fusermount_program: PathBuf,
    /// Kill `sshfs` and fail the mount if it runs longer than this.
    #[serde(with = "humantime_serde")]
    pub mount_timeout: Option<Duration>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from(DEFAULT_ROOT),
            sshfs_program: PathBuf::from("sshfs"),
            umount_program: PathBuf::from("umount"),
            fusermount_program: PathBuf::from("fusermount"),
            mount_timeout: None,
        }
    }
}

impl RegistryConfig {
    /// Default configuration rooted at `root`.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    pub fn volumes_dir(&self) -> PathBuf {
        self.root.join(VOLUMES_DIR)
    }

    pub fn state_dir(&self) -> PathBuf {
        self.root.join(STATE_DIR)
    }

    pub fn state_path(&self) -> PathBuf {
        self.state_dir().join(STATE_FILE)
    }

    pub(crate) fn lock_path_for(state_path: &Path) -> PathBuf {
        state_path.with_file_name(LOCK_FILE)
    }
}
