//! Durable registry state.
//!
//! State is persisted to `<root>/state/sshfs-state.json` as pretty-printed
//! JSON. Every save writes a complete snapshot to a temporary file in the
//! same directory and renames it over the state file, so a crash mid-write
//! leaves the previous snapshot intact.
//!
//! # Ownership
//!
//! A [`StateStore`] holds an exclusive advisory lock on
//! `<root>/state/sshfs-state.lock` for as long as it lives. A second process
//! (or a second store in the same process) opening the same root fails with
//! [`VolumeError::StateLocked`] instead of racing on the file.
//!
//! # Legacy format
//!
//! Earlier releases of the plugin wrote a bare object keyed by volume name
//! with Go-style field names (`Sshcmd`, `Password`, `Port`, `Options`,
//! `Mountpoint`). Such files are read transparently and rewritten in the
//! current format on the next save.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use fs2::FileExt;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::RegistryConfig;
use crate::error::{VolumeError, VolumeResult};
use crate::volume::{MountState, VolumeSpec};

/// Schema version written to the state file.
pub const STATE_VERSION: u32 = 1;

/// A volume as held in a snapshot.
#[derive(Debug, Clone)]
pub struct VolumeSnapshot {
    pub spec: Arc<VolumeSpec>,
    pub state: MountState,
}

/// The full persisted registry, keyed by volume name.
pub type Snapshot = BTreeMap<String, VolumeSnapshot>;

/// On-disk representation of one volume (serialization side).
#[derive(Serialize)]
struct StoredVolumeRef<'a> {
    remote_target: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    credential: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    port: Option<u16>,
    extra_options: &'a [String],
    mount_point: &'a Path,
    created_at: DateTime<Utc>,
    references: u32,
    needs_cleanup: bool,
}

#[derive(Serialize)]
struct StateFileRef<'a> {
    version: u32,
    volumes: BTreeMap<&'a str, StoredVolumeRef<'a>>,
}

/// On-disk representation of one volume (deserialization side).
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct StoredVolume {
    remote_target: String,
    #[serde(default)]
    credential: Option<String>,
    #[serde(default)]
    port: Option<u16>,
    #[serde(default)]
    extra_options: Vec<String>,
    mount_point: PathBuf,
    created_at: DateTime<Utc>,
    #[serde(default)]
    references: u32,
    #[serde(default)]
    needs_cleanup: bool,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct StateFile {
    version: u32,
    #[serde(default)]
    volumes: BTreeMap<String, StoredVolume>,
}

/// Volume entry as written by pre-versioned releases.
#[derive(Deserialize)]
struct LegacyVolume {
    #[serde(rename = "Password", default)]
    password: String,
    #[serde(rename = "Sshcmd")]
    sshcmd: String,
    #[serde(rename = "Port", default)]
    port: String,
    #[serde(rename = "Options", default)]
    options: Option<Vec<String>>,
    #[serde(rename = "Mountpoint")]
    mountpoint: PathBuf,
}

/// Owner of the state file.
#[derive(Debug)]
pub struct StateStore {
    state_path: PathBuf,
    // Held for the lifetime of the store; dropping it releases the lock.
    _lock_file: File,
}

impl StateStore {
    /// Open the store for `state_path`, creating its directory and taking
    /// the exclusive lock.
    pub fn open(state_path: impl Into<PathBuf>) -> VolumeResult<Self> {
        let state_path = state_path.into();
        let lock_path = RegistryConfig::lock_path_for(&state_path);
        let state_dir = state_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();

        fs::create_dir_all(&state_dir)
            .map_err(|e| VolumeError::io("creating state directory", &state_dir, e))?;

        let lock_file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| VolumeError::io("opening state lock", &lock_path, e))?;

        match lock_file.try_lock_exclusive() {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                return Err(VolumeError::StateLocked { path: state_dir });
            }
            Err(e) => return Err(VolumeError::io("locking state", &lock_path, e)),
        }

        debug!(path = %state_path.display(), "Opened state store");
        Ok(Self {
            state_path,
            _lock_file: lock_file,
        })
    }

    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    /// Load the persisted snapshot.
    ///
    /// A missing file is a first run and yields an empty snapshot. A file
    /// that exists but cannot be read or parsed is [`VolumeError::CorruptState`].
    pub fn load(&self) -> VolumeResult<Snapshot> {
        let contents = match fs::read_to_string(&self.state_path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!(path = %self.state_path.display(), "No state found, starting empty");
                return Ok(Snapshot::new());
            }
            Err(e) => return Err(self.corrupt(format!("unreadable: {e}"))),
        };

        let value: serde_json::Value =
            serde_json::from_str(&contents).map_err(|e| self.corrupt(e.to_string()))?;

        // Legacy files map volume names to objects, so a volume may itself be
        // called "version".
        let is_current = value
            .get("version")
            .is_some_and(serde_json::Value::is_u64);

        if is_current {
            let file: StateFile =
                serde_json::from_value(value).map_err(|e| self.corrupt(e.to_string()))?;
            if file.version > STATE_VERSION {
                return Err(self.corrupt(format!(
                    "unsupported state version {} (newest known is {STATE_VERSION})",
                    file.version
                )));
            }
            Ok(file
                .volumes
                .into_iter()
                .map(|(name, stored)| {
                    let snapshot = from_stored(&name, stored);
                    (name, snapshot)
                })
                .collect())
        } else {
            let legacy: BTreeMap<String, LegacyVolume> =
                serde_json::from_value(value).map_err(|e| self.corrupt(e.to_string()))?;
            debug!(volumes = legacy.len(), "Migrating legacy state file");
            legacy
                .into_iter()
                .map(|(name, volume)| {
                    let snapshot = self.migrate_legacy(&name, volume)?;
                    Ok((name, snapshot))
                })
                .collect()
        }
    }

    /// Atomically replace the state file with `snapshot`.
    pub fn save(&self, snapshot: &Snapshot) -> io::Result<()> {
        let file = StateFileRef {
            version: STATE_VERSION,
            volumes: snapshot
                .iter()
                .map(|(name, volume)| (name.as_str(), to_stored(volume)))
                .collect(),
        };
        let contents = serde_json::to_vec_pretty(&file).map_err(io::Error::other)?;

        let parent = self
            .state_path
            .parent()
            .ok_or_else(|| io::Error::other("state path has no parent directory"))?;

        // Same directory keeps the rename on one filesystem. Temp files are 0600.
        let mut temp_file = tempfile::NamedTempFile::new_in(parent)?;
        temp_file.write_all(&contents)?;
        temp_file.as_file().sync_all()?;
        temp_file
            .persist(&self.state_path)
            .map_err(|e| e.error)?;

        #[cfg(unix)]
        File::open(parent)?.sync_all()?;

        debug!(path = %self.state_path.display(), volumes = snapshot.len(), "Saved state");
        Ok(())
    }

    fn corrupt(&self, reason: String) -> VolumeError {
        VolumeError::CorruptState {
            path: self.state_path.clone(),
            reason,
        }
    }

    fn migrate_legacy(&self, name: &str, volume: LegacyVolume) -> VolumeResult<VolumeSnapshot> {
        let port = if volume.port.is_empty() {
            None
        } else {
            Some(volume.port.parse::<u16>().map_err(|e| {
                self.corrupt(format!("volume '{name}' has invalid port '{}': {e}", volume.port))
            })?)
        };

        let spec = VolumeSpec {
            name: name.to_string(),
            remote_target: volume.sshcmd,
            credential: (!volume.password.is_empty()).then(|| SecretString::from(volume.password)),
            port,
            extra_options: volume.options.unwrap_or_default(),
            mount_point: volume.mountpoint,
            created_at: Utc::now(),
        };
        Ok(VolumeSnapshot {
            spec: Arc::new(spec),
            state: MountState::default(),
        })
    }
}

fn to_stored(volume: &VolumeSnapshot) -> StoredVolumeRef<'_> {
    let spec = &volume.spec;
    StoredVolumeRef {
        remote_target: &spec.remote_target,
        credential: spec.credential.as_ref().map(|c| c.expose_secret()),
        port: spec.port,
        extra_options: &spec.extra_options,
        mount_point: &spec.mount_point,
        created_at: spec.created_at,
        references: volume.state.references,
        needs_cleanup: volume.state.needs_cleanup,
    }
}

fn from_stored(name: &str, stored: StoredVolume) -> VolumeSnapshot {
    let spec = VolumeSpec {
        name: name.to_string(),
        remote_target: stored.remote_target,
        credential: stored.credential.map(SecretString::from),
        port: stored.port,
        extra_options: stored.extra_options,
        mount_point: stored.mount_point,
        created_at: stored.created_at,
    };
    VolumeSnapshot {
        spec: Arc::new(spec),
        state: MountState {
            references: stored.references,
            needs_cleanup: stored.needs_cleanup,
        },
    }
}
