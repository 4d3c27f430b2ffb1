//! Volume records and the views handed out to callers.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::options::VolumeOptions;

/// Hex digits of the remote-target digest used as mount point directory name.
const MOUNT_POINT_HASH_LEN: usize = 32;

/// The immutable part of a volume, fixed at creation.
#[derive(Debug)]
pub struct VolumeSpec {
    pub name: String,
    pub remote_target: String,
    /// Redacted by `Debug`; only ever exposed to the mount tool's stdin and
    /// the state file.
    pub credential: Option<SecretString>,
    pub port: Option<u16>,
    pub extra_options: Vec<String>,
    pub mount_point: PathBuf,
    pub created_at: DateTime<Utc>,
}

impl VolumeSpec {
    /// Build the spec of a new volume whose mount point lives under `volumes_dir`.
    pub fn new(name: &str, options: VolumeOptions, volumes_dir: &Path) -> Self {
        let mount_point = derive_mount_point(volumes_dir, &options.remote_target);
        Self {
            name: name.to_string(),
            remote_target: options.remote_target,
            credential: options.credential,
            port: options.port,
            extra_options: options.extra_options,
            mount_point,
            created_at: Utc::now(),
        }
    }
}

/// The mutable part of a volume.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MountState {
    /// Number of consumers currently holding the mount.
    pub references: u32,
    /// A teardown failed and the mount point is still mounted.
    pub needs_cleanup: bool,
}

/// Mount point for `remote_target`: a content hash under `volumes_dir`.
///
/// Stable across restarts and independent of the volume name.
pub fn derive_mount_point(volumes_dir: &Path, remote_target: &str) -> PathBuf {
    let digest = Sha256::digest(remote_target.as_bytes());
    let mut dir = hex::encode(digest);
    dir.truncate(MOUNT_POINT_HASH_LEN);
    volumes_dir.join(dir)
}

/// Caller-visible description of a volume. Never carries the credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VolumeInfo {
    pub name: String,
    pub mount_point: PathBuf,
    pub remote_target: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    pub extra_options: Vec<String>,
    pub references: u32,
    pub needs_cleanup: bool,
    pub created_at: DateTime<Utc>,
}

impl VolumeInfo {
    pub(crate) fn new(spec: &VolumeSpec, state: MountState) -> Self {
        Self {
            name: spec.name.clone(),
            mount_point: spec.mount_point.clone(),
            remote_target: spec.remote_target.clone(),
            port: spec.port,
            extra_options: spec.extra_options.clone(),
            references: state.references,
            needs_cleanup: state.needs_cleanup,
            created_at: spec.created_at,
        }
    }
}

/// Visibility of the volumes this driver creates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// Mounts exist on this node only.
    Local,
}

impl Scope {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
        }
    }
}

/// Static capability descriptor of the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    pub scope: Scope,
}
