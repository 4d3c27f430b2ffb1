//! The volume registry and its lifecycle operations.
//!
//! # Locking Strategy
//!
//! Three locks, always acquired in this order:
//!
//! 1. **Volume map** (`RwLock`): shared by `mount`, `unmount` and `cleanup`,
//!    which never change which volumes exist; exclusive for `create` and
//!    `remove` for their whole duration.
//! 2. **Per-volume state** (`Mutex`): held across the external tool call and
//!    the state write, so the 0→1 and 1→0 transitions of one volume are
//!    serialized while different volumes mount in parallel.
//! 3. **Ledger** (`RwLock`): the last written snapshot. Writers hold it while
//!    the state file is replaced, so snapshot N is on disk before N+1 starts.
//!    `path`, `get` and `list` read it and never wait behind a slow mount.
//!
//! # Persistence
//!
//! `create` and `remove` write the new snapshot before changing memory: if
//! the write fails nothing happened. `mount` and `unmount` act on the system
//! first and record the outcome afterwards; if that write fails the
//! operation took effect and [`VolumeError::PersistenceFailed`] says so.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, instrument, warn};

use crate::config::RegistryConfig;
use crate::error::{Operation, VolumeError, VolumeResult};
use crate::options::VolumeOptions;
use crate::orchestrator::{MountTool, SshfsTool};
use crate::store::{Snapshot, StateStore, VolumeSnapshot};
use crate::volume::{Capabilities, MountState, Scope, VolumeInfo, VolumeSpec};

struct VolumeEntry {
    spec: Arc<VolumeSpec>,
    state: Mutex<MountState>,
}

impl VolumeEntry {
    fn new(spec: Arc<VolumeSpec>, state: MountState) -> Self {
        Self {
            spec,
            state: Mutex::new(state),
        }
    }
}

/// Authoritative registry of sshfs volumes.
pub struct VolumeRegistry {
    volumes: RwLock<HashMap<String, Arc<VolumeEntry>>>,
    ledger: RwLock<Snapshot>,
    store: StateStore,
    tool: Arc<dyn MountTool>,
    volumes_dir: PathBuf,
}

impl VolumeRegistry {
    /// Open the registry described by `config`, mounting with `sshfs`.
    pub fn open(config: &RegistryConfig) -> VolumeResult<Self> {
        Self::with_tool(config, Arc::new(SshfsTool::new(config)))
    }

    /// Open the registry with a custom mount tool.
    ///
    /// Loads the persisted snapshot and reconciles it with the system mount
    /// table: reference counts of volumes that are no longer mounted are
    /// reset, and mounted volumes nobody references are flagged for cleanup.
    pub fn with_tool(config: &RegistryConfig, tool: Arc<dyn MountTool>) -> VolumeResult<Self> {
        let store = StateStore::open(config.state_path())?;
        let mut snapshot = store.load()?;

        let changed = reconcile(&mut snapshot, tool.as_ref());
        if !changed.is_empty() {
            store
                .save(&snapshot)
                .map_err(|source| VolumeError::PersistenceFailed {
                    name: changed.join(", "),
                    operation: Operation::Reconcile,
                    path: store.state_path().to_path_buf(),
                    source,
                })?;
        }

        let volumes = snapshot
            .iter()
            .map(|(name, volume)| {
                let entry = VolumeEntry::new(Arc::clone(&volume.spec), volume.state);
                (name.clone(), Arc::new(entry))
            })
            .collect();

        info!(
            volumes = snapshot.len(),
            state = %store.state_path().display(),
            "Volume registry ready"
        );

        Ok(Self {
            volumes: RwLock::new(volumes),
            ledger: RwLock::new(snapshot),
            store,
            tool,
            volumes_dir: config.volumes_dir(),
        })
    }

    /// Create (or replace) the volume `name` from its request options.
    #[instrument(level = "debug", skip(self, options), fields(volume = %name))]
    pub fn create<I, K, V>(&self, name: &str, options: I) -> VolumeResult<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        validate_name(name)?;
        let options = VolumeOptions::parse(name, options)?;
        let spec = Arc::new(VolumeSpec::new(name, options, &self.volumes_dir));

        let mut volumes = self.volumes.write();

        let duplicate = volumes.iter().find(|(other, entry)| {
            other.as_str() != name && entry.spec.remote_target == spec.remote_target
        });
        if let Some((existing, _)) = duplicate {
            return Err(VolumeError::DuplicateTarget {
                name: name.to_string(),
                existing: existing.clone(),
            });
        }

        if let Some(previous) = volumes.get(name) {
            let state = previous.state.lock();
            if state.references > 0 {
                return Err(VolumeError::InUse {
                    name: name.to_string(),
                    references: state.references,
                });
            }
            if state.needs_cleanup {
                return Err(VolumeError::StillMounted {
                    name: name.to_string(),
                    mount_point: previous.spec.mount_point.clone(),
                });
            }
            debug!("Replacing existing volume definition");
        }

        let state = MountState::default();
        self.commit(Operation::Create, name, |ledger| {
            ledger.insert(
                name.to_string(),
                VolumeSnapshot {
                    spec: Arc::clone(&spec),
                    state,
                },
            );
        })?;

        info!(mount_point = %spec.mount_point.display(), "Created volume");
        volumes.insert(name.to_string(), Arc::new(VolumeEntry::new(spec, state)));
        Ok(())
    }

    /// Remove the volume `name` and its mount-point directory.
    #[instrument(level = "debug", skip(self), fields(volume = %name))]
    pub fn remove(&self, name: &str) -> VolumeResult<()> {
        let mut volumes = self.volumes.write();
        let entry = volumes
            .get(name)
            .cloned()
            .ok_or_else(|| VolumeError::not_found(name))?;

        let state = entry.state.lock();
        if state.references != 0 {
            return Err(VolumeError::InUse {
                name: name.to_string(),
                references: state.references,
            });
        }

        let mount_point = &entry.spec.mount_point;
        let mounted = self
            .tool
            .is_mounted(mount_point)
            .map_err(|e| VolumeError::io("checking mount table", mount_point, e))?;
        if state.needs_cleanup || mounted {
            return Err(VolumeError::StillMounted {
                name: name.to_string(),
                mount_point: mount_point.clone(),
            });
        }

        match fs::remove_dir_all(mount_point) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(VolumeError::io(
                    format!("removing mount point of volume '{name}'"),
                    mount_point,
                    e,
                ));
            }
        }

        self.commit(Operation::Remove, name, |ledger| {
            ledger.remove(name);
        })?;

        drop(state);
        volumes.remove(name);
        info!("Removed volume");
        Ok(())
    }

    /// Mount point of `name`.
    pub fn path(&self, name: &str) -> VolumeResult<PathBuf> {
        self.ledger
            .read()
            .get(name)
            .map(|volume| volume.spec.mount_point.clone())
            .ok_or_else(|| VolumeError::not_found(name))
    }

    /// Description of `name`.
    pub fn get(&self, name: &str) -> VolumeResult<VolumeInfo> {
        self.ledger
            .read()
            .get(name)
            .map(|volume| VolumeInfo::new(&volume.spec, volume.state))
            .ok_or_else(|| VolumeError::not_found(name))
    }

    /// Descriptions of all volumes, in name order.
    pub fn list(&self) -> Vec<VolumeInfo> {
        self.ledger
            .read()
            .values()
            .map(|volume| VolumeInfo::new(&volume.spec, volume.state))
            .collect()
    }

    /// Mounts are only visible on this node.
    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            scope: Scope::Local,
        }
    }

    /// Take a reference on `name`, mounting it if it is the first.
    #[instrument(level = "debug", skip(self), fields(volume = %name))]
    pub fn mount(&self, name: &str) -> VolumeResult<PathBuf> {
        let volumes = self.volumes.read();
        let entry = volumes
            .get(name)
            .ok_or_else(|| VolumeError::not_found(name))?;
        let spec = &entry.spec;

        let mut state = entry.state.lock();
        if state.references == 0 {
            if state.needs_cleanup {
                self.teardown_stale(spec, &mut state)?;
                self.record_state(Operation::Cleanup, spec, *state)?;
            }
            prepare_mount_point(spec)?;
            self.tool
                .mount(spec)
                .map_err(|source| VolumeError::MountFailed {
                    name: name.to_string(),
                    source,
                })?;
            info!(mount_point = %spec.mount_point.display(), "Mounted volume");
        } else {
            debug!(references = state.references, "Volume already mounted, sharing it");
        }

        state.references = state.references.saturating_add(1);
        self.record_state(Operation::Mount, spec, *state)?;
        Ok(spec.mount_point.clone())
    }

    /// Release a reference on `name`, unmounting it if it was the last.
    ///
    /// The reference is released even when the unmount tool fails; the
    /// volume is then flagged `needs_cleanup` if it is still mounted.
    #[instrument(level = "debug", skip(self), fields(volume = %name))]
    pub fn unmount(&self, name: &str) -> VolumeResult<()> {
        let volumes = self.volumes.read();
        let entry = volumes
            .get(name)
            .ok_or_else(|| VolumeError::not_found(name))?;
        let spec = &entry.spec;

        let mut state = entry.state.lock();
        let previous = state.references;
        state.references = previous.saturating_sub(1);

        let mut teardown = Ok(());
        if state.references == 0 {
            if previous == 0 {
                warn!("Unmount requested for a volume with no references");
            }
            match self.tool.unmount(&spec.mount_point) {
                Ok(()) => {
                    state.needs_cleanup = false;
                    info!(mount_point = %spec.mount_point.display(), "Unmounted volume");
                }
                Err(source) => {
                    state.needs_cleanup = self.tool.is_mounted(&spec.mount_point).unwrap_or(true);
                    error!(
                        error = %source,
                        needs_cleanup = state.needs_cleanup,
                        "Unmount failed"
                    );
                    teardown = Err(VolumeError::UnmountFailed {
                        name: name.to_string(),
                        source,
                    });
                }
            }
        } else {
            debug!(references = state.references, "Volume still in use");
        }

        let recorded = self.record_state(Operation::Unmount, spec, *state);
        if let Err(e) = teardown {
            if let Err(persist) = recorded {
                warn!(error = %persist, "State not persisted after failed unmount");
            }
            return Err(e);
        }
        recorded
    }

    /// Retry the teardown of `name` after a failed unmount.
    ///
    /// Returns `false` if the volume did not need cleaning up.
    #[instrument(level = "debug", skip(self), fields(volume = %name))]
    pub fn cleanup(&self, name: &str) -> VolumeResult<bool> {
        let volumes = self.volumes.read();
        let entry = volumes
            .get(name)
            .ok_or_else(|| VolumeError::not_found(name))?;

        let mut state = entry.state.lock();
        if !state.needs_cleanup || state.references > 0 {
            return Ok(false);
        }

        self.teardown_stale(&entry.spec, &mut state)?;
        self.record_state(Operation::Cleanup, &entry.spec, *state)?;
        Ok(true)
    }

    /// Run [`cleanup`](Self::cleanup) on every flagged volume.
    pub fn cleanup_all(&self) -> Vec<(String, VolumeResult<bool>)> {
        let flagged: Vec<String> = self
            .list()
            .into_iter()
            .filter(|volume| volume.needs_cleanup)
            .map(|volume| volume.name)
            .collect();

        flagged
            .into_iter()
            .map(|name| {
                let result = self.cleanup(&name);
                (name, result)
            })
            .collect()
    }

    /// Path of the durable state file.
    pub fn state_path(&self) -> &Path {
        self.store.state_path()
    }

    /// Force-detach a mount point left behind by a failed unmount.
    fn teardown_stale(&self, spec: &VolumeSpec, state: &mut MountState) -> VolumeResult<()> {
        let mounted = self
            .tool
            .is_mounted(&spec.mount_point)
            .map_err(|e| VolumeError::io("checking mount table", &spec.mount_point, e))?;
        if mounted {
            warn!(
                volume = %spec.name,
                mount_point = %spec.mount_point.display(),
                "Forcing teardown of stale mount"
            );
            self.tool
                .force_unmount(&spec.mount_point)
                .map_err(|source| VolumeError::UnmountFailed {
                    name: spec.name.clone(),
                    source,
                })?;
        }
        state.needs_cleanup = false;
        Ok(())
    }

    /// Write a snapshot with `apply` applied, then make it current.
    ///
    /// On failure the ledger is left untouched.
    fn commit<F>(&self, operation: Operation, name: &str, apply: F) -> VolumeResult<()>
    where
        F: FnOnce(&mut Snapshot),
    {
        let mut ledger = self.ledger.write();
        let mut next = ledger.clone();
        apply(&mut next);
        self.store
            .save(&next)
            .map_err(|source| self.persistence_failed(operation, name, source))?;
        *ledger = next;
        Ok(())
    }

    /// Record the mount state of an existing volume.
    ///
    /// The ledger is updated even if the write fails, since it has to track
    /// what the system actually looks like.
    fn record_state(
        &self,
        operation: Operation,
        spec: &VolumeSpec,
        state: MountState,
    ) -> VolumeResult<()> {
        let mut ledger = self.ledger.write();
        if let Some(volume) = ledger.get_mut(&spec.name) {
            volume.state = state;
        }
        self.store
            .save(&ledger)
            .map_err(|source| self.persistence_failed(operation, &spec.name, source))
    }

    fn persistence_failed(&self, operation: Operation, name: &str, source: io::Error) -> VolumeError {
        error!(%operation, volume = %name, error = %source, "Failed to persist state");
        VolumeError::PersistenceFailed {
            name: name.to_string(),
            operation,
            path: self.store.state_path().to_path_buf(),
            source,
        }
    }
}

fn validate_name(name: &str) -> VolumeResult<()> {
    let reason = if name.is_empty() {
        "must not be empty"
    } else if name.chars().any(char::is_control) {
        "must not contain control characters"
    } else {
        return Ok(());
    };
    Err(VolumeError::InvalidName {
        name: name.to_string(),
        reason,
    })
}

/// Make sure the mount point exists and is a directory.
fn prepare_mount_point(spec: &VolumeSpec) -> VolumeResult<()> {
    let mount_point = &spec.mount_point;
    let context = || format!("preparing mount point of volume '{}'", spec.name);

    match fs::symlink_metadata(mount_point) {
        Ok(metadata) if metadata.is_dir() => Ok(()),
        Ok(_) => Err(VolumeError::io(
            context(),
            mount_point,
            io::Error::new(
                io::ErrorKind::NotADirectory,
                "already exists and is not a directory",
            ),
        )),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!(mount_point = %mount_point.display(), "Creating mount point");
            create_dir(mount_point).map_err(|e| VolumeError::io(context(), mount_point, e))
        }
        Err(e) => Err(VolumeError::io(context(), mount_point, e)),
    }
}

#[cfg(unix)]
fn create_dir(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    fs::DirBuilder::new().recursive(true).mode(0o755).create(path)
}

#[cfg(not(unix))]
fn create_dir(path: &Path) -> io::Result<()> {
    fs::create_dir_all(path)
}

/// Bring persisted mount state in line with the system mount table.
///
/// Returns the names of volumes whose state changed.
fn reconcile(snapshot: &mut Snapshot, tool: &dyn MountTool) -> Vec<String> {
    let mut changed = Vec::new();
    for (name, volume) in snapshot.iter_mut() {
        let mounted = match tool.is_mounted(&volume.spec.mount_point) {
            Ok(mounted) => mounted,
            Err(e) => {
                warn!(volume = %name, error = %e, "Cannot read mount table, keeping persisted state");
                continue;
            }
        };

        let state = &mut volume.state;
        if !mounted && (state.references > 0 || state.needs_cleanup) {
            warn!(
                volume = %name,
                references = state.references,
                "Volume is no longer mounted, resetting its references"
            );
            *state = MountState::default();
            changed.push(name.clone());
        } else if mounted && state.references == 0 && !state.needs_cleanup {
            warn!(volume = %name, "Unreferenced volume is still mounted, flagging for cleanup");
            state.needs_cleanup = true;
            changed.push(name.clone());
        }
    }
    changed
}
