//! Reference-counted sshfs volumes for container volume plugins.
//!
//! A volume names a remote `user@host:/path` target. The first consumer
//! that mounts it runs `sshfs`; later consumers share that mount, and the
//! last one to leave runs `umount`. The registry, every volume's options and
//! its reference count survive restarts in a JSON state file.
//!
//! # Components
//!
//! - [`VolumeRegistry`] - the lifecycle API (`create`, `remove`, `mount`,
//!   `unmount`, `path`, `get`, `list`, `capabilities`, `cleanup`)
//! - [`StateStore`] - atomic persistence of the registry snapshot, guarded
//!   by an exclusive lock on the state directory
//! - [`MountTool`] / [`SshfsTool`] - the external `sshfs`/`umount` commands
//! - [`system_mounts`] - lookups in the system mount table used to
//!   reconcile persisted state after a restart
//!
//! # Example
//!
//! ```no_run
//! use sshfs_volume::{RegistryConfig, VolumeRegistry};
//!
//! let registry = VolumeRegistry::open(&RegistryConfig::with_root("/mnt"))?;
//! registry.create("data", [("sshcmd", "alice@files:/srv/data"), ("password", "s3cret")])?;
//!
//! let path = registry.mount("data")?;
//! println!("mounted at {}", path.display());
//! registry.unmount("data")?;
//! # Ok::<(), sshfs_volume::VolumeError>(())
//! ```

mod config;
mod error;
mod options;
mod orchestrator;
mod registry;
mod store;
pub mod system_mounts;
mod volume;

pub use config::{DEFAULT_ROOT, RegistryConfig};
pub use error::{ErrorKind, Operation, ToolError, VolumeError, VolumeResult};
pub use options::{CREDENTIAL_OPTION, PORT_OPTION, REMOTE_TARGET_OPTION, VolumeOptions};
pub use orchestrator::{CREDENTIAL_FLAGS, HOST_KEY_CHECK_FLAG, MountTool, SshfsTool, mount_args};
pub use registry::VolumeRegistry;
pub use store::{STATE_VERSION, Snapshot, StateStore, VolumeSnapshot};
pub use volume::{Capabilities, MountState, Scope, VolumeInfo, VolumeSpec, derive_mount_point};
