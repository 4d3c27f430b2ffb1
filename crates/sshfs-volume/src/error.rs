//! Error types for volume registry operations.
//!
//! [`VolumeError`] is returned by every lifecycle operation. Failures of the
//! external mount tools are described by [`ToolError`] and carried as the
//! source of [`VolumeError::MountFailed`] / [`VolumeError::UnmountFailed`].
//!
//! Credentials never appear in any of these messages: the mount tool reads
//! them from stdin, so the recorded argument vectors are safe to log.

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// The lifecycle operation during which an error happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Create,
    Remove,
    Mount,
    Unmount,
    Cleanup,
    Reconcile,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Create => "create",
            Self::Remove => "remove",
            Self::Mount => "mount",
            Self::Unmount => "unmount",
            Self::Cleanup => "cleanup",
            Self::Reconcile => "reconcile",
        })
    }
}

/// Failure of an external tool (`sshfs`, `umount`, `fusermount`).
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("{program} exited with {status}: {output} cmd: [{}]", .args.join(" "))]
    Failed {
        program: String,
        args: Vec<String>,
        status: String,
        /// Combined stdout and stderr of the tool.
        output: String,
    },

    #[error("{program} did not finish within {timeout:?} and was killed, cmd: [{}]", .args.join(" "))]
    TimedOut {
        program: String,
        args: Vec<String>,
        timeout: Duration,
    },
}

/// Errors returned by [`VolumeRegistry`](crate::VolumeRegistry) operations.
#[derive(Debug, Error)]
pub enum VolumeError {
    #[error("volume '{name}' not found")]
    NotFound { name: String },

    #[error("volume '{name}' is currently used by {references} container(s)")]
    InUse { name: String, references: u32 },

    #[error("volume '{name}': '{option}' option required")]
    MissingRequiredOption { name: String, option: &'static str },

    #[error("volume '{name}': invalid value for option '{option}': {reason}")]
    InvalidOption {
        name: String,
        option: String,
        reason: String,
    },

    #[error("invalid volume name '{name}': {reason}")]
    InvalidName { name: String, reason: &'static str },

    #[error("volume '{name}': remote target is already used by volume '{existing}'")]
    DuplicateTarget { name: String, existing: String },

    #[error("volume '{name}' is still mounted at {}, run cleanup first", .mount_point.display())]
    StillMounted { name: String, mount_point: PathBuf },

    #[error("{context} ({}): {source}", .path.display())]
    Io {
        context: String,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("mount of volume '{name}' failed: {source}")]
    MountFailed {
        name: String,
        #[source]
        source: ToolError,
    },

    #[error("unmount of volume '{name}' failed: {source}")]
    UnmountFailed {
        name: String,
        #[source]
        source: ToolError,
    },

    #[error("state file {} is corrupt: {reason}", .path.display())]
    CorruptState { path: PathBuf, reason: String },

    #[error("{operation} of volume '{name}' was applied but could not be persisted to {}: {source}", .path.display())]
    PersistenceFailed {
        name: String,
        operation: Operation,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("state directory {} is locked by another process", .path.display())]
    StateLocked { path: PathBuf },
}

/// Coarse classification of a [`VolumeError`].
///
/// Callers map this to their own representation (exit codes, status codes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The named volume does not exist.
    NotFound,
    /// The request conflicts with current state (in use, duplicate, mounted).
    Conflict,
    /// The request itself is malformed.
    InvalidArgument,
    /// An external tool failed.
    Tool,
    /// Filesystem failure.
    Io,
    /// The durable state is unusable or owned by someone else.
    State,
}

impl VolumeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::InUse { .. } | Self::DuplicateTarget { .. } | Self::StillMounted { .. } => {
                ErrorKind::Conflict
            }
            Self::MissingRequiredOption { .. }
            | Self::InvalidOption { .. }
            | Self::InvalidName { .. } => ErrorKind::InvalidArgument,
            Self::MountFailed { .. } | Self::UnmountFailed { .. } => ErrorKind::Tool,
            Self::Io { .. } | Self::PersistenceFailed { .. } => ErrorKind::Io,
            Self::CorruptState { .. } | Self::StateLocked { .. } => ErrorKind::State,
        }
    }

    pub(crate) fn not_found(name: &str) -> Self {
        Self::NotFound {
            name: name.to_string(),
        }
    }

    pub(crate) fn io(context: impl Into<String>, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            path: path.into(),
            source,
        }
    }
}

/// Result type for registry operations.
pub type VolumeResult<T> = Result<T, VolumeError>;
