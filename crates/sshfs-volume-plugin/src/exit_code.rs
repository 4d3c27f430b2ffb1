//! Exit codes for the CLI.
//!
//! Scripts can tell a missing volume from a busy one without parsing
//! messages.

/// Successful execution
pub const SUCCESS: u8 = 0;

/// General/unspecified error
pub const GENERAL_ERROR: u8 = 1;

/// Request rejected: bad name or options
pub const INVALID_ARGUMENT: u8 = 2;

/// Volume does not exist
pub const NOT_FOUND: u8 = 3;

/// Volume is in use, still mounted, or its target is taken
pub const CONFLICT: u8 = 4;

/// `sshfs` or `umount` failed
pub const MOUNT_FAILED: u8 = 5;

/// State file is corrupt or held by another process
pub const STATE_UNAVAILABLE: u8 = 6;
