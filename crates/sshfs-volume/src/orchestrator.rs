//! Translation of volume records into external mount/unmount commands.
//!
//! The registry talks to the outside world only through [`MountTool`], so
//! the state machine can be exercised without `sshfs` installed.
//!
//! # Commands
//!
//! - mount: `sshfs <target> -oStrictHostKeyChecking=no [-p <port>]
//!   [-o workaround=rename -o password_stdin] [-o <opt>]... <mount_point>`,
//!   with the password written to stdin
//! - unmount: `umount <mount_point>`
//! - forced teardown: `fusermount -uz <mount_point>`, falling back to
//!   `umount -l <mount_point>`

use std::ffi::OsString;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Output, Stdio};
use std::sync::mpsc;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info, warn};

use crate::config::RegistryConfig;
use crate::error::ToolError;
use crate::system_mounts;
use crate::volume::VolumeSpec;

/// Host key checking is disabled: the plugin runs unattended and has no
/// interactive prompt to accept new keys.
pub const HOST_KEY_CHECK_FLAG: &str = "-oStrictHostKeyChecking=no";

/// Options added when a password is piped on stdin.
pub const CREDENTIAL_FLAGS: [&str; 4] = ["-o", "workaround=rename", "-o", "password_stdin"];

/// Performs the OS-level side of mounting.
pub trait MountTool: Send + Sync {
    /// Attach `volume.remote_target` at `volume.mount_point`.
    fn mount(&self, volume: &VolumeSpec) -> Result<(), ToolError>;

    /// Detach whatever is mounted at `mount_point`.
    fn unmount(&self, mount_point: &Path) -> Result<(), ToolError>;

    /// Detach a mount that a regular unmount could not remove.
    fn force_unmount(&self, mount_point: &Path) -> Result<(), ToolError> {
        self.unmount(mount_point)
    }

    /// Whether `mount_point` currently appears in the system mount table.
    fn is_mounted(&self, mount_point: &Path) -> io::Result<bool> {
        system_mounts::is_mounted(mount_point)
    }
}

/// Argument vector for mounting `volume` with sshfs.
///
/// Never contains the credential.
pub fn mount_args(volume: &VolumeSpec) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        volume.remote_target.clone().into(),
        HOST_KEY_CHECK_FLAG.into(),
    ];
    if let Some(port) = volume.port {
        args.push("-p".into());
        args.push(port.to_string().into());
    }
    if volume.credential.is_some() {
        args.extend(CREDENTIAL_FLAGS.iter().map(OsString::from));
    }
    for option in &volume.extra_options {
        args.push("-o".into());
        args.push(option.into());
    }
    args.push(volume.mount_point.clone().into_os_string());
    args
}

/// [`MountTool`] backed by the `sshfs`, `umount` and `fusermount` binaries.
#[derive(Debug, Clone)]
pub struct SshfsTool {
    sshfs_program: PathBuf,
    umount_program: PathBuf,
    fusermount_program: PathBuf,
    mount_timeout: Option<Duration>,
}

impl SshfsTool {
    pub fn new(config: &RegistryConfig) -> Self {
        Self {
            sshfs_program: config.sshfs_program.clone(),
            umount_program: config.umount_program.clone(),
            fusermount_program: config.fusermount_program.clone(),
            mount_timeout: config.mount_timeout,
        }
    }
}

impl MountTool for SshfsTool {
    fn mount(&self, volume: &VolumeSpec) -> Result<(), ToolError> {
        let args = mount_args(volume);
        info!(
            volume = %volume.name,
            args = ?args,
            "Mounting volume"
        );
        let output = run_tool(
            &self.sshfs_program,
            &args,
            volume.credential.as_ref(),
            self.mount_timeout,
        )?;
        debug!(volume = %volume.name, output = %output.trim(), "sshfs finished");
        Ok(())
    }

    fn unmount(&self, mount_point: &Path) -> Result<(), ToolError> {
        info!(mount_point = %mount_point.display(), "Unmounting");
        run_tool(
            &self.umount_program,
            &[mount_point.as_os_str().to_owned()],
            None,
            None,
        )
        .map(|_| ())
    }

    fn force_unmount(&self, mount_point: &Path) -> Result<(), ToolError> {
        // fusermount -uz detaches FUSE mounts lazily, even with open handles
        let lazy_fuse = [OsString::from("-uz"), mount_point.as_os_str().to_owned()];
        match run_tool(&self.fusermount_program, &lazy_fuse, None, None) {
            Ok(_) => {
                debug!(mount_point = %mount_point.display(), "Lazy unmount via fusermount succeeded");
                return Ok(());
            }
            Err(e) => debug!(mount_point = %mount_point.display(), error = %e, "fusermount -uz failed"),
        }

        let lazy = [OsString::from("-l"), mount_point.as_os_str().to_owned()];
        run_tool(&self.umount_program, &lazy, None, None).map(|_| ())
    }
}

/// Run `program` with `args`, optionally piping `stdin` and bounding the
/// runtime. Returns the combined stdout/stderr on success.
pub(crate) fn run_tool(
    program: &Path,
    args: &[OsString],
    stdin: Option<&SecretString>,
    timeout: Option<Duration>,
) -> Result<String, ToolError> {
    let program_name = program.display().to_string();
    let printable_args = || {
        args.iter()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect::<Vec<_>>()
    };

    let mut child = Command::new(program)
        .args(args)
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| ToolError::Spawn {
            program: program_name.clone(),
            source,
        })?;

    if let Some(secret) = stdin {
        if let Some(mut pipe) = child.stdin.take() {
            // A tool that exits without reading closes the pipe; its exit status reports that.
            if let Err(e) = pipe.write_all(secret.expose_secret().as_bytes()) {
                debug!(program = %program_name, error = %e, "Could not write stdin");
            }
        }
    }

    let output = match wait_with_timeout(child, timeout) {
        Some(result) => result.map_err(|source| ToolError::Spawn {
            program: program_name.clone(),
            source,
        })?,
        None => {
            return Err(ToolError::TimedOut {
                program: program_name,
                args: printable_args(),
                timeout: timeout.unwrap_or_default(),
            });
        }
    };

    let combined = combined_output(&output);
    if output.status.success() {
        Ok(combined)
    } else {
        Err(ToolError::Failed {
            program: program_name,
            args: printable_args(),
            status: output.status.to_string(),
            output: combined.trim().to_string(),
        })
    }
}

fn combined_output(output: &Output) -> String {
    let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
    combined.push_str(&String::from_utf8_lossy(&output.stderr));
    combined
}

/// Wait for `child`, killing it once `timeout` elapses.
///
/// Returns `None` if the child was killed.
fn wait_with_timeout(child: Child, timeout: Option<Duration>) -> Option<io::Result<Output>> {
    let Some(timeout) = timeout else {
        return Some(child.wait_with_output());
    };

    let child_id = child.id();
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let _ = tx.send(child.wait_with_output());
    });

    match rx.recv_timeout(timeout) {
        Ok(result) => Some(result),
        Err(mpsc::RecvTimeoutError::Timeout) => {
            warn!(pid = child_id, ?timeout, "Tool timed out, killing it");
            kill_process(child_id);
            // Reap the child so it does not linger as a zombie
            let _ = rx.recv();
            None
        }
        Err(mpsc::RecvTimeoutError::Disconnected) => {
            Some(Err(io::Error::other("tool waiter thread exited unexpectedly")))
        }
    }
}

#[cfg(unix)]
fn kill_process(pid: u32) {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    match i32::try_from(pid) {
        Ok(raw) => {
            if let Err(e) = kill(Pid::from_raw(raw), Signal::SIGKILL) {
                warn!(pid, error = %e, "Failed to kill timed out tool");
            }
        }
        Err(_) => warn!(pid, "PID out of range, cannot kill timed out tool"),
    }
}

#[cfg(not(unix))]
fn kill_process(pid: u32) {
    warn!(pid, "Killing timed out tools is not supported on this platform");
}
