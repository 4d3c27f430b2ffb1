use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use sshfs_volume::{MountTool, RegistryConfig, ToolError, VolumeRegistry, VolumeSpec};
use tempfile::TempDir;

/// Mount tool that records calls instead of running `sshfs`.
#[derive(Default)]
pub struct RecordingTool {
    pub mounts: AtomicUsize,
    pub unmounts: AtomicUsize,
    pub force_unmounts: AtomicUsize,
    pub fail_mount: AtomicBool,
    pub fail_unmount: AtomicBool,
    /// Slow down mounts so concurrent callers overlap.
    pub mount_delay: Option<Duration>,
    pub mounted: Mutex<HashSet<PathBuf>>,
}

#[allow(dead_code)]
impl RecordingTool {
    pub fn slow(delay: Duration) -> Self {
        Self {
            mount_delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn mount_count(&self) -> usize {
        self.mounts.load(Ordering::SeqCst)
    }

    pub fn unmount_count(&self) -> usize {
        self.unmounts.load(Ordering::SeqCst)
    }

    pub fn force_unmount_count(&self) -> usize {
        self.force_unmounts.load(Ordering::SeqCst)
    }

    pub fn set_fail_mount(&self, fail: bool) {
        self.fail_mount.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_unmount(&self, fail: bool) {
        self.fail_unmount.store(fail, Ordering::SeqCst);
    }

    pub fn is_attached(&self, path: &Path) -> bool {
        self.mounted.lock().unwrap().contains(path)
    }

    pub fn attach(&self, path: PathBuf) {
        self.mounted.lock().unwrap().insert(path);
    }

    pub fn detach_all(&self) {
        self.mounted.lock().unwrap().clear();
    }
}

fn failure(program: &str, mount_point: &Path) -> ToolError {
    ToolError::Failed {
        program: program.to_string(),
        args: vec![mount_point.display().to_string()],
        status: "exit status: 1".to_string(),
        output: "simulated failure".to_string(),
    }
}

impl MountTool for RecordingTool {
    fn mount(&self, volume: &VolumeSpec) -> Result<(), ToolError> {
        if let Some(delay) = self.mount_delay {
            thread::sleep(delay);
        }
        if self.fail_mount.load(Ordering::SeqCst) {
            return Err(failure("sshfs", &volume.mount_point));
        }
        self.mounts.fetch_add(1, Ordering::SeqCst);
        self.attach(volume.mount_point.clone());
        Ok(())
    }

    fn unmount(&self, mount_point: &Path) -> Result<(), ToolError> {
        self.unmounts.fetch_add(1, Ordering::SeqCst);
        if self.fail_unmount.load(Ordering::SeqCst) {
            return Err(failure("umount", mount_point));
        }
        self.mounted.lock().unwrap().remove(mount_point);
        Ok(())
    }

    fn force_unmount(&self, mount_point: &Path) -> Result<(), ToolError> {
        self.force_unmounts.fetch_add(1, Ordering::SeqCst);
        self.mounted.lock().unwrap().remove(mount_point);
        Ok(())
    }

    fn is_mounted(&self, mount_point: &Path) -> io::Result<bool> {
        Ok(self.is_attached(mount_point))
    }
}

/// A registry rooted in a fresh temporary directory.
pub struct Fixture {
    pub dir: TempDir,
    pub tool: Arc<RecordingTool>,
    pub registry: VolumeRegistry,
}

#[allow(dead_code)]
impl Fixture {
    pub fn new() -> Self {
        Self::with_tool(RecordingTool::default())
    }

    pub fn with_tool(tool: RecordingTool) -> Self {
        let dir = TempDir::new().unwrap();
        let tool = Arc::new(tool);
        let registry = open_registry(dir.path(), &tool);
        Self {
            dir,
            tool,
            registry,
        }
    }

    pub fn config(&self) -> RegistryConfig {
        RegistryConfig::with_root(self.dir.path())
    }

    /// Make every state write fail by putting a regular file where the state
    /// directory was. The open lock file keeps working.
    pub fn block_state_writes(&self) {
        let state_dir = self.config().state_dir();
        std::fs::rename(&state_dir, state_dir.with_extension("moved")).unwrap();
        std::fs::write(&state_dir, b"").unwrap();
    }

    pub fn unblock_state_writes(&self) {
        let state_dir = self.config().state_dir();
        std::fs::remove_file(&state_dir).unwrap();
        std::fs::rename(state_dir.with_extension("moved"), &state_dir).unwrap();
    }

    /// Drop the registry and open a new one on the same root and tool.
    pub fn restart(self) -> Self {
        let Self { dir, tool, registry } = self;
        drop(registry);
        let registry = open_registry(dir.path(), &tool);
        Self {
            dir,
            tool,
            registry,
        }
    }
}

pub fn open_registry(root: &Path, tool: &Arc<RecordingTool>) -> VolumeRegistry {
    let tool: Arc<dyn MountTool> = Arc::clone(tool) as Arc<dyn MountTool>;
    VolumeRegistry::with_tool(&RegistryConfig::with_root(root), tool).unwrap()
}
