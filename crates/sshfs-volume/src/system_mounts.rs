//! Queries against the operating system's mount table.
//!
//! Used to reconcile persisted reference counts after a restart and to keep
//! destructive operations away from mount points that are still attached.

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};

/// Get the set of currently mounted filesystem paths.
///
/// Paths are canonicalized where possible so that symlinked roots compare equal.
pub fn mounted_paths() -> io::Result<HashSet<PathBuf>> {
    #[cfg(target_os = "linux")]
    {
        let contents = std::fs::read_to_string("/proc/mounts")?;
        Ok(parse_proc_mounts(&contents)
            .into_iter()
            .map(|path| path.canonicalize().unwrap_or(path))
            .collect())
    }

    #[cfg(not(target_os = "linux"))]
    {
        Ok(HashSet::new())
    }
}

/// Whether `path` is currently a mount point.
pub fn is_mounted(path: &Path) -> io::Result<bool> {
    let mounts = mounted_paths()?;
    let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    Ok(mounts.contains(&canonical))
}

/// Extract mount points from `/proc/mounts` content.
///
/// Format: `device mountpoint fstype options dump pass`, with whitespace in
/// paths escaped as octal (`\040` for a space).
pub fn parse_proc_mounts(contents: &str) -> Vec<PathBuf> {
    contents
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .map(|field| PathBuf::from(unescape_octal(field)))
        .collect()
}

fn unescape_octal(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 4 <= bytes.len() {
            let digits = &bytes[i + 1..i + 4];
            if digits.iter().all(|b| (b'0'..=b'7').contains(b)) {
                let value = digits
                    .iter()
                    .fold(0u32, |acc, b| acc * 8 + u32::from(b - b'0'));
                if let Ok(byte) = u8::try_from(value) {
                    out.push(byte);
                    i += 4;
                    continue;
                }
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
