#![allow(deprecated)] // cargo_bin! macro doesn't exist yet in assert_cmd 2.1

use std::fs;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

const TARGET: &str = "alice@files.example:/srv/data";

fn plugin(root: &Path) -> Command {
    let mut cmd = Command::cargo_bin("docker-volume-sshfs").unwrap();
    cmd.env("SSHFS_VOLUME_ROOT", root);
    cmd.env_remove("SSHFS_VOLUME_CONFIG");
    cmd.env_remove("RUST_LOG");
    cmd
}

/// Config file pointing the mount tools at stand-in programs.
fn config_with_tools(dir: &Path, sshfs: &str, umount: &str) -> std::path::PathBuf {
    let path = dir.join("config.toml");
    fs::write(
        &path,
        format!("[registry]\nsshfs_program = \"{sshfs}\"\numount_program = \"{umount}\"\n"),
    )
    .unwrap();
    path
}

fn create(root: &Path, name: &str, target: &str) {
    plugin(root)
        .args(["create", name, "-o"])
        .arg(format!("sshcmd={target}"))
        .assert()
        .success()
        .stdout(predicate::str::diff(format!("{name}\n")));
}

// ============================================================================
// Basic CLI tests
// ============================================================================

#[test]
fn test_help() {
    let dir = TempDir::new().unwrap();
    plugin(dir.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Docker volume plugin for sshfs-backed volumes"))
        .stdout(predicate::str::contains("serve"))
        .stdout(predicate::str::contains("create"))
        .stdout(predicate::str::contains("cleanup"));
}

#[test]
fn test_ls_empty() {
    let dir = TempDir::new().unwrap();
    plugin(dir.path())
        .arg("ls")
        .assert()
        .success()
        .stderr(predicate::str::contains("No volumes."));

    plugin(dir.path())
        .args(["ls", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::diff("[]\n"));
}

// ============================================================================
// Volume lifecycle
// ============================================================================

#[test]
fn test_create_ls_inspect_rm() {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    create(root, "data", TARGET);

    plugin(root)
        .arg("ls")
        .assert()
        .success()
        .stdout(predicate::str::contains("data"))
        .stdout(predicate::str::contains(TARGET))
        .stdout(predicate::str::contains("idle"));

    let output = plugin(root).args(["inspect", "data"]).output().unwrap();
    assert!(output.status.success());
    let info: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(info["name"], "data");
    assert_eq!(info["remote_target"], TARGET);
    assert_eq!(info["references"], 0);
    let mount_point = info["mount_point"].as_str().unwrap();
    assert!(Path::new(mount_point).starts_with(root.join("volumes")));

    assert!(root.join("state").join("sshfs-state.json").exists());

    plugin(root)
        .args(["rm", "data"])
        .assert()
        .success()
        .stdout(predicate::str::diff("data\n"));

    plugin(root)
        .args(["inspect", "data"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("volume 'data' not found"));
}

#[test]
fn test_password_is_not_shown() {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    plugin(root)
        .args(["create", "data", "-o"])
        .arg(format!("sshcmd={TARGET}"))
        .args(["-o", "password=hunter2", "-o", "port=2222"])
        .assert()
        .success();

    plugin(root)
        .args(["ls", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("2222"))
        .stdout(predicate::str::contains("hunter2").not());

    plugin(root)
        .args(["inspect", "data"])
        .assert()
        .success()
        .stdout(predicate::str::contains("hunter2").not());
}

#[test]
fn test_create_requires_sshcmd() {
    let dir = TempDir::new().unwrap();
    plugin(dir.path())
        .args(["create", "data", "-o", "password=x"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("'sshcmd' option required"));
}

#[test]
fn test_create_rejects_bad_port() {
    let dir = TempDir::new().unwrap();
    plugin(dir.path())
        .args(["create", "data", "-o", "sshcmd=u@h:/x", "-o", "port=ssh"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("port"));
}

#[test]
fn test_duplicate_target_conflicts() {
    let dir = TempDir::new().unwrap();
    create(dir.path(), "a", TARGET);

    plugin(dir.path())
        .args(["create", "b", "-o"])
        .arg(format!("sshcmd={TARGET}"))
        .assert()
        .code(4)
        .stderr(predicate::str::contains("already used by volume 'a'"));
}

#[test]
fn test_rm_unknown_volume() {
    let dir = TempDir::new().unwrap();
    plugin(dir.path())
        .args(["rm", "ghost"])
        .assert()
        .code(3);
}

// ============================================================================
// Mounting through stand-in tools
// ============================================================================

#[test]
fn test_mount_prints_mount_point() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("root");
    let config = config_with_tools(dir.path(), "true", "true");
    create(&root, "data", TARGET);

    let output = plugin(&root)
        .arg("--config")
        .arg(&config)
        .args(["mount", "data"])
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let mount_point = String::from_utf8(output.stdout).unwrap();
    let mount_point = Path::new(mount_point.trim());
    assert!(mount_point.starts_with(root.join("volumes")));
    assert!(mount_point.is_dir());

    plugin(&root)
        .arg("--config")
        .arg(&config)
        .args(["unmount", "data"])
        .assert()
        .success();
}

#[test]
fn test_mount_failure_exit_code() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("root");
    let config = config_with_tools(dir.path(), "false", "true");
    create(&root, "data", TARGET);

    plugin(&root)
        .arg("--config")
        .arg(&config)
        .args(["mount", "data"])
        .assert()
        .code(5)
        .stderr(predicate::str::contains("mount of volume 'data' failed"));
}

#[test]
fn test_cleanup_with_nothing_flagged() {
    let dir = TempDir::new().unwrap();
    create(dir.path(), "data", TARGET);

    plugin(dir.path())
        .arg("cleanup")
        .assert()
        .success()
        .stderr(predicate::str::contains("No volumes need cleanup."));

    plugin(dir.path())
        .args(["cleanup", "data"])
        .assert()
        .success()
        .stderr(predicate::str::contains("nothing to clean up"));
}

// ============================================================================
// Configuration
// ============================================================================

#[test]
fn test_invalid_config_file() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("config.toml");
    fs::write(&config, "unknown_key = 1\n").unwrap();

    plugin(dir.path())
        .arg("--config")
        .arg(&config)
        .arg("ls")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Failed to parse config file"));
}

#[test]
fn test_corrupt_state_file() {
    let dir = TempDir::new().unwrap();
    fs::create_dir_all(dir.path().join("state")).unwrap();
    fs::write(dir.path().join("state").join("sshfs-state.json"), "{ nope").unwrap();

    plugin(dir.path())
        .arg("ls")
        .assert()
        .code(6)
        .stderr(predicate::str::contains("corrupt"));
}
