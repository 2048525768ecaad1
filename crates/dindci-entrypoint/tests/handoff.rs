//! End-to-end runs of the `entrypoint` binary.
//!
//! Tests that need root return early when the suite runs unprivileged.

use nix::unistd::geteuid;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

const NOBODY: u32 = 65534;

fn entrypoint() -> Command {
    Command::new(env!("CARGO_BIN_EXE_entrypoint"))
}

/// A root-owned scratch dir with a stand-in socket file and a service user
/// that exists everywhere.
fn root_env(dir: &Path) -> Command {
    let socket = dir.join("docker.sock");
    std::fs::write(&socket, b"").unwrap();
    let mut cmd = entrypoint();
    cmd.env("DINDCI_DOCKER_SOCKET", &socket)
        .env("DINDCI_SERVICE_USER", "root");
    cmd
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

fn world_accessible(dir: &Path) {
    std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o777)).unwrap();
}

#[test]
fn non_root_caller_never_runs_the_command() {
    let scratch = tempfile::tempdir().unwrap();
    world_accessible(scratch.path());
    let marker = scratch.path().join("ran");

    let mut cmd = if geteuid().is_root() {
        // The build dir may sit under a 0700 home, so run a copy.
        let binary: PathBuf = scratch.path().join("entrypoint");
        std::fs::copy(env!("CARGO_BIN_EXE_entrypoint"), &binary).unwrap();
        std::fs::set_permissions(&binary, std::fs::Permissions::from_mode(0o755)).unwrap();
        let mut cmd = Command::new(&binary);
        cmd.uid(NOBODY).gid(NOBODY);
        cmd
    } else {
        entrypoint()
    };
    let output = cmd
        .args(["--", "sh", "-c", "touch \"$0\""])
        .arg(&marker)
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(1), "stderr: {}", stderr(&output));
    assert!(stderr(&output).contains("entrypoint must run as root"));
    assert!(!marker.exists());
}

#[test]
fn command_exit_status_becomes_the_process_status() {
    if !geteuid().is_root() {
        eprintln!("skipping: needs root");
        return;
    }
    let scratch = tempfile::tempdir().unwrap();
    let output = root_env(scratch.path())
        .args(["-u", "root", "--", "sh", "-c", "exit 7"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(7), "stderr: {}", stderr(&output));
}

#[test]
fn missing_program_exits_127() {
    if !geteuid().is_root() {
        eprintln!("skipping: needs root");
        return;
    }
    let scratch = tempfile::tempdir().unwrap();
    let output = root_env(scratch.path())
        .args(["-u", "root", "dindci-no-such-program"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(127), "stderr: {}", stderr(&output));
}

#[test]
fn missing_command_is_reported_before_any_account_lookup() {
    if !geteuid().is_root() {
        eprintln!("skipping: needs root");
        return;
    }
    let scratch = tempfile::tempdir().unwrap();
    let output = root_env(scratch.path())
        .env("DINDCI_SERVICE_USER", "dindci-no-such-user")
        .args(["-u", "root"])
        .output()
        .unwrap();

    let err = stderr(&output);
    assert_eq!(output.status.code(), Some(1), "stderr: {err}");
    assert!(err.contains("usage error"), "stderr: {err}");
    assert!(!err.contains("does not exist"), "stderr: {err}");
}
