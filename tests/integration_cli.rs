//! Integration tests for the `hfifo` binary.
//!
//! The `run` tests spawn the daemon and stop it with a signal, so everything
//! here runs serially.

use serial_test::serial;
use std::fs;
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// Get the path to the compiled `hfifo` binary (from target/debug or target/release).
fn hfifo_binary() -> PathBuf {
    let mut path = std::env::current_exe().expect("could not get current exe path");
    // current_exe is something like target/debug/deps/integration_cli-<hash>
    path.pop();
    if path.ends_with("deps") {
        path.pop();
    }
    path.push("hfifo");
    assert!(
        path.exists(),
        "hfifo binary not found at {:?}. Run `cargo build` first.",
        path
    );
    path
}

/// Helper: run `hfifo --root <root> <args>`.
fn hfifo(root: &Path, args: &[&str]) -> std::process::Output {
    Command::new(hfifo_binary())
        .arg("--root")
        .arg(root)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .unwrap_or_else(|e| panic!("Failed to run hfifo {:?}: {}", args, e))
}

/// Helper: run and assert success, returning stdout.
fn hfifo_ok(root: &Path, args: &[&str]) -> String {
    let output = hfifo(root, args);
    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    assert!(
        output.status.success(),
        "hfifo {:?} failed.\nstdout: {}\nstderr: {}",
        args,
        stdout,
        stderr
    );
    stdout
}

/// Helper: a runtime root with the mount points already in place.
fn setup_root() -> TempDir {
    let dir = TempDir::new().unwrap();
    fs::create_dir_all(dir.path().join("hl_book")).unwrap();
    fs::create_dir_all(dir.path().join("hl_tmp")).unwrap();
    dir
}

fn is_fifo(path: &Path) -> bool {
    fs::symlink_metadata(path)
        .map(|m| m.file_type().is_fifo())
        .unwrap_or(false)
}

fn wait_for(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    cond()
}

#[test]
#[serial]
fn test_bootstrap_creates_pipes() {
    let root = setup_root();
    let stdout = hfifo_ok(root.path(), &["bootstrap"]);

    for pipe in ["fills", "order", "diffs"] {
        assert!(is_fifo(&root.path().join("hl_book").join(pipe)));
    }
    assert!(stdout.contains("created"), "stdout: {}", stdout);
    assert_eq!(stdout.matches("linked").count(), 6, "stdout: {}", stdout);
}

#[test]
#[serial]
fn test_status_json_after_bootstrap() {
    let root = setup_root();
    hfifo_ok(root.path(), &["bootstrap"]);

    let stdout = hfifo_ok(root.path(), &["status", "--json"]);
    let status: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(status["healthy"], true);
    assert_eq!(status["streams"].as_array().unwrap().len(), 3);
    assert_eq!(status["streams"][2]["stream"], "raw-book-diffs");
    assert_eq!(status["streams"][2]["pipe_state"], "fifo");
}

#[test]
#[serial]
fn test_status_fails_before_bootstrap() {
    let root = setup_root();
    let output = hfifo(root.path(), &["status"]);
    assert!(!output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("missing"), "stdout: {}", stdout);
}

#[test]
#[serial]
fn test_rotate_at_instant() {
    let root = setup_root();
    hfifo_ok(root.path(), &["rotate", "--at", "2026-01-01T23:59:55Z"]);

    let hourly = root.path().join("hl_book/node_fills_by_block/hourly");
    assert_eq!(
        fs::read_link(hourly.join("20260101/23")).unwrap(),
        root.path().join("hl_book/fills")
    );
    assert_eq!(
        fs::read_link(hourly.join("20260102/0")).unwrap(),
        root.path().join("hl_book/fills")
    );

    let output = hfifo(root.path(), &["rotate", "--at", "yesterday"]);
    assert!(!output.status.success());
}

#[test]
#[serial]
fn test_sweep_named_rule() {
    let root = setup_root();
    let checkpoints = root
        .path()
        .join("hl/hyperliquid_data/evm_db_hub_slow/checkpoint");
    for name in ["7", "8", "9"] {
        fs::create_dir_all(checkpoints.join(name)).unwrap();
    }

    let stdout = hfifo_ok(root.path(), &["sweep", "--rule", "evm-checkpoints"]);
    assert!(stdout.contains("evm-checkpoints"), "stdout: {}", stdout);
    assert!(!checkpoints.join("7").exists());
    assert!(checkpoints.join("8").exists() && checkpoints.join("9").exists());

    let output = hfifo(root.path(), &["sweep", "--rule", "nope"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Unknown rule"), "stderr: {}", stderr);
}

#[test]
#[serial]
fn test_config_prints_effective_toml() {
    let root = setup_root();
    let stdout = hfifo_ok(root.path(), &["config"]);
    assert!(stdout.contains("book_root"), "stdout: {}", stdout);
    assert!(stdout.contains("55 59 * * * *"), "stdout: {}", stdout);

    // The printed config loads back through --config
    let path = root.path().join("hfifo.toml");
    fs::write(&path, &stdout).unwrap();
    let output = Command::new(hfifo_binary())
        .arg("--config")
        .arg(&path)
        .arg("bootstrap")
        .output()
        .unwrap();
    assert!(output.status.success(), "{:?}", output);
}

#[test]
#[serial]
fn test_missing_configuration_fails() {
    let output = Command::new(hfifo_binary())
        .arg("status")
        .output()
        .unwrap();
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("--config"), "stderr: {}", stderr);
}

#[test]
#[serial]
fn test_run_stops_on_sigterm_and_keeps_state() {
    let root = setup_root();
    let book = root.path().join("hl_book");

    let mut child = Command::new(hfifo_binary())
        .arg("--root")
        .arg(root.path())
        .arg("run")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();

    let ready = wait_for(Duration::from_secs(10), || {
        ["fills", "order", "diffs"]
            .iter()
            .all(|p| is_fifo(&book.join(p)))
            && root
                .path()
                .join("hl_tmp/node_raw_book_diffs_by_block")
                .symlink_metadata()
                .is_ok()
    });
    assert!(ready, "daemon did not bootstrap in time");

    unsafe {
        libc::kill(child.id() as libc::pid_t, libc::SIGTERM);
    }

    let mut status = None;
    let exited = wait_for(Duration::from_secs(10), || {
        status = child.try_wait().unwrap();
        status.is_some()
    });
    if !exited {
        let _ = child.kill();
    }
    assert!(exited, "daemon did not exit after SIGTERM");
    assert!(status.unwrap().success());

    // Nothing is cleaned up on shutdown
    for pipe in ["fills", "order", "diffs"] {
        assert!(is_fifo(&book.join(pipe)));
    }
}

#[test]
#[serial]
fn test_run_without_mount_exits_nonzero() {
    let root = TempDir::new().unwrap();
    let output = hfifo(root.path(), &["run"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Startup pass failed"), "stderr: {}", stderr);
}
