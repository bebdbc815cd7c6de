//! End-to-end CLI tests for the linkharvest binary.

use assert_cmd::Command;
use predicates::prelude::*;

/// Test that --help displays usage information and exits with code 0.
#[test]
fn test_binary_help_displays_usage() {
    let mut cmd = Command::cargo_bin("linkharvest").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Usage"))
        .stdout(predicate::str::contains("--max-concurrent"))
        .stdout(predicate::str::contains("--storage-state"));
}

/// Test that --version reports the crate version.
#[test]
fn test_binary_version_flag() {
    let mut cmd = Command::cargo_bin("linkharvest").unwrap();
    cmd.arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("linkharvest"));
}

/// A missing session-state blob fails fast with bootstrap guidance, before
/// any automation backend is touched.
#[test]
fn test_missing_session_state_fails_with_guidance() {
    let dir = tempfile::TempDir::new().unwrap();
    let mut cmd = Command::cargo_bin("linkharvest").unwrap();
    cmd.arg("--storage-state")
        .arg(dir.path().join("absent.json"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("session-state blob not found"))
        .stderr(predicate::str::contains("login bootstrap"));
}

/// An out-of-range concurrency bound is rejected by argument validation.
#[test]
fn test_concurrency_out_of_range_is_rejected() {
    let mut cmd = Command::cargo_bin("linkharvest").unwrap();
    cmd.args(["--max-concurrent", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--max-concurrent"));
}

/// Without the browser feature compiled in, a run past the blob check
/// reports the missing backend instead of panicking.
#[cfg(not(feature = "browser"))]
#[test]
fn test_run_without_backend_reports_missing_feature() {
    let dir = tempfile::TempDir::new().unwrap();
    let blob = dir.path().join("storage_state.json");
    std::fs::write(&blob, r#"{"cookies": []}"#).unwrap();

    let mut cmd = Command::cargo_bin("linkharvest").unwrap();
    cmd.arg("--storage-state")
        .arg(&blob)
        .assert()
        .failure()
        .stderr(predicate::str::contains("no automation backend"));
}
