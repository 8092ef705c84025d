//! CLI integration tests
//!
//! Tests the command-line interface using assert_cmd

mod common;

use predicates::prelude::*;
use tempfile::TempDir;

use common::observer_cmd;

// ─────────────────────────────────────────────────────────────────
// Help and Version Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_help_flag() {
    let dir = TempDir::new().unwrap();
    observer_cmd(dir.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("presence counter"))
        .stdout(predicate::str::contains("serve"))
        .stdout(predicate::str::contains("load"))
        .stdout(predicate::str::contains("version"))
        .stdout(predicate::str::contains("config"));
}

#[test]
fn test_version_command() {
    let dir = TempDir::new().unwrap();
    observer_cmd(dir.path())
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains("observer-zero"))
        .stdout(predicate::str::contains("Build Information"))
        .stdout(predicate::str::contains("Git Hash"))
        .stdout(predicate::str::contains("Target"));
}

#[test]
fn test_short_version_flag() {
    let dir = TempDir::new().unwrap();
    observer_cmd(dir.path())
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("observer-zero"));
}

// ─────────────────────────────────────────────────────────────────
// Config Command Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_config_show_default() {
    let dir = TempDir::new().unwrap();
    observer_cmd(dir.path())
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[server]"))
        .stdout(predicate::str::contains("[harness]"))
        .stdout(predicate::str::contains("[logging]"))
        .stdout(predicate::str::contains("broadcast_throttle_ms = 500"));
}

#[test]
fn test_config_validate_default() {
    let dir = TempDir::new().unwrap();
    observer_cmd(dir.path())
        .args(["config", "validate"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration is valid"));
}

#[test]
fn test_config_validate_nonexistent_file() {
    let dir = TempDir::new().unwrap();
    observer_cmd(dir.path())
        .args(["config", "validate", "--config", "/nonexistent/path/config.toml"])
        .assert()
        .code(10)
        .stderr(predicate::str::contains("E100"));
}

#[test]
fn test_config_init_help() {
    let dir = TempDir::new().unwrap();
    observer_cmd(dir.path())
        .args(["config", "init", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Initialize"))
        .stdout(predicate::str::contains("--path"))
        .stdout(predicate::str::contains("--force"));
}

// ─────────────────────────────────────────────────────────────────
// Serve and Load Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_serve_help() {
    let dir = TempDir::new().unwrap();
    observer_cmd(dir.path())
        .args(["serve", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("aggregator"))
        .stdout(predicate::str::contains("--port"))
        .stdout(predicate::str::contains("--testing"));
}

#[test]
fn test_serve_with_missing_config() {
    let dir = TempDir::new().unwrap();
    observer_cmd(dir.path())
        .args(["serve", "--config", "/nonexistent/config.toml"])
        .assert()
        .code(10);
}

#[test]
fn test_load_rejects_non_websocket_url() {
    let dir = TempDir::new().unwrap();
    observer_cmd(dir.path())
        .args(["load", "--url", "http://127.0.0.1:1/ws"])
        .assert()
        .code(10)
        .stderr(predicate::str::contains("ws://"));
}

#[test]
fn test_load_reads_commands_from_stdin() {
    let dir = TempDir::new().unwrap();
    observer_cmd(dir.path())
        .args(["load", "--url", "ws://127.0.0.1:1/ws"])
        .write_stdin("2 -5\nstatus\n5\n")
        .timeout(std::time::Duration::from_secs(30))
        .assert()
        .success()
        .stderr(predicate::str::contains("Invalid target '-5'"))
        .stdout(predicate::str::contains("0/0 connected"));
}

#[test]
fn test_load_exits_on_end_of_input() {
    let dir = TempDir::new().unwrap();
    observer_cmd(dir.path())
        .args(["load", "--url", "ws://127.0.0.1:1/ws"])
        .write_stdin("")
        .timeout(std::time::Duration::from_secs(30))
        .assert()
        .success();
}

// ─────────────────────────────────────────────────────────────────
// Verbosity Flag Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_verbose_flag() {
    let dir = TempDir::new().unwrap();
    observer_cmd(dir.path()).args(["-v", "version"]).assert().success();
}

#[test]
fn test_very_verbose_flag() {
    let dir = TempDir::new().unwrap();
    observer_cmd(dir.path()).args(["-vv", "version"]).assert().success();
}

#[test]
fn test_quiet_flag() {
    let dir = TempDir::new().unwrap();
    observer_cmd(dir.path()).args(["--quiet", "version"]).assert().success();
}

// ─────────────────────────────────────────────────────────────────
// Error Handling Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_unknown_command() {
    let dir = TempDir::new().unwrap();
    observer_cmd(dir.path())
        .arg("unknown-command")
        .assert()
        .failure()
        .stderr(predicate::str::contains("error"));
}

#[test]
fn test_missing_subcommand() {
    let dir = TempDir::new().unwrap();
    observer_cmd(dir.path()).assert().failure();
}
