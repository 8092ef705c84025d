//! Common test utilities and fixtures

#![allow(dead_code)]

use std::path::PathBuf;

use assert_cmd::Command;

/// Command for the observer-zero binary, run from a scratch directory so no
/// stray configuration file is picked up
pub fn observer_cmd(cwd: &std::path::Path) -> Command {
    let mut cmd = Command::cargo_bin("observer-zero").unwrap();
    cmd.current_dir(cwd);
    for key in ["OBSERVER_CONFIG", "OBSERVER_SERVER_URL", "OBSERVER_PORT", "RUST_LOG"] {
        cmd.env_remove(key);
    }
    cmd
}

/// Get the path to the test fixtures directory
pub fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
}

/// Get a path to a specific fixture file
pub fn fixture_path(name: &str) -> PathBuf {
    fixtures_dir().join(name)
}

pub fn valid_config_fixture() -> PathBuf {
    fixture_path("valid_config.toml")
}

pub fn invalid_config_fixture() -> PathBuf {
    fixture_path("invalid_config.toml")
}
