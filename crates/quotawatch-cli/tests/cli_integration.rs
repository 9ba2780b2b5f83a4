//! Integration tests for quotawatch-cli
//!
//! These tests verify the CLI commands work end-to-end.
//! Tests run serially since they share environment variables.

use assert_cmd::Command;
use predicates::prelude::*;
use serial_test::serial;
use tempfile::TempDir;

/// Get a Command for the quotawatch binary with an isolated settings file
fn quotawatch(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("quotawatch").unwrap();
    cmd.env_remove("QUOTAWATCH_CONFIG")
        .arg("--config")
        .arg(dir.path().join("settings.json"));
    cmd
}

// =============================================================================
// Help and Version Tests
// =============================================================================

#[test]
#[serial]
fn test_cli_help() {
    Command::cargo_bin("quotawatch")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("quotawatch"))
        .stdout(predicate::str::contains("COMMAND").or(predicate::str::contains("Commands")));
}

#[test]
#[serial]
fn test_cli_version() {
    Command::cargo_bin("quotawatch")
        .unwrap()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("quotawatch"));
}

#[test]
#[serial]
fn test_watch_help() {
    Command::cargo_bin("quotawatch")
        .unwrap()
        .args(["watch", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--interval"));
}

#[test]
#[serial]
fn test_invalid_format_is_rejected() {
    let dir = TempDir::new().unwrap();
    quotawatch(&dir)
        .args(["--format", "yaml", "providers", "list"])
        .assert()
        .failure();
}

// =============================================================================
// Providers Command Tests
// =============================================================================

#[test]
#[serial]
fn test_providers_list_json() {
    let dir = TempDir::new().unwrap();
    quotawatch(&dir)
        .args(["--format", "json", "providers", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"id\": \"claude\""))
        .stdout(predicate::str::contains("\"id\": \"zai\""));
}

#[test]
#[serial]
fn test_providers_disable_persists() {
    let dir = TempDir::new().unwrap();

    quotawatch(&dir)
        .args(["providers", "disable", "codex"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Disabled codex"));

    let saved = std::fs::read_to_string(dir.path().join("settings.json")).unwrap();
    let doc: serde_json::Value = serde_json::from_str(&saved).unwrap();
    assert_eq!(doc["providers"]["codex"]["enabled"], false);

    quotawatch(&dir)
        .args(["--format", "json", "providers", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"id\": \"codex\""));
}

#[test]
#[serial]
fn test_providers_enable_unknown_fails() {
    let dir = TempDir::new().unwrap();
    quotawatch(&dir)
        .args(["providers", "enable", "nonexistent"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("nonexistent"));
}

#[test]
#[serial]
fn test_refresh_disabled_provider_fails() {
    let dir = TempDir::new().unwrap();
    quotawatch(&dir)
        .args(["refresh", "copilot"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("disabled"));
}

#[test]
#[serial]
fn test_config_from_env_var() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("env-settings.json");

    Command::cargo_bin("quotawatch")
        .unwrap()
        .env("QUOTAWATCH_CONFIG", &path)
        .args(["--quiet", "providers", "enable", "zai"])
        .assert()
        .success();

    let saved = std::fs::read_to_string(&path).unwrap();
    assert!(saved.contains("\"zai\""));
}
