//! CLI integration tests
//!
//! Tests the command-line interface using assert_cmd

mod common;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// Get a command for the fieldmesh binary
fn fieldmesh_cmd() -> Command {
    Command::cargo_bin("fieldmesh").unwrap()
}

// ─────────────────────────────────────────────────────────────────
// Help and Version Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_help_flag() {
    fieldmesh_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("fieldmesh"))
        .stdout(predicate::str::contains("serve"))
        .stdout(predicate::str::contains("peer"))
        .stdout(predicate::str::contains("version"))
        .stdout(predicate::str::contains("config"));
}

#[test]
fn test_version_command() {
    fieldmesh_cmd()
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains("fieldmesh"))
        .stdout(predicate::str::contains("Build Information"))
        .stdout(predicate::str::contains("Git Hash"))
        .stdout(predicate::str::contains("Target"));
}

#[test]
fn test_short_version_flag() {
    fieldmesh_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("fieldmesh"));
}

// ─────────────────────────────────────────────────────────────────
// Config Command Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_config_show_fixture() {
    fieldmesh_cmd()
        .arg("config")
        .arg("show")
        .arg("--config")
        .arg(common::valid_config_fixture())
        .assert()
        .success()
        .stdout(predicate::str::contains("[server]"))
        .stdout(predicate::str::contains("[relay]"))
        .stdout(predicate::str::contains("[smart_data]"))
        .stdout(predicate::str::contains("[peer]"))
        .stdout(predicate::str::contains("[logging]"))
        .stdout(predicate::str::contains("fixture-peer"));
}

#[test]
fn test_config_validate_fixture() {
    fieldmesh_cmd()
        .arg("config")
        .arg("validate")
        .arg("--config")
        .arg(common::valid_config_fixture())
        .assert()
        .success()
        .stdout(predicate::str::contains("valid"));
}

#[test]
fn test_config_validate_invalid_fixture() {
    fieldmesh_cmd()
        .arg("config")
        .arg("validate")
        .arg("--config")
        .arg(common::invalid_config_fixture())
        .assert()
        .failure()
        .code(10)
        .stderr(predicate::str::contains("ws://"));
}

#[test]
fn test_config_validate_nonexistent_file() {
    fieldmesh_cmd()
        .arg("config")
        .arg("validate")
        .arg("--config")
        .arg("/nonexistent/path/config.toml")
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found").and(predicate::str::contains("config init")));
}

#[test]
fn test_config_init_writes_and_refuses_overwrite() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("config.toml");

    fieldmesh_cmd()
        .arg("config")
        .arg("init")
        .arg("--path")
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration written"));
    assert!(path.exists());

    // Generated file must itself be valid
    fieldmesh_cmd()
        .arg("config")
        .arg("validate")
        .arg("--config")
        .arg(&path)
        .assert()
        .success();

    fieldmesh_cmd()
        .arg("config")
        .arg("init")
        .arg("--path")
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("--force"));

    fieldmesh_cmd()
        .arg("config")
        .arg("init")
        .arg("--path")
        .arg(&path)
        .arg("--force")
        .assert()
        .success();
}

#[test]
fn test_config_init_help() {
    fieldmesh_cmd()
        .arg("config")
        .arg("init")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Initialize"))
        .stdout(predicate::str::contains("--path"))
        .stdout(predicate::str::contains("--force"));
}

// ─────────────────────────────────────────────────────────────────
// Serve / Peer Command Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_serve_help() {
    fieldmesh_cmd()
        .arg("serve")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("coordination server"))
        .stdout(predicate::str::contains("--listen"))
        .stdout(predicate::str::contains("--tasks"));
}

#[test]
fn test_serve_with_invalid_config() {
    fieldmesh_cmd()
        .arg("serve")
        .arg("--config")
        .arg("/nonexistent/config.toml")
        .assert()
        .failure();
}

#[test]
fn test_serve_rejects_bad_listen_override() {
    fieldmesh_cmd()
        .arg("serve")
        .arg("--config")
        .arg(common::valid_config_fixture())
        .arg("--listen")
        .arg("not-an-address")
        .assert()
        .failure()
        .stderr(predicate::str::contains("not a socket address"));
}

#[test]
fn test_peer_help() {
    fieldmesh_cmd()
        .arg("peer")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--server"))
        .stdout(predicate::str::contains("--stream"))
        .stdout(predicate::str::contains("--smart-data"))
        .stdout(predicate::str::contains("--send-to"));
}

#[test]
fn test_peer_send_to_requires_file() {
    fieldmesh_cmd()
        .arg("peer")
        .arg("--send-to")
        .arg("b")
        .assert()
        .failure()
        .stderr(predicate::str::contains("--file"));
}

#[test]
fn test_peer_rejects_http_server_url() {
    fieldmesh_cmd()
        .arg("peer")
        .arg("--config")
        .arg(common::valid_config_fixture())
        .arg("--server")
        .arg("http://127.0.0.1:9080")
        .assert()
        .failure()
        .code(10);
}

// ─────────────────────────────────────────────────────────────────
// Verbosity Flag Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_verbose_flag() {
    fieldmesh_cmd()
        .arg("-v")
        .arg("version")
        .assert()
        .success();
}

#[test]
fn test_very_verbose_flag() {
    fieldmesh_cmd()
        .arg("-vv")
        .arg("version")
        .assert()
        .success();
}

#[test]
fn test_quiet_flag() {
    fieldmesh_cmd()
        .arg("--quiet")
        .arg("version")
        .assert()
        .success();
}

// ─────────────────────────────────────────────────────────────────
// Error Handling Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_unknown_command() {
    fieldmesh_cmd()
        .arg("unknown-command")
        .assert()
        .failure()
        .stderr(predicate::str::contains("error"));
}

#[test]
fn test_missing_subcommand() {
    fieldmesh_cmd()
        .assert()
        .failure();
}
