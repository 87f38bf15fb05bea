//! Configuration system tests
//!
//! Tests configuration loading, validation, and environment overrides

mod common;

use common::ConfigFixture;
use fieldmesh::config::FieldmeshConfig;
use fieldmesh::error::ErrorCode;
use predicates::prelude::*;

fn fieldmesh_cmd() -> assert_cmd::Command {
    assert_cmd::Command::cargo_bin("fieldmesh").unwrap()
}

// ─────────────────────────────────────────────────────────────────
// Valid Configuration Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_minimal_config() {
    let fixture = ConfigFixture::new();
    fixture.write_config(
        r#"
[server]

[peer]
server_url = "ws://example.com:8080"
"#,
    );

    let config = FieldmeshConfig::from_file(&fixture.config_path).unwrap();
    config.validate().unwrap();
    assert_eq!(config.relay.block_size, 16 * 1024);
    assert_eq!(config.smart_data.min_period_secs, 1);
    assert!(config.tasks.file.is_none());

    fieldmesh_cmd()
        .arg("config")
        .arg("validate")
        .arg("--config")
        .arg(fixture.path())
        .assert()
        .success();
}

#[test]
fn test_full_config() {
    let fixture = ConfigFixture::new();
    fixture.write_config(
        r#"
[server]
listen_addr = "127.0.0.1:9000"
data_dir = "/srv/field/data"
outbox_capacity = 32
max_message_size = 1048576

[relay]
block_size = 8192

[smart_data]
min_period_secs = 3

[tasks]
file = "/srv/field/tasks.json"

[peer]
server_url = "wss://coordinator.example.com"
name = "drone-7"
direct_listen_addr = "0.0.0.0:7100"
advertise_host = "10.0.0.7"
cache_dir = "/var/cache/fieldmesh"
chunk_size = 4096
reject_grace_ms = 250
reconnect_interval_ms = 1000
max_reconnect_attempts = 5
connect_timeout_ms = 3000

[logging]
level = "debug"
file = "/tmp/fieldmesh.log"
max_file_size_mb = 50
max_files = 3
json_format = true
"#,
    );

    let config = FieldmeshConfig::from_file(&fixture.config_path).unwrap();
    config.validate().unwrap();
    assert_eq!(config.server.outbox_capacity, 32);
    assert_eq!(config.relay.block_size, 8192);
    assert_eq!(config.tasks.file.as_deref(), Some("/srv/field/tasks.json"));
    assert_eq!(config.peer_name(), "drone-7");
    assert_eq!(config.peer.advertise_host.as_deref(), Some("10.0.0.7"));
    assert!(config.logging.json_format);

    fieldmesh_cmd()
        .arg("config")
        .arg("validate")
        .arg("--config")
        .arg(fixture.path())
        .assert()
        .success();
}

// ─────────────────────────────────────────────────────────────────
// Invalid Configuration Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_invalid_server_url() {
    let fixture = ConfigFixture::new();
    fixture.write_config(
        r#"
[peer]
server_url = "http://not-websocket.com"
"#,
    );

    let err = FieldmeshConfig::from_file(&fixture.config_path)
        .unwrap()
        .validate()
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::ConfigValidation);

    fieldmesh_cmd()
        .arg("config")
        .arg("validate")
        .arg("--config")
        .arg(fixture.path())
        .assert()
        .failure();
}

#[test]
fn test_invalid_listen_addr() {
    let fixture = ConfigFixture::new();
    fixture.write_config(
        r#"
[server]
listen_addr = "localhost"
"#,
    );

    let err = FieldmeshConfig::from_file(&fixture.config_path)
        .unwrap()
        .validate()
        .unwrap_err();
    assert!(err.to_string().contains("not a socket address"));
}

#[test]
fn test_block_size_must_fit_frame() {
    let fixture = ConfigFixture::new();
    fixture.write_config(
        r#"
[server]
max_message_size = 65536

[relay]
block_size = 65536
"#,
    );

    let config = FieldmeshConfig::from_file(&fixture.config_path).unwrap();
    assert!(config.validate().is_err());
}

#[test]
fn test_zero_min_period() {
    let fixture = ConfigFixture::new();
    fixture.write_config(
        r#"
[smart_data]
min_period_secs = 0
"#,
    );

    let config = FieldmeshConfig::from_file(&fixture.config_path).unwrap();
    assert!(config.validate().is_err());
}

#[test]
fn test_invalid_log_level() {
    let fixture = ConfigFixture::new();
    fixture.write_config(
        r#"
[logging]
level = "invalid_level"
"#,
    );

    fieldmesh_cmd()
        .arg("config")
        .arg("validate")
        .arg("--config")
        .arg(fixture.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid_level"));
}

#[test]
fn test_malformed_toml() {
    let fixture = ConfigFixture::new();
    fixture.write_config(
        r#"
[server
listen_addr = "127.0.0.1:8080"
"#,
    );

    let err = FieldmeshConfig::from_file(&fixture.config_path).unwrap_err();
    assert_eq!(err.code(), ErrorCode::ConfigParseError);

    fieldmesh_cmd()
        .arg("config")
        .arg("validate")
        .arg("--config")
        .arg(fixture.path())
        .assert()
        .failure()
        .code(10);
}

// ─────────────────────────────────────────────────────────────────
// Environment Variable Override Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_env_override_server_url() {
    let fixture = ConfigFixture::new();
    fixture.write_config(
        r#"
[peer]
server_url = "ws://file.example.com"
"#,
    );

    fieldmesh_cmd()
        .arg("config")
        .arg("show")
        .arg("--config")
        .arg(fixture.path())
        .env("FIELDMESH_SERVER_URL", "ws://env.example.com")
        .assert()
        .success()
        .stdout(predicate::str::contains("ws://env.example.com"))
        .stdout(predicate::str::contains("file.example.com").not());
}

#[test]
fn test_env_override_relay_and_tasks() {
    let fixture = ConfigFixture::new();
    fixture.write_config("[server]\n");

    fieldmesh_cmd()
        .arg("config")
        .arg("show")
        .arg("--config")
        .arg(fixture.path())
        .env("FIELDMESH_BLOCK_SIZE", "4096")
        .env("FIELDMESH_TASKS_FILE", "/tmp/field-tasks.json")
        .env("FIELDMESH_PEER_NAME", "env-peer")
        .assert()
        .success()
        .stdout(predicate::str::contains("block_size = 4096"))
        .stdout(predicate::str::contains("/tmp/field-tasks.json"))
        .stdout(predicate::str::contains("env-peer"));
}

#[test]
fn test_env_override_is_validated() {
    let fixture = ConfigFixture::new();
    fixture.write_config("[server]\n");

    fieldmesh_cmd()
        .arg("config")
        .arg("validate")
        .arg("--config")
        .arg(fixture.path())
        .env("FIELDMESH_LOG_LEVEL", "loud")
        .assert()
        .failure();
}

// ─────────────────────────────────────────────────────────────────
// Path Expansion Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_tilde_expansion() {
    let fixture = ConfigFixture::new();
    fixture.write_config(
        r#"
[server]
data_dir = "~/fieldmesh/data"

[peer]
cache_dir = "~/fieldmesh/cache"
"#,
    );

    let output = fieldmesh_cmd()
        .arg("config")
        .arg("show")
        .arg("--config")
        .arg(fixture.path())
        .assert()
        .success();

    let stdout = String::from_utf8(output.get_output().stdout.clone()).unwrap();
    assert!(!stdout.contains("data_dir = \"~"));
    assert!(!stdout.contains("cache_dir = \"~"));
    assert!(stdout.contains("fieldmesh/data"));
}
