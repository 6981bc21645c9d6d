//! Unit tests for configuration parsing and validation.

use std::io::Write;

use interview_link::config::GlobalConfig;
use interview_link::interview::AdvanceFlow;
use interview_link::AppError;

fn sample_toml() -> &'static str {
    r#"
[connection]
url = "wss://api.example.com/ws/connect/u-1"
base_delay_ms = 500
max_attempts = 7
handshake_timeout_seconds = 3

[interview]
api_base_url = "https://api.example.com"
flow = "start_gated"
tick_interval_ms = 250
"#
}

fn minimal_toml() -> &'static str {
    r#"
[connection]
url = "ws://localhost:8000/ws/connect/u-1"

[interview]
api_base_url = "http://localhost:8000"
"#
}

#[test]
fn parses_full_config() {
    let config = GlobalConfig::from_toml_str(sample_toml()).expect("valid config");

    assert_eq!(config.connection.url, "wss://api.example.com/ws/connect/u-1");
    assert_eq!(config.connection.base_delay().as_millis(), 500);
    assert_eq!(config.connection.max_attempts, 7);
    assert_eq!(config.connection.handshake_timeout().as_secs(), 3);
    assert_eq!(config.interview.flow, AdvanceFlow::StartGated);
    assert_eq!(config.interview.tick_interval().as_millis(), 250);
}

#[test]
fn applies_defaults() {
    let config = GlobalConfig::from_toml_str(minimal_toml()).expect("valid config");

    assert_eq!(config.connection.base_delay_ms, 1000);
    assert_eq!(config.connection.max_attempts, 5);
    assert_eq!(config.connection.handshake_timeout_seconds, 10);
    assert_eq!(config.interview.flow, AdvanceFlow::AutoStart);
    assert_eq!(config.interview.tick_interval_ms, 1000);
    assert!(config.connection.token.is_empty());
}

#[test]
fn token_is_never_read_from_toml() {
    let raw = minimal_toml().replace(
        "[interview]",
        "token = \"leaked\"\n\n[interview]",
    );
    let config = GlobalConfig::from_toml_str(&raw).expect("valid config");
    assert!(config.connection.token.is_empty());
}

#[test]
fn rejects_non_websocket_url() {
    let raw = minimal_toml().replace("ws://localhost", "http://localhost");
    let err = GlobalConfig::from_toml_str(&raw).expect_err("http url");
    assert!(matches!(err, AppError::Config(ref msg) if msg.contains("connection.url")));
}

#[test]
fn rejects_zero_delays() {
    let raw = sample_toml().replace("base_delay_ms = 500", "base_delay_ms = 0");
    assert!(GlobalConfig::from_toml_str(&raw).is_err());

    let raw = sample_toml().replace("handshake_timeout_seconds = 3", "handshake_timeout_seconds = 0");
    assert!(GlobalConfig::from_toml_str(&raw).is_err());

    let raw = sample_toml().replace("tick_interval_ms = 250", "tick_interval_ms = 0");
    assert!(GlobalConfig::from_toml_str(&raw).is_err());
}

#[test]
fn rejects_out_of_range_connection_limits() {
    let raw = sample_toml().replace("base_delay_ms = 500", "base_delay_ms = 9223372036854775807");
    let err = GlobalConfig::from_toml_str(&raw).expect_err("huge delay");
    assert!(err.to_string().contains("connection.base_delay_ms"));

    let raw = sample_toml().replace(
        "handshake_timeout_seconds = 3",
        "handshake_timeout_seconds = 9999999999",
    );
    let err = GlobalConfig::from_toml_str(&raw).expect_err("huge timeout");
    assert!(err.to_string().contains("connection.handshake_timeout_seconds"));

    let raw = sample_toml().replace("max_attempts = 7", "max_attempts = 4294967295");
    let err = GlobalConfig::from_toml_str(&raw).expect_err("huge budget");
    assert!(err.to_string().contains("connection.max_attempts"));

    let raw = sample_toml().replace("base_delay_ms = 500", "base_delay_ms = 3600000");
    assert!(GlobalConfig::from_toml_str(&raw).is_ok());
}

#[test]
fn rejects_non_http_api_base() {
    let raw = minimal_toml().replace("http://localhost:8000\"", "ftp://localhost:8000\"");
    let err = GlobalConfig::from_toml_str(&raw).expect_err("ftp base");
    assert!(err.to_string().contains("interview.api_base_url"));
}

#[test]
fn rejects_unknown_flow() {
    let raw = sample_toml().replace("start_gated", "sometimes");
    assert!(matches!(
        GlobalConfig::from_toml_str(&raw),
        Err(AppError::Config(_))
    ));
}

#[test]
fn loads_from_file() {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    file.write_all(sample_toml().as_bytes()).expect("write");

    let config = GlobalConfig::load_from_path(file.path()).expect("load");
    assert_eq!(config.connection.max_attempts, 7);
}

#[test]
fn missing_file_is_a_config_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let err = GlobalConfig::load_from_path(dir.path().join("absent.toml")).expect_err("missing");
    assert!(matches!(err, AppError::Config(_)));
}
