//! Unit tests for access token loading.
//!
//! These tests mutate process-global env vars and must run serially.

use interview_link::config::{GlobalConfig, TOKEN_ENV_VAR};

fn make_config() -> GlobalConfig {
    GlobalConfig::from_toml_str(
        r#"
[connection]
url = "ws://localhost:8000/ws/connect/u-1"

[interview]
api_base_url = "http://localhost:8000"
"#,
    )
    .expect("config parses")
}

/// The keychain service is absent in test environments, so the env var
/// supplies the token.
#[tokio::test]
#[serial_test::serial]
#[allow(unsafe_code)]
async fn env_var_supplies_token() {
    let mut config = make_config();
    unsafe {
        std::env::set_var(TOKEN_ENV_VAR, "env-token");
    }

    config.load_credentials().await.expect("token from env");
    assert_eq!(config.connection.token, "env-token");

    unsafe {
        std::env::remove_var(TOKEN_ENV_VAR);
    }
}

/// Missing token produces an error naming both sources.
#[tokio::test]
#[serial_test::serial]
#[allow(unsafe_code)]
async fn missing_token_error_names_both_sources() {
    let mut config = make_config();
    unsafe {
        std::env::remove_var(TOKEN_ENV_VAR);
    }

    let err = config.load_credentials().await.expect_err("no token");
    let msg = err.to_string();
    assert!(msg.contains("interview-link"), "names keychain service: {msg}");
    assert!(msg.contains(TOKEN_ENV_VAR), "names env var: {msg}");
}

/// An empty env var counts as absent.
#[tokio::test]
#[serial_test::serial]
#[allow(unsafe_code)]
async fn empty_env_var_is_rejected() {
    let mut config = make_config();
    unsafe {
        std::env::set_var(TOKEN_ENV_VAR, "");
    }

    assert!(config.load_credentials().await.is_err());

    unsafe {
        std::env::remove_var(TOKEN_ENV_VAR);
    }
}
