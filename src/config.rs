//! Global configuration parsing, validation, and credential loading.

use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::interview::AdvanceFlow;
use crate::{AppError, Result};

/// Keychain service name used for the access token.
const KEYRING_SERVICE: &str = "interview-link";

/// Largest accepted backoff unit.
const MAX_BASE_DELAY_MS: u64 = 60 * 60 * 1000;

/// Largest accepted handshake deadline.
const MAX_HANDSHAKE_TIMEOUT_SECONDS: u64 = 60 * 60;

/// Largest accepted reconnect budget.
const MAX_ATTEMPTS: u32 = 1000;

/// Environment variable fallback for the access token.
pub const TOKEN_ENV_VAR: &str = "INTERVIEW_LINK_TOKEN";

/// Push channel connectivity settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ConnectionConfig {
    /// WebSocket endpoint, e.g. `ws://localhost:8000/ws/connect/u-1`.
    pub url: String,
    /// Linear backoff unit; attempt `n` waits `n * base_delay_ms`.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Reconnect attempts allowed before failing stop into `Idle`.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Time allowed for the authentication acknowledgement.
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_seconds: u64,
    /// Access token (populated at runtime, never read from TOML).
    #[serde(skip)]
    pub token: String,
}

impl ConnectionConfig {
    /// Backoff unit as a [`Duration`].
    #[must_use]
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    /// Handshake deadline as a [`Duration`].
    #[must_use]
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_seconds)
    }
}

/// Interview session settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct InterviewConfig {
    /// Base URL of the session store REST API.
    pub api_base_url: String,
    /// What happens after a question is resolved.
    #[serde(default)]
    pub flow: AdvanceFlow,
    /// Wall-clock length of one countdown unit.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
}

impl InterviewConfig {
    /// Tick period as a [`Duration`].
    #[must_use]
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_attempts() -> u32 {
    5
}

fn default_handshake_timeout() -> u64 {
    10
}

fn default_tick_interval_ms() -> u64 {
    1000
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Push channel settings.
    pub connection: ConnectionConfig,
    /// Interview engine settings.
    pub interview: InterviewConfig,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and validate it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load the access token from OS keychain with env-var fallback.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if neither the keychain nor
    /// `INTERVIEW_LINK_TOKEN` provides a token.
    pub async fn load_credentials(&mut self) -> Result<()> {
        self.connection.token = load_credential("access_token", TOKEN_ENV_VAR).await?;
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        let url = self.connection.url.as_str();
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            return Err(AppError::Config(format!(
                "connection.url must use ws:// or wss://, got {url}"
            )));
        }

        if !(1..=MAX_BASE_DELAY_MS).contains(&self.connection.base_delay_ms) {
            return Err(AppError::Config(format!(
                "connection.base_delay_ms must be between 1 and {MAX_BASE_DELAY_MS}"
            )));
        }

        if !(1..=MAX_HANDSHAKE_TIMEOUT_SECONDS).contains(&self.connection.handshake_timeout_seconds) {
            return Err(AppError::Config(format!(
                "connection.handshake_timeout_seconds must be between 1 and {MAX_HANDSHAKE_TIMEOUT_SECONDS}"
            )));
        }

        if self.connection.max_attempts > MAX_ATTEMPTS {
            return Err(AppError::Config(format!(
                "connection.max_attempts must be at most {MAX_ATTEMPTS}"
            )));
        }

        if self.interview.tick_interval_ms == 0 {
            return Err(AppError::Config(
                "interview.tick_interval_ms must be greater than zero".into(),
            ));
        }

        let base = self.interview.api_base_url.as_str();
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            return Err(AppError::Config(format!(
                "interview.api_base_url must use http:// or https://, got {base}"
            )));
        }

        Ok(())
    }
}

/// Load a single credential from OS keychain with env-var fallback.
async fn load_credential(keyring_key: &str, env_key: &str) -> Result<String> {
    let key = keyring_key.to_owned();

    // keyring is synchronous I/O.
    let keychain_result = tokio::task::spawn_blocking(move || {
        keyring::Entry::new(KEYRING_SERVICE, &key).and_then(|entry| entry.get_password())
    })
    .await
    .map_err(|err| AppError::Config(format!("keychain task panicked: {err}")))?;

    match keychain_result {
        Ok(value) if !value.is_empty() => return Ok(value),
        Ok(_) => {
            warn!(key = keyring_key, "keychain entry is empty, trying env var");
        }
        Err(err) => {
            warn!(
                key = keyring_key,
                ?err,
                "keychain lookup failed, trying env var"
            );
        }
    }

    match env::var(env_key) {
        Ok(value) if !value.is_empty() => Ok(value),
        _ => Err(AppError::Config(format!(
            "credential {keyring_key} not found in keychain service {KEYRING_SERVICE} or {env_key} env var"
        ))),
    }
}
