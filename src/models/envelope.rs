//! Wire envelope exchanged over the push channel.
//!
//! Every frame, in either direction, is a JSON object:
//!
//! ```json
//! { "type": "application_status_changed", "data": { ... }, "timestamp": "2024-05-01T10:00:00Z" }
//! ```
//!
//! | `type`          | Direction | Handling                                   |
//! |-----------------|-----------|--------------------------------------------|
//! | `authenticate`  | out       | Sent once per connection after open        |
//! | `authenticated` | in        | Completes the handshake                    |
//! | `auth_failed`   | in        | Handshake failure; surfaced on `error`     |
//! | `error`         | in        | Surfaced to `error` subscribers            |
//! | `ping`          | in        | Answered with `pong`                       |
//! | `pong`          | out       | Heartbeat reply                            |
//! | *(any other)*   | both      | Topic; routed to subscribers verbatim      |

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::{AppError, Result};

/// Reserved control `type` values.
pub mod control {
    /// Outbound credential presentation.
    pub const AUTHENTICATE: &str = "authenticate";
    /// Inbound handshake acknowledgement.
    pub const AUTHENTICATED: &str = "authenticated";
    /// Inbound handshake rejection.
    pub const AUTH_FAILED: &str = "auth_failed";
    /// Inbound application-level error notification.
    pub const ERROR: &str = "error";
    /// Inbound heartbeat probe.
    pub const PING: &str = "ping";
    /// Outbound heartbeat reply.
    pub const PONG: &str = "pong";

    /// Whether `kind` is handled by the manager rather than routed as a topic.
    #[must_use]
    pub fn is_reserved(kind: &str) -> bool {
        matches!(
            kind,
            AUTHENTICATE | AUTHENTICATED | AUTH_FAILED | ERROR | PING | PONG
        )
    }
}

/// A single framed message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    /// Topic or control type.
    #[serde(rename = "type")]
    pub kind: String,
    /// Self-describing payload.
    #[serde(default)]
    pub data: Value,
    /// Creation time. Outbound envelopes carry an ISO-8601 string; heartbeat
    /// pings carry the server's monotonic clock as a number, kept as sent.
    #[serde(default)]
    pub timestamp: Value,
    /// Optional unique message identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
}

impl Envelope {
    /// Build an outbound envelope stamped with the current time and a fresh id.
    #[must_use]
    pub fn new(kind: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            data,
            timestamp: Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)),
            message_id: Some(uuid::Uuid::new_v4().to_string()),
        }
    }

    /// Credential presentation sent right after the socket opens.
    #[must_use]
    pub fn authenticate(token: &str) -> Self {
        Self::new(control::AUTHENTICATE, json!({ "token": token }))
    }

    /// Heartbeat reply echoing the probe's timestamp unchanged.
    #[must_use]
    pub fn pong(ping: &Self) -> Self {
        Self::new(control::PONG, json!({ "ping_timestamp": ping.timestamp }))
    }

    /// Parse one inbound text frame.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Protocol` if the frame is not a JSON object with a
    /// string `type`.
    pub fn parse(raw: &str) -> Result<Self> {
        let envelope: Self = serde_json::from_str(raw)?;
        if envelope.kind.is_empty() {
            return Err(AppError::Protocol("envelope type must not be empty".into()));
        }
        Ok(envelope)
    }

    /// Serialize for transmission.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Protocol` if the payload cannot be serialized.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Whether this envelope carries a reserved control type.
    #[must_use]
    pub fn is_control(&self) -> bool {
        control::is_reserved(&self.kind)
    }

    /// Human-readable reason carried by an error or rejection envelope.
    #[must_use]
    pub fn reason(&self) -> String {
        self.data
            .get("message")
            .or_else(|| self.data.get("reason"))
            .and_then(Value::as_str)
            .map_or_else(|| self.data.to_string(), str::to_owned)
    }
}
