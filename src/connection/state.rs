//! Connection lifecycle states.

use serde::Serialize;

/// Lifecycle state of the push channel.
///
/// ```text
/// Idle → Connecting → Open → Authenticating → Ready
///          │            │          │            │
///          └────────────┴──────────┴────────────┴──→ Reconnecting ──→ Connecting
///                                                         └──→ Idle (budget exhausted)
/// ```
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No channel and no attempt in progress.
    Idle,
    /// Socket connect in flight.
    Connecting,
    /// Socket open, credential not yet presented.
    Open,
    /// Credential presented, waiting for acknowledgement.
    Authenticating,
    /// Authenticated; publishing and delivery are live.
    Ready,
    /// Waiting out the backoff delay before the next attempt.
    Reconnecting,
}

impl ConnectionState {
    /// Whether the channel accepts outbound messages.
    #[must_use]
    pub fn is_ready(self) -> bool {
        self == Self::Ready
    }

    /// Whether a channel exists or is being (re)established.
    #[must_use]
    pub fn is_active(self) -> bool {
        self != Self::Idle
    }

    /// Determine whether a lifecycle transition is permitted.
    ///
    /// Every active state may fall back to `Idle` (credential cleared) or
    /// restart at `Connecting` (credential replaced).
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::Connecting)
                | (Self::Connecting, Self::Open)
                | (Self::Open, Self::Authenticating)
                | (Self::Authenticating, Self::Ready)
                | (
                    Self::Connecting | Self::Open | Self::Authenticating | Self::Ready,
                    Self::Reconnecting
                )
                | (
                    Self::Connecting
                        | Self::Open
                        | Self::Authenticating
                        | Self::Ready
                        | Self::Reconnecting,
                    Self::Connecting | Self::Idle
                )
        )
    }
}

/// Observable snapshot of the channel.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct ChannelStatus {
    /// Current lifecycle state.
    pub state: ConnectionState,
    /// Consecutive failed attempts since the channel was last `Ready`.
    pub attempt: u32,
}

impl ChannelStatus {
    /// Status of a manager that has never been given a credential.
    #[must_use]
    pub fn idle() -> Self {
        Self {
            state: ConnectionState::Idle,
            attempt: 0,
        }
    }
}
