//! Connection and voice state machines.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of the backend session.
///
/// Owned by [`ConnectionManager`](crate::manager::ConnectionManager); every
/// transition is published as [`BackendEvent::ConnectionChanged`](crate::event::BackendEvent).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No session and no attempt in progress.
    Disconnected,
    /// A user-initiated `start()` is spawning/handshaking.
    Connecting,
    /// Session is live and traffic flows.
    Connected,
    /// The session was lost and the backoff loop is retrying.
    Reconnecting,
    /// The last attempt failed and no retry is scheduled.
    Failed,
}

impl ConnectionState {
    /// Returns `true` only for [`ConnectionState::Connected`].
    #[must_use]
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Short status label for display.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Disconnected => "Offline",
            Self::Connecting => "Connecting...",
            Self::Connected => "Online",
            Self::Reconnecting => "Reconnecting...",
            Self::Failed => "Unavailable",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Whether voice capture is running on the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoiceState {
    #[default]
    Inactive,
    Active,
}
