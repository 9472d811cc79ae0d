//! Backend transport abstraction.
//!
//! [`ConnectionManager`](crate::manager::ConnectionManager) never touches
//! sockets or processes directly. It asks a [`BackendConnector`] for an
//! [`OpenedSession`], sends through the session's [`BackendLink`], and reads
//! raw [`Frame`]s that it decodes into [`BackendEvent`](crate::event::BackendEvent)s.

pub mod http;
pub mod process;
pub mod scripted;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;

/// An optional backend feature that can be toggled without affecting the
/// connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Microphone capture and speech transcription.
    Voice,
    /// Browser automation.
    Browser,
}

impl Capability {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Voice => "voice",
            Self::Browser => "browser",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A raw unit of backend traffic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// One undecoded event payload.
    Text(String),
    /// The session ended; no further frames follow.
    Closed(String),
}

/// Outbound half of a live backend session.
#[async_trait]
pub trait BackendLink: Send + Sync + 'static {
    /// Hand a command to the backend. Must return once the command is queued;
    /// the reply surfaces later as a frame.
    async fn send_command(&self, text: &str) -> Result<()>;

    /// Enable or disable an optional capability.
    async fn set_capability(&self, capability: Capability, enabled: bool) -> Result<()>;

    /// Fetch a description of the backend host.
    async fn system_info(&self) -> Result<serde_json::Value> {
        Ok(serde_json::json!({}))
    }

    /// Tear the session down. Must be safe to call more than once.
    async fn close(&self);
}

/// A session produced by a successful handshake.
pub struct OpenedSession {
    pub link: Arc<dyn BackendLink>,
    pub frames: mpsc::UnboundedReceiver<Frame>,
}

impl fmt::Debug for OpenedSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenedSession").finish_non_exhaustive()
    }
}

/// Establishes backend sessions (spawn/attach plus handshake).
#[async_trait]
pub trait BackendConnector: Send + Sync + 'static {
    /// Open a new session.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::HandshakeFailed`](crate::error::BridgeError::HandshakeFailed)
    /// when the backend cannot be reached.
    async fn connect(&self) -> Result<OpenedSession>;
}
