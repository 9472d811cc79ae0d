//! Error types for the backend bridge.

/// Top-level error type for connection management and command orchestration.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// A command or capability request was attempted without a live session.
    #[error("backend not connected")]
    NotConnected,

    /// Spawning, attaching to, or handshaking with the backend failed.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// An optional backend feature could not be enabled or disabled.
    #[error("capability unavailable: {0}")]
    CapabilityUnavailable(String),

    /// Backend traffic could not be decoded.
    #[error("malformed backend event: {0}")]
    MalformedEvent(String),

    /// The backend session terminated without being asked to.
    #[error("session lost: {0}")]
    SessionLost(String),

    /// A connection attempt was superseded by `stop()`.
    #[error("connection attempt cancelled")]
    Cancelled,

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// HTTP or WebSocket transport error outside the handshake.
    #[error("transport error: {0}")]
    Transport(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, BridgeError>;
