//! Configuration types for the backend bridge.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Backend process and transport settings.
    pub backend: BackendConfig,
    /// Reconnection policy after an unexpected session loss.
    pub reconnect: ReconnectConfig,
    /// Event delivery settings.
    pub events: EventsConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
    /// Conversation-level behaviour of the assistant facade.
    pub assistant: AssistantConfig,
}

/// Backend process and transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// HTTP base URL of the backend API server.
    pub base_url: String,
    /// Path of the WebSocket event stream, relative to `base_url`.
    pub events_path: String,
    /// Absolute WebSocket URL of the event stream, overriding `events_path`
    /// when the stream is served from a different origin.
    pub events_url: Option<String>,
    /// Spawn the backend as a child process before the handshake.
    ///
    /// When `false` the bridge attaches to an already running server.
    pub spawn_process: bool,
    /// Explicit interpreter path (None = discover `python3` / `python` on `PATH`).
    pub interpreter: Option<PathBuf>,
    /// Script passed to the interpreter.
    pub script: PathBuf,
    /// Working directory for the spawned process (None = inherit).
    pub working_dir: Option<PathBuf>,
    /// Total time allowed for the server to answer `/status`.
    pub handshake_timeout_ms: u64,
    /// Interval between `/status` polls during the handshake.
    pub handshake_poll_ms: u64,
    /// Timeout applied to individual HTTP requests.
    pub request_timeout_ms: u64,
    /// Interval between WebSocket keep-alive pings.
    pub ping_interval_secs: u64,
    /// Consecutive undecodable frames tolerated before the session is dropped.
    pub malformed_event_threshold: u32,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000".to_owned(),
            events_path: "/ws".to_owned(),
            events_url: None,
            spawn_process: true,
            interpreter: None,
            script: PathBuf::from("api_server.py"),
            working_dir: None,
            handshake_timeout_ms: 15_000,
            handshake_poll_ms: 250,
            request_timeout_ms: 30_000,
            ping_interval_secs: 30,
            malformed_event_threshold: 5,
        }
    }
}

impl BackendConfig {
    /// Handshake deadline as a [`Duration`].
    #[must_use]
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    /// Handshake poll interval as a [`Duration`].
    #[must_use]
    pub fn handshake_poll(&self) -> Duration {
        Duration::from_millis(self.handshake_poll_ms.max(10))
    }

    /// Per-request timeout as a [`Duration`].
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Keep-alive ping interval as a [`Duration`].
    #[must_use]
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs.max(1))
    }
}

/// Reconnection backoff configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt.
    pub base_delay_ms: u64,
    /// Upper bound for the exponential delay.
    pub max_delay_ms: u64,
    /// Attempts before giving up and entering `Failed` (0 = retry forever).
    pub max_attempts: u32,
    /// Randomise each delay into `[delay / 2, delay]`.
    pub jitter: bool,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            max_attempts: 10,
            jitter: true,
        }
    }
}

/// Event delivery configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Pending-event depth at which a subscriber is reported as slow.
    pub subscriber_warn_depth: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            subscriber_warn_depth: 256,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default `EnvFilter` directive, used when `RUST_LOG` is unset.
    pub filter: String,
    /// Directory for daily-rolling log files (None = stderr only).
    pub log_dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "assistant_bridge=info".to_owned(),
            log_dir: None,
        }
    }
}

/// Assistant facade configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssistantConfig {
    /// Best-effort enable browser automation right after connecting.
    pub enable_browser_on_connect: bool,
    /// Append an "offline" system entry before each fallback reply.
    pub offline_notice: bool,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            enable_browser_on_connect: true,
            offline_notice: true,
        }
    }
}

impl ReconnectConfig {
    /// Attempt limit, or `None` when retries are unbounded.
    #[must_use]
    pub fn attempt_limit(&self) -> Option<u32> {
        (self.max_attempts > 0).then_some(self.max_attempts)
    }
}

impl BridgeConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| crate::error::BridgeError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &std::path::Path) -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::BridgeError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Check values that deserialize fine but cannot work at runtime.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Config`](crate::error::BridgeError::Config)
    /// naming the first offending field.
    pub fn validate(&self) -> crate::error::Result<()> {
        let invalid = |msg: &str| Err(crate::error::BridgeError::Config(msg.to_owned()));
        if self.backend.handshake_timeout_ms == 0 {
            return invalid("backend.handshake_timeout_ms must be greater than zero");
        }
        if self.backend.request_timeout_ms == 0 {
            return invalid("backend.request_timeout_ms must be greater than zero");
        }
        if self.reconnect.base_delay_ms == 0 {
            return invalid("reconnect.base_delay_ms must be greater than zero");
        }
        if self.reconnect.max_delay_ms < self.reconnect.base_delay_ms {
            return invalid("reconnect.max_delay_ms must not be below reconnect.base_delay_ms");
        }
        if self.events.subscriber_warn_depth == 0 {
            return invalid("events.subscriber_warn_depth must be greater than zero");
        }
        Ok(())
    }

    /// Returns the default config file path.
    ///
    /// Resolves to `dirs::config_dir()/assistant-bridge/config.toml`. Override
    /// the directory with `ASSISTANT_BRIDGE_CONFIG_DIR`.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        config_dir().join("config.toml")
    }
}

/// Application config directory.
#[must_use]
pub fn config_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("ASSISTANT_BRIDGE_CONFIG_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::config_dir()
        .map(|d| d.join("assistant-bridge"))
        .unwrap_or_else(|| PathBuf::from("/tmp/assistant-bridge-config"))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = BridgeConfig::default();
        assert!(config.backend.base_url.starts_with("http"));
        assert!(config.backend.events_path.starts_with('/'));
        assert!(config.backend.handshake_timeout_ms > config.backend.handshake_poll_ms);
        assert!(config.backend.malformed_event_threshold > 0);
        assert!(config.reconnect.base_delay_ms <= config.reconnect.max_delay_ms);
        assert_eq!(config.reconnect.attempt_limit(), Some(10));
        config.validate().unwrap();
        assert!(config.events.subscriber_warn_depth > 0);
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = BridgeConfig::default();
        config.backend.base_url = "http://10.0.0.2:9000".to_owned();
        config.backend.spawn_process = false;
        config.reconnect.max_attempts = 0;
        config.logging.log_dir = Some(PathBuf::from("/var/log/bridge"));

        config.save_to_file(&path).unwrap();
        let loaded = BridgeConfig::from_file(&path).unwrap();

        assert_eq!(loaded.backend.base_url, "http://10.0.0.2:9000");
        assert!(!loaded.backend.spawn_process);
        assert_eq!(loaded.reconnect.attempt_limit(), None);
        assert_eq!(loaded.logging.log_dir, Some(PathBuf::from("/var/log/bridge")));
    }

    #[test]
    fn partial_toml_falls_back_to_defaults() {
        let toml_str = r#"
            [reconnect]
            base_delay_ms = 250
        "#;
        let config: BridgeConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.reconnect.base_delay_ms, 250);
        assert_eq!(config.reconnect.max_delay_ms, 30_000);
        assert_eq!(config.backend.events_path, "/ws");
        assert!(config.assistant.offline_notice);
    }

    #[test]
    fn invalid_toml_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "backend = [not valid").unwrap();
        let err = BridgeConfig::from_file(&path).unwrap_err();
        assert!(matches!(err, crate::error::BridgeError::Config(_)));
    }

    #[test]
    fn zero_reconnect_delay_is_rejected() {
        let mut config = BridgeConfig::default();
        config.reconnect.base_delay_ms = 0;
        config.reconnect.max_attempts = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("reconnect.base_delay_ms"), "{err}");
    }

    #[test]
    fn inverted_delay_bounds_are_rejected() {
        let mut config = BridgeConfig::default();
        config.reconnect.base_delay_ms = 5_000;
        config.reconnect.max_delay_ms = 1_000;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("reconnect.max_delay_ms"), "{err}");
    }

    #[test]
    fn zero_handshake_timeout_is_rejected() {
        let mut config = BridgeConfig::default();
        config.backend.handshake_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn duration_helpers_clamp_zero_values() {
        let backend = BackendConfig {
            handshake_poll_ms: 0,
            ping_interval_secs: 0,
            ..BackendConfig::default()
        };
        assert_eq!(backend.handshake_poll(), Duration::from_millis(10));
        assert_eq!(backend.ping_interval(), Duration::from_secs(1));
    }
}
