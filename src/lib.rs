//! Assistant bridge: backend connection and command orchestration for a
//! desktop chat assistant.
//!
//! # Architecture
//!
//! ```text
//! UI ─▶ Assistant ─▶ CommandDispatcher ─┬─▶ ConnectionManager ─▶ backend
//!  ▲                                    └─▶ FallbackResponder (offline)
//!  └──────────── EventNotifier ◀──────────── ConnectionManager reader
//! ```
//!
//! - [`ConnectionManager`] owns the backend session, its [`ConnectionState`]
//!   and automatic reconnection with exponential backoff.
//! - [`CommandDispatcher`] routes each [`Command`] to a local intent, the
//!   backend, or the offline [`FallbackResponder`].
//! - [`EventNotifier`] fans [`BackendEvent`]s out to subscribers without
//!   blocking the producer.
//! - [`Assistant`] is the facade: conversation log, voice toggle and status.
//!
//! The backend itself is reached through the [`BackendConnector`] seam; the
//! [`HttpConnector`] speaks to the local API server over HTTP and WebSocket.

pub mod assistant;
pub mod backend;
pub mod command;
pub mod config;
pub mod conversation;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod fallback;
pub mod intent;
pub mod logging;
pub mod manager;
pub mod notifier;
pub mod reconnect;
pub mod state;

pub use assistant::{Assistant, AssistantStatus};
pub use backend::http::HttpConnector;
pub use backend::{BackendConnector, BackendLink, Capability};
pub use command::{Command, CommandOrigin, CommandOutcome};
pub use config::BridgeConfig;
pub use conversation::{ChatEntry, Sender, UiUpdate};
pub use dispatcher::CommandDispatcher;
pub use error::{BridgeError, Result};
pub use event::BackendEvent;
pub use fallback::{FallbackResponder, Responder};
pub use manager::ConnectionManager;
pub use notifier::{EventNotifier, Subscription};
pub use state::{ConnectionState, VoiceState};
