//! Outbound commands and their synchronous dispatch outcome.

use chrono::{DateTime, Local};
use serde::Serialize;

use crate::intent::LocalAction;

/// Where a command came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandOrigin {
    Typed,
    Voice,
}

/// A single user command. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Command {
    text: String,
    origin: CommandOrigin,
    issued_at: DateTime<Local>,
}

impl Command {
    /// Create a command stamped with the current local time.
    pub fn new(text: impl Into<String>, origin: CommandOrigin) -> Self {
        Self {
            text: text.into(),
            origin,
            issued_at: Local::now(),
        }
    }

    /// A command typed into the chat input.
    pub fn typed(text: impl Into<String>) -> Self {
        Self::new(text, CommandOrigin::Typed)
    }

    /// A command produced by backend speech transcription.
    pub fn voice(text: impl Into<String>) -> Self {
        Self::new(text, CommandOrigin::Voice)
    }

    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    #[must_use]
    pub fn origin(&self) -> CommandOrigin {
        self.origin
    }

    #[must_use]
    pub fn issued_at(&self) -> DateTime<Local> {
        self.issued_at
    }

    /// Returns `true` when the text is empty or whitespace only.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// Result of [`CommandDispatcher::submit`](crate::dispatcher::CommandDispatcher::submit).
///
/// `Sent` carries no reply: the backend answer arrives later as a separate
/// [`BackendEvent::CommandResult`](crate::event::BackendEvent::CommandResult).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    /// The backend accepted the command; the result is pending.
    Sent,
    /// No backend session; the local responder answered.
    FallbackHandled(String),
    /// A local intent consumed the command before routing.
    LocalHandled(LocalAction),
    /// The command was refused without side effects.
    Rejected(String),
}
