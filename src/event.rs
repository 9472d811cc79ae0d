//! Backend events and the wire format they are decoded from.
//!
//! The backend pushes newline-free JSON objects over its WebSocket event
//! stream, tagged by `type`:
//!
//! ```text
//! {"type":"voice_transcription","text":"open mail","timestamp":1700000000.0}
//! {"type":"command_result","text":"open mail","result":"Command processed"}
//! {"type":"error","message":"microphone busy"}
//! {"type":"output","text":"browser ready"}
//! {"type":"pong"}
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, Result};
use crate::state::ConnectionState;

/// An asynchronous event from the backend (or about the connection to it).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum BackendEvent {
    /// Informational output from the backend.
    Output(String),
    /// An error reported by, or about, the backend.
    Error(String),
    /// Speech the backend transcribed while voice capture is active.
    Transcription(String),
    /// The eventual answer to a previously sent command.
    CommandResult(String),
    /// The connection state changed.
    ConnectionChanged(ConnectionState),
}

// ---------------------------------------------------------------------------
// Wire protocol
// ---------------------------------------------------------------------------

/// Messages received from the backend event stream.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerMessage {
    VoiceTranscription {
        #[serde(default)]
        text: String,
    },
    CommandResult {
        #[serde(default)]
        text: Option<String>,
        #[serde(default)]
        result: Option<serde_json::Value>,
    },
    Error {
        #[serde(default)]
        message: String,
    },
    Output {
        #[serde(default)]
        text: String,
    },
    Pong {},
}

/// Messages sent to the backend over the event stream.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum ClientMessage {
    Ping,
}

/// Decode a single text frame.
///
/// Returns `Ok(None)` for keep-alive frames that carry no event.
///
/// # Errors
///
/// Returns [`BridgeError::MalformedEvent`] if the frame is not a known event.
pub fn decode_frame(text: &str) -> Result<Option<BackendEvent>> {
    let msg: ServerMessage = serde_json::from_str(text)
        .map_err(|e| BridgeError::MalformedEvent(format!("{e}: {}", truncate(text, 120))))?;

    let event = match msg {
        ServerMessage::VoiceTranscription { text } => Some(BackendEvent::Transcription(text)),
        ServerMessage::CommandResult { text, result } => {
            let body = result
                .and_then(|value| render_result(&value))
                .or(text)
                .unwrap_or_default();
            Some(BackendEvent::CommandResult(body))
        }
        ServerMessage::Error { message } => Some(BackendEvent::Error(message)),
        ServerMessage::Output { text } => Some(BackendEvent::Output(text)),
        ServerMessage::Pong {} => None,
    };
    Ok(event)
}

/// Render a `result` payload: strings verbatim, `{"output": …}` objects by
/// their output, anything else as compact JSON.
fn render_result(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Object(map) => match map.get("output") {
            Some(serde_json::Value::String(s)) => Some(s.clone()),
            Some(other) if !other.is_null() => Some(other.to_string()),
            _ => Some(value.to_string()),
        },
        other => Some(other.to_string()),
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_owned();
    }
    let mut out: String = text.chars().take(max_chars).collect();
    out.push('…');
    out
}
