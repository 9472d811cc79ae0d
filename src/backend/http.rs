//! HTTP + WebSocket transport to the local assistant API server.
//!
//! Session establishment:
//! 1. Optionally spawn the server process ([`BackendProcess`]).
//! 2. Poll `GET /status` until it answers `{"status":"online"}` or the
//!    handshake timeout expires.
//! 3. Open the WebSocket event stream at `events_path` (or `events_url`).
//!
//! Commands are posted to `POST /command`. The request runs on its own task so
//! [`BackendLink::send_command`] returns as soon as the request is queued; the
//! reply is fed back into the frame stream as a `command_result` (or `error`)
//! frame, the same shape the event stream uses.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;

use super::process::BackendProcess;
use super::{BackendConnector, BackendLink, Capability, Frame, OpenedSession};
use crate::config::BackendConfig;
use crate::error::{BridgeError, Result};
use crate::event::ClientMessage;

type EventStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct StatusReply {
    #[serde(default)]
    status: String,
}

/// Reply shape shared by `/command`, `/voice/*` and `/browser/*`.
#[derive(Debug, Deserialize)]
struct ActionReply {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    result: Option<serde_json::Value>,
}

// ---------------------------------------------------------------------------
// Connector
// ---------------------------------------------------------------------------

/// Connects to the API server described by a [`BackendConfig`].
#[derive(Debug, Clone)]
pub struct HttpConnector {
    config: BackendConfig,
    client: reqwest::Client,
}

impl HttpConnector {
    /// Build a connector.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Config`] if the base URL is invalid or the HTTP
    /// client cannot be constructed.
    pub fn new(config: BackendConfig) -> Result<Self> {
        resolve_events_url(&config)?;
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| BridgeError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { config, client })
    }

    #[must_use]
    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    async fn wait_until_online(&self, process: &mut Option<BackendProcess>) -> Result<()> {
        let url = endpoint(&self.config.base_url, "/status");
        let deadline = tokio::time::Instant::now() + self.config.handshake_timeout();

        loop {
            if let Some(proc) = process.as_mut()
                && let Some(status) = proc.exited()
            {
                return Err(BridgeError::HandshakeFailed(format!(
                    "backend process exited during startup ({status})"
                )));
            }

            let last_error = match self.client.get(&url).send().await {
                Ok(resp) if resp.status().is_success() => match resp.json::<StatusReply>().await {
                    Ok(reply) if reply.status == "online" => return Ok(()),
                    Ok(reply) => format!("backend status is {:?}", reply.status),
                    Err(e) => format!("unreadable status reply: {e}"),
                },
                Ok(resp) => format!("status endpoint returned {}", resp.status()),
                Err(e) => e.to_string(),
            };

            if tokio::time::Instant::now() >= deadline {
                return Err(BridgeError::HandshakeFailed(format!(
                    "backend not online after {}ms: {last_error}",
                    self.config.handshake_timeout_ms
                )));
            }
            tokio::time::sleep(self.config.handshake_poll()).await;
        }
    }

    async fn open_events(&self) -> Result<EventStream> {
        let url = resolve_events_url(&self.config)?;
        let connect = connect_async(url.as_str());
        match tokio::time::timeout(self.config.handshake_timeout(), connect).await {
            Ok(Ok((stream, _))) => Ok(stream),
            Ok(Err(e)) => Err(BridgeError::HandshakeFailed(format!(
                "event stream at {url}: {e}"
            ))),
            Err(_) => Err(BridgeError::HandshakeFailed(format!(
                "event stream at {url} timed out"
            ))),
        }
    }

    async fn handshake(&self, process: &mut Option<BackendProcess>) -> Result<EventStream> {
        self.wait_until_online(process).await?;
        self.open_events().await
    }
}

#[async_trait]
impl BackendConnector for HttpConnector {
    async fn connect(&self) -> Result<OpenedSession> {
        let mut process = if self.config.spawn_process {
            Some(BackendProcess::spawn(&self.config)?)
        } else {
            None
        };

        let stream = match self.handshake(&mut process).await {
            Ok(stream) => stream,
            Err(e) => {
                if let Some(proc) = process.as_mut() {
                    proc.kill().await;
                }
                return Err(e);
            }
        };

        tracing::info!(base_url = %self.config.base_url, "backend handshake complete");

        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let pump = tokio::spawn(pump_events(
            stream,
            frames_tx.clone(),
            cancel.clone(),
            self.config.ping_interval(),
        ));

        let link = HttpLink {
            client: self.client.clone(),
            base_url: self.config.base_url.clone(),
            frames: frames_tx,
            cancel,
            process: Mutex::new(process),
            pump: Mutex::new(Some(pump)),
        };

        Ok(OpenedSession {
            link: Arc::new(link),
            frames: frames_rx,
        })
    }
}

// ---------------------------------------------------------------------------
// Link
// ---------------------------------------------------------------------------

/// A live session with the API server.
pub struct HttpLink {
    client: reqwest::Client,
    base_url: String,
    frames: mpsc::UnboundedSender<Frame>,
    cancel: CancellationToken,
    process: Mutex<Option<BackendProcess>>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl HttpLink {
    async fn post_action(&self, path: &str) -> Result<ActionReply> {
        let resp = self
            .client
            .post(endpoint(&self.base_url, path))
            .send()
            .await
            .map_err(|e| BridgeError::Transport(format!("POST {path}: {e}")))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(map_http_error(status, &body));
        }
        resp.json::<ActionReply>()
            .await
            .map_err(|e| BridgeError::Transport(format!("POST {path}: invalid reply: {e}")))
    }
}

#[async_trait]
impl BackendLink for HttpLink {
    async fn send_command(&self, text: &str) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(BridgeError::NotConnected);
        }

        let client = self.client.clone();
        let url = endpoint(&self.base_url, "/command");
        let frames = self.frames.clone();
        let cancel = self.cancel.clone();
        let text = text.to_owned();

        tokio::spawn(async move {
            let frame = command_reply_frame(&client, &url, &text).await;
            if !cancel.is_cancelled() {
                let _ = frames.send(Frame::Text(frame));
            }
        });
        Ok(())
    }

    async fn set_capability(&self, capability: Capability, enabled: bool) -> Result<()> {
        let path = match (capability, enabled) {
            (Capability::Voice, true) => "/voice/start",
            (Capability::Voice, false) => "/voice/stop",
            (Capability::Browser, true) => "/browser/enable",
            (Capability::Browser, false) => "/browser/disable",
        };
        let reply = self
            .post_action(path)
            .await
            .map_err(|e| BridgeError::CapabilityUnavailable(format!("{capability}: {e}")))?;
        if reply.success {
            Ok(())
        } else {
            Err(BridgeError::CapabilityUnavailable(format!(
                "{capability}: {}",
                reply.message.unwrap_or_else(|| "rejected by backend".to_owned())
            )))
        }
    }

    async fn system_info(&self) -> Result<serde_json::Value> {
        let resp = self
            .client
            .get(endpoint(&self.base_url, "/system/info"))
            .send()
            .await
            .map_err(|e| BridgeError::Transport(format!("GET /system/info: {e}")))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(map_http_error(status, &body));
        }
        resp.json()
            .await
            .map_err(|e| BridgeError::Transport(format!("GET /system/info: invalid reply: {e}")))
    }

    async fn close(&self) {
        self.cancel.cancel();
        if let Some(pump) = self.pump.lock().await.take() {
            let _ = pump.await;
        }
        if let Some(mut process) = self.process.lock().await.take() {
            process.kill().await;
        }
    }
}

/// Post a command and render the reply as an event-stream frame.
async fn command_reply_frame(client: &reqwest::Client, url: &str, text: &str) -> String {
    let reply = async {
        let resp = client
            .post(url)
            .json(&serde_json::json!({ "command": text }))
            .send()
            .await
            .map_err(|e| format!("command request failed: {e}"))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(map_http_error(status, &body).to_string());
        }
        resp.json::<ActionReply>()
            .await
            .map_err(|e| format!("invalid command reply: {e}"))
    }
    .await;

    let frame = match reply {
        Ok(reply) if reply.success => serde_json::json!({
            "type": "command_result",
            "text": text,
            "result": reply.result,
        }),
        Ok(reply) => serde_json::json!({
            "type": "error",
            "message": reply.message.unwrap_or_else(|| "command failed".to_owned()),
        }),
        Err(message) => serde_json::json!({ "type": "error", "message": message }),
    };
    frame.to_string()
}

/// Forward event-stream text frames until the socket closes or `cancel` fires.
async fn pump_events(
    stream: EventStream,
    frames: mpsc::UnboundedSender<Frame>,
    cancel: CancellationToken,
    ping_every: Duration,
) {
    let (mut write, mut read) = stream.split();

    let mut ping = tokio::time::interval(ping_every);
    // Skip the first immediate tick.
    ping.tick().await;

    let reason = loop {
        tokio::select! {
            () = cancel.cancelled() => {
                let _ = write.send(Message::Close(None)).await;
                return;
            }
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    if frames.send(Frame::Text(text)).is_err() {
                        return;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break "event stream closed by backend".to_owned(),
                Some(Err(e)) => break format!("event stream error: {e}"),
                _ => {} // Binary, Ping/Pong frames handled by tungstenite.
            },
            _ = ping.tick() => {
                if let Ok(json) = serde_json::to_string(&ClientMessage::Ping)
                    && let Err(e) = write.send(Message::Text(json)).await
                {
                    break format!("ping failed: {e}");
                }
            }
        }
    };

    tracing::debug!(%reason, "backend event stream ended");
    let _ = frames.send(Frame::Closed(reason));
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn endpoint(base_url: &str, path: &str) -> String {
    format!("{}{}", base_url.trim_end_matches('/'), path)
}

fn resolve_events_url(config: &BackendConfig) -> Result<url::Url> {
    match &config.events_url {
        Some(explicit) => url::Url::parse(explicit)
            .map_err(|e| BridgeError::Config(format!("invalid events_url {explicit:?}: {e}"))),
        None => events_url(&config.base_url, &config.events_path),
    }
}

/// Derive the WebSocket URL for the event stream from the HTTP base URL.
fn events_url(base_url: &str, events_path: &str) -> Result<url::Url> {
    let mut url = url::Url::parse(base_url)
        .map_err(|e| BridgeError::Config(format!("invalid backend base_url {base_url:?}: {e}")))?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(BridgeError::Config(format!(
                "unsupported backend scheme {other:?}"
            )));
        }
    };
    url.set_scheme(scheme)
        .map_err(|()| BridgeError::Config(format!("cannot use scheme {scheme} for {base_url}")))?;
    url.set_path(events_path);
    Ok(url)
}

fn map_http_error(status: reqwest::StatusCode, body: &str) -> BridgeError {
    let detail = body.trim();
    let detail = if detail.is_empty() { "no body" } else { detail };
    match status.as_u16() {
        404 => BridgeError::Transport(format!("endpoint not found (404): {detail}")),
        408 | 504 => BridgeError::Transport(format!("backend timed out ({status}): {detail}")),
        500..=599 => BridgeError::Transport(format!("backend error ({status}): {detail}")),
        _ => BridgeError::Transport(format!("unexpected status {status}: {detail}")),
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn events_url_swaps_scheme() {
        let url = events_url("http://127.0.0.1:8000", "/ws").unwrap();
        assert_eq!(url.as_str(), "ws://127.0.0.1:8000/ws");
        let url = events_url("https://assistant.local/", "/events").unwrap();
        assert_eq!(url.as_str(), "wss://assistant.local/events");
    }

    #[test]
    fn events_url_rejects_unknown_scheme() {
        assert!(matches!(
            events_url("ftp://example.com", "/ws"),
            Err(BridgeError::Config(_))
        ));
        assert!(matches!(events_url("not a url", "/ws"), Err(BridgeError::Config(_))));
    }

    #[test]
    fn endpoint_trims_trailing_slash() {
        assert_eq!(endpoint("http://h:1/", "/status"), "http://h:1/status");
        assert_eq!(endpoint("http://h:1", "/status"), "http://h:1/status");
    }

    #[test]
    fn http_errors_are_transport_errors() {
        let err = map_http_error(reqwest::StatusCode::NOT_FOUND, "");
        assert!(err.to_string().contains("404"));
        let err = map_http_error(reqwest::StatusCode::INTERNAL_SERVER_ERROR, "boom");
        assert!(matches!(err, BridgeError::Transport(msg) if msg.contains("boom")));
    }

    #[test]
    fn explicit_events_url_wins() {
        let config = BackendConfig {
            events_url: Some("ws://127.0.0.1:9999/stream".into()),
            ..BackendConfig::default()
        };
        assert_eq!(
            resolve_events_url(&config).unwrap().as_str(),
            "ws://127.0.0.1:9999/stream"
        );
    }

    #[test]
    fn connector_rejects_bad_base_url() {
        let config = BackendConfig {
            base_url: "::nope".into(),
            ..BackendConfig::default()
        };
        assert!(matches!(HttpConnector::new(config), Err(BridgeError::Config(_))));
    }
}
