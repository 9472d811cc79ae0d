//! In-memory backend used by tests and the console's `--scripted` mode.
//!
//! A [`ScriptedConnector`] follows a queue of planned connect outcomes
//! (succeeding once the queue is empty), records everything sent through its
//! links, and hands out [`ScriptedSession`] handles that can inject frames or
//! drop the session from the "backend" side.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{BackendConnector, BackendLink, Capability, Frame, OpenedSession};
use crate::error::{BridgeError, Result};

/// Something a scripted link was asked to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkCall {
    Command(String),
    Capability(Capability, bool),
    Close,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ConnectPlan {
    Succeed,
    Fail(String),
}

#[derive(Default)]
struct ScriptState {
    plan: VecDeque<ConnectPlan>,
    always_fail: Option<String>,
    connect_delay: Option<Duration>,
    sessions: Vec<ScriptedSession>,
}

struct ScriptInner {
    state: Mutex<ScriptState>,
    calls: Arc<Mutex<Vec<LinkCall>>>,
    rejected: Arc<Mutex<HashSet<Capability>>>,
    send_failure: Arc<Mutex<Option<String>>>,
    connects: AtomicUsize,
    echo_replies: AtomicBool,
}

/// Scripted [`BackendConnector`]. Cheap to clone; clones share one script.
#[derive(Clone)]
pub struct ScriptedConnector {
    inner: Arc<ScriptInner>,
}

impl Default for ScriptedConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedConnector {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ScriptInner {
                state: Mutex::new(ScriptState::default()),
                calls: Arc::new(Mutex::new(Vec::new())),
                rejected: Arc::new(Mutex::new(HashSet::new())),
                send_failure: Arc::new(Mutex::new(None)),
                connects: AtomicUsize::new(0),
                echo_replies: AtomicBool::new(false),
            }),
        }
    }

    /// Answer every sent command with a `command_result` frame.
    #[must_use]
    pub fn with_echo_replies(self) -> Self {
        self.inner.echo_replies.store(true, Ordering::Release);
        self
    }

    /// Make the next `n` connect attempts fail.
    pub fn fail_next(&self, n: usize) {
        let mut state = lock(&self.inner.state);
        for _ in 0..n {
            state.plan.push_back(ConnectPlan::Fail("scripted handshake failure".into()));
        }
    }

    /// Queue one successful connect attempt ahead of any later plan entries.
    pub fn succeed_next(&self) {
        lock(&self.inner.state).plan.push_back(ConnectPlan::Succeed);
    }

    /// Fail every attempt not covered by the queued plan (or stop doing so).
    pub fn set_always_fail(&self, fail: bool) {
        lock(&self.inner.state).always_fail = fail.then(|| "backend unreachable".to_owned());
    }

    /// Delay every connect attempt by `delay`.
    pub fn set_connect_delay(&self, delay: Option<Duration>) {
        lock(&self.inner.state).connect_delay = delay;
    }

    /// Make enabling or disabling `capability` fail.
    pub fn reject_capability(&self, capability: Capability) {
        lock(&self.inner.rejected).insert(capability);
    }

    /// Make every `send_command` fail with a transport error (or stop doing so).
    pub fn fail_sends(&self, reason: Option<&str>) {
        *lock(&self.inner.send_failure) = reason.map(str::to_owned);
    }

    /// Number of connect attempts made so far.
    #[must_use]
    pub fn connect_count(&self) -> usize {
        self.inner.connects.load(Ordering::Acquire)
    }

    /// Everything sent through any link produced by this connector.
    #[must_use]
    pub fn calls(&self) -> Vec<LinkCall> {
        lock(&self.inner.calls).clone()
    }

    /// Commands sent so far, in order.
    #[must_use]
    pub fn commands(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                LinkCall::Command(text) => Some(text),
                _ => None,
            })
            .collect()
    }

    /// The most recently opened session.
    #[must_use]
    pub fn current(&self) -> Option<ScriptedSession> {
        lock(&self.inner.state).sessions.last().cloned()
    }

    /// Number of sessions opened so far.
    #[must_use]
    pub fn session_count(&self) -> usize {
        lock(&self.inner.state).sessions.len()
    }
}

#[async_trait]
impl BackendConnector for ScriptedConnector {
    async fn connect(&self) -> Result<OpenedSession> {
        self.inner.connects.fetch_add(1, Ordering::AcqRel);

        let (plan, delay) = {
            let mut state = lock(&self.inner.state);
            let plan = state.plan.pop_front().unwrap_or_else(|| match &state.always_fail {
                Some(reason) => ConnectPlan::Fail(reason.clone()),
                None => ConnectPlan::Succeed,
            });
            (plan, state.connect_delay)
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if let ConnectPlan::Fail(reason) = plan {
            return Err(BridgeError::HandshakeFailed(reason));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let session = ScriptedSession {
            frames: tx,
            closed: Arc::new(AtomicBool::new(false)),
        };
        let link = ScriptedLink {
            session: session.clone(),
            calls: Arc::clone(&self.inner.calls),
            rejected: Arc::clone(&self.inner.rejected),
            send_failure: Arc::clone(&self.inner.send_failure),
            echo_replies: self.inner.echo_replies.load(Ordering::Acquire),
        };
        lock(&self.inner.state).sessions.push(session);

        Ok(OpenedSession {
            link: Arc::new(link),
            frames: rx,
        })
    }
}

/// Backend-side handle to one scripted session.
#[derive(Clone)]
pub struct ScriptedSession {
    frames: mpsc::UnboundedSender<Frame>,
    closed: Arc<AtomicBool>,
}

impl ScriptedSession {
    /// Push a raw event-stream frame.
    pub fn inject(&self, text: impl Into<String>) {
        let _ = self.frames.send(Frame::Text(text.into()));
    }

    /// Push a `voice_transcription` event.
    pub fn transcribe(&self, text: &str) {
        self.inject(serde_json::json!({ "type": "voice_transcription", "text": text }).to_string());
    }

    /// End the session from the backend side.
    pub fn drop_connection(&self, reason: &str) {
        self.closed.store(true, Ordering::Release);
        let _ = self.frames.send(Frame::Closed(reason.to_owned()));
    }

    /// Close the link without telling the reader, so the manager still
    /// believes the session is live.
    pub fn sever(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Whether the link was closed by either side.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

struct ScriptedLink {
    session: ScriptedSession,
    calls: Arc<Mutex<Vec<LinkCall>>>,
    rejected: Arc<Mutex<HashSet<Capability>>>,
    send_failure: Arc<Mutex<Option<String>>>,
    echo_replies: bool,
}

#[async_trait]
impl BackendLink for ScriptedLink {
    async fn send_command(&self, text: &str) -> Result<()> {
        if self.session.is_closed() {
            return Err(BridgeError::NotConnected);
        }
        if let Some(reason) = lock(&self.send_failure).clone() {
            return Err(BridgeError::Transport(reason));
        }
        lock(&self.calls).push(LinkCall::Command(text.to_owned()));
        if self.echo_replies {
            self.session.inject(
                serde_json::json!({
                    "type": "command_result",
                    "text": text,
                    "result": format!("Command processed: {text}"),
                })
                .to_string(),
            );
        }
        Ok(())
    }

    async fn set_capability(&self, capability: Capability, enabled: bool) -> Result<()> {
        lock(&self.calls).push(LinkCall::Capability(capability, enabled));
        if lock(&self.rejected).contains(&capability) {
            return Err(BridgeError::CapabilityUnavailable(format!(
                "{capability} is not available"
            )));
        }
        Ok(())
    }

    async fn system_info(&self) -> Result<serde_json::Value> {
        Ok(serde_json::json!({ "platform": "scripted" }))
    }

    async fn close(&self) {
        if !self.session.closed.swap(true, Ordering::AcqRel) {
            lock(&self.calls).push(LinkCall::Close);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
