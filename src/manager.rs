//! Backend session lifecycle: start, stop, send, background reader and
//! automatic reconnection.
//!
//! All mutable state lives behind one mutex. Every state transition and every
//! traffic event is published while that mutex is held, so subscribers observe
//! a single order consistent with the state machine:
//!
//! ```text
//!  Disconnected ──start──▶ Connecting ──ok──▶ Connected
//!        ▲                     │                  │ session lost
//!        │                     └──err──▶ Failed   ▼
//!       stop (from any state)          ◀──── Reconnecting ◀─┐
//!                               exhausted     │  attempt fails
//!                                             └─────────────┘
//! ```

use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::backend::{BackendConnector, BackendLink, Capability, Frame, OpenedSession};
use crate::command::Command;
use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::event::{BackendEvent, decode_frame};
use crate::notifier::{EventNotifier, Subscription};
use crate::reconnect::ReconnectPolicy;
use crate::state::ConnectionState;

struct ReconnectTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

struct Shared {
    state: ConnectionState,
    link: Option<Arc<dyn BackendLink>>,
    /// Identifies the live session; bumped whenever a session is installed or
    /// torn down so stale readers stop publishing.
    session: u64,
    /// Identifies the latest user-initiated `start()`.
    attempt: u64,
    /// Cancelled by `stop()`; parent of every reconnect token.
    cancel: CancellationToken,
    reader: Option<JoinHandle<()>>,
    reconnect: Option<ReconnectTask>,
}

struct ManagerInner {
    connector: Arc<dyn BackendConnector>,
    notifier: EventNotifier<BackendEvent>,
    policy: ReconnectPolicy,
    malformed_threshold: u32,
    shared: Mutex<Shared>,
}

/// Owns the backend session and its connection state. Cheap to clone.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<ManagerInner>,
}

impl ConnectionManager {
    /// Create a manager using the reconnect, backend and event settings from
    /// `config`.
    pub fn new(connector: impl BackendConnector, config: &BridgeConfig) -> Self {
        Self::from_parts(
            Arc::new(connector),
            EventNotifier::new(config.events.subscriber_warn_depth),
            ReconnectPolicy::from_config(&config.reconnect),
            config.backend.malformed_event_threshold,
        )
    }

    /// Create a manager from explicit parts.
    pub fn from_parts(
        connector: Arc<dyn BackendConnector>,
        notifier: EventNotifier<BackendEvent>,
        policy: ReconnectPolicy,
        malformed_threshold: u32,
    ) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                connector,
                notifier,
                policy,
                malformed_threshold,
                shared: Mutex::new(Shared {
                    state: ConnectionState::Disconnected,
                    link: None,
                    session: 0,
                    attempt: 0,
                    cancel: CancellationToken::new(),
                    reader: None,
                    reconnect: None,
                }),
            }),
        }
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// The notifier every [`BackendEvent`] is published through.
    #[must_use]
    pub fn notifier(&self) -> &EventNotifier<BackendEvent> {
        &self.inner.notifier
    }

    /// Register a handler for backend events.
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: FnMut(BackendEvent) + Send + 'static,
    {
        self.inner.notifier.subscribe(handler)
    }

    /// Register a channel subscriber for backend events.
    pub fn subscribe_channel(&self) -> (Subscription, mpsc::UnboundedReceiver<BackendEvent>) {
        self.inner.notifier.subscribe_channel()
    }

    pub fn unsubscribe(&self, subscription: Subscription) -> bool {
        self.inner.notifier.unsubscribe(subscription)
    }

    /// Establish the backend session.
    ///
    /// A no-op while already connected. While reconnecting, the backoff loop
    /// is cancelled and an immediate attempt is made instead.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::HandshakeFailed`] when the attempt fails (state
    /// becomes `Failed`) and [`BridgeError::Cancelled`] when `stop()` or a
    /// newer `start()` superseded it.
    pub async fn start(&self) -> Result<()> {
        let (attempt, token) = {
            let mut shared = self.inner.lock();
            if shared.state.is_connected() {
                tracing::debug!("start() while connected; nothing to do");
                return Ok(());
            }
            if let Some(task) = shared.reconnect.take() {
                tracing::info!("start() cancels pending reconnection");
                task.token.cancel();
                task.handle.abort();
            }
            shared.attempt += 1;
            self.inner.set_state(&mut shared, ConnectionState::Connecting);
            (shared.attempt, shared.cancel.clone())
        };

        tracing::info!("connecting to backend");
        let result = tokio::select! {
            () = token.cancelled() => return Err(BridgeError::Cancelled),
            result = self.inner.connector.connect() => result,
        };

        match result {
            Ok(opened) => {
                let rejected = {
                    let mut shared = self.inner.lock();
                    if token.is_cancelled() || shared.attempt != attempt {
                        Some((opened.link, shared.state.is_connected()))
                    } else {
                        self.inner.install(&mut shared, opened);
                        None
                    }
                };
                match rejected {
                    None => {
                        tracing::info!("backend connected");
                        Ok(())
                    }
                    Some((link, already_connected)) => {
                        link.close().await;
                        if already_connected {
                            Ok(())
                        } else {
                            Err(BridgeError::Cancelled)
                        }
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "backend connection failed");
                let mut shared = self.inner.lock();
                if !token.is_cancelled() && shared.attempt == attempt {
                    self.inner.set_state(&mut shared, ConnectionState::Failed);
                }
                Err(match e {
                    BridgeError::HandshakeFailed(_) => e,
                    other => BridgeError::HandshakeFailed(other.to_string()),
                })
            }
        }
    }

    /// Tear the session down and cancel any pending start or reconnection.
    /// Always ends in `Disconnected`.
    pub async fn stop(&self) {
        let (link, reader, reconnect) = {
            let mut shared = self.inner.lock();
            shared.cancel.cancel();
            shared.cancel = CancellationToken::new();
            shared.session += 1;
            shared.attempt += 1;
            let taken = (shared.link.take(), shared.reader.take(), shared.reconnect.take());
            self.inner.set_state(&mut shared, ConnectionState::Disconnected);
            taken
        };

        if let Some(task) = reconnect {
            task.handle.abort();
            let _ = task.handle.await;
        }
        if let Some(reader) = reader {
            reader.abort();
            let _ = reader.await;
        }
        if let Some(link) = link {
            link.close().await;
        }
        tracing::info!("backend connection stopped");
    }

    /// Hand `command` to the backend. Returns once it is queued; the reply
    /// arrives later as [`BackendEvent::CommandResult`].
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::NotConnected`] unless the state is `Connected`.
    pub async fn send(&self, command: &Command) -> Result<()> {
        let link = self.inner.connected_link().ok_or(BridgeError::NotConnected)?;
        tracing::debug!(
            origin = ?command.origin(),
            issued_at = %command.issued_at().format("%H:%M:%S%.3f"),
            "sending command to backend"
        );
        link.send_command(command.text()).await
    }

    /// Best-effort enable of an optional backend feature.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::CapabilityUnavailable`]; the connection is
    /// unaffected.
    pub async fn enable_capability(&self, capability: Capability) -> Result<()> {
        self.set_capability(capability, true).await
    }

    /// Best-effort disable of an optional backend feature.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::CapabilityUnavailable`]; the connection is
    /// unaffected.
    pub async fn disable_capability(&self, capability: Capability) -> Result<()> {
        self.set_capability(capability, false).await
    }

    async fn set_capability(&self, capability: Capability, enabled: bool) -> Result<()> {
        let link = self.inner.connected_link().ok_or_else(|| {
            BridgeError::CapabilityUnavailable(format!("{capability}: backend not connected"))
        })?;
        link.set_capability(capability, enabled).await.map_err(|e| {
            tracing::warn!(%capability, enabled, error = %e, "capability request failed");
            match e {
                BridgeError::CapabilityUnavailable(_) => e,
                other => BridgeError::CapabilityUnavailable(format!("{capability}: {other}")),
            }
        })
    }

    /// Ask the backend to describe its host.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::NotConnected`] without a live session, or the
    /// transport error.
    pub async fn system_info(&self) -> Result<serde_json::Value> {
        let link = self.inner.connected_link().ok_or(BridgeError::NotConnected)?;
        link.system_info().await
    }
}

impl ManagerInner {
    fn lock(&self) -> MutexGuard<'_, Shared> {
        match self.shared.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Move to `state`, publishing the change if it is one.
    fn set_state(&self, shared: &mut Shared, state: ConnectionState) {
        if shared.state == state {
            return;
        }
        tracing::debug!(from = %shared.state, to = %state, "connection state changed");
        shared.state = state;
        self.notifier.publish(BackendEvent::ConnectionChanged(state));
    }

    fn connected_link(&self) -> Option<Arc<dyn BackendLink>> {
        let shared = self.lock();
        if shared.state.is_connected() {
            shared.link.clone()
        } else {
            None
        }
    }

    /// Make `opened` the live session and start its reader.
    fn install(self: &Arc<Self>, shared: &mut Shared, opened: OpenedSession) {
        shared.session += 1;
        shared.link = Some(opened.link);
        shared.reconnect = None;
        self.set_state(shared, ConnectionState::Connected);
        shared.reader = Some(tokio::spawn(read_loop(
            Arc::downgrade(self),
            shared.session,
            opened.frames,
            self.malformed_threshold,
        )));
    }

    /// Publish backend traffic if `session` is still the live one.
    fn publish_traffic(&self, session: u64, event: BackendEvent) -> bool {
        let shared = self.lock();
        if shared.session != session || !shared.state.is_connected() {
            return false;
        }
        self.notifier.publish(event);
        true
    }

    /// React to unexpected termination of `session`: move to `Reconnecting`
    /// and start the backoff loop. Returns the dead link for closing.
    fn session_lost(self: &Arc<Self>, session: u64, reason: &str) -> Option<Arc<dyn BackendLink>> {
        let mut shared = self.lock();
        if shared.session != session || !shared.state.is_connected() {
            return None;
        }
        tracing::warn!(%reason, "backend session lost");
        shared.session += 1;
        // The reader calling us is finishing on its own.
        shared.reader = None;
        let link = shared.link.take();
        self.set_state(&mut shared, ConnectionState::Reconnecting);

        let token = shared.cancel.child_token();
        let handle = tokio::spawn(reconnect_loop(Arc::downgrade(self), token.clone()));
        shared.reconnect = Some(ReconnectTask { token, handle });
        link
    }
}

impl Drop for ManagerInner {
    fn drop(&mut self) {
        let shared = match self.shared.get_mut() {
            Ok(shared) => shared,
            Err(poisoned) => poisoned.into_inner(),
        };
        shared.cancel.cancel();
        if let Some(task) = shared.reconnect.take() {
            task.handle.abort();
        }
        if let Some(reader) = shared.reader.take() {
            reader.abort();
        }
    }
}

// ---------------------------------------------------------------------------
// Background tasks
// ---------------------------------------------------------------------------

async fn read_loop(
    manager: Weak<ManagerInner>,
    session: u64,
    mut frames: mpsc::UnboundedReceiver<Frame>,
    malformed_threshold: u32,
) {
    let mut malformed: u32 = 0;

    let reason = loop {
        let Some(frame) = frames.recv().await else {
            break "event stream ended".to_owned();
        };
        let Some(inner) = manager.upgrade() else {
            return;
        };

        match frame {
            Frame::Text(text) => match decode_frame(&text) {
                Ok(Some(event)) => {
                    malformed = 0;
                    if !inner.publish_traffic(session, event) {
                        return;
                    }
                }
                Ok(None) => malformed = 0,
                Err(e) => {
                    malformed += 1;
                    tracing::warn!(consecutive = malformed, error = %e, "undecodable backend frame");
                    if !inner.publish_traffic(session, BackendEvent::Error(e.to_string())) {
                        return;
                    }
                    if malformed > malformed_threshold {
                        break BridgeError::SessionLost(format!(
                            "{malformed} consecutive malformed events"
                        ))
                        .to_string();
                    }
                }
            },
            Frame::Closed(reason) => break reason,
        }
    };

    let Some(inner) = manager.upgrade() else {
        return;
    };
    if let Some(link) = inner.session_lost(session, &reason) {
        drop(inner);
        link.close().await;
    }
}

async fn reconnect_loop(manager: Weak<ManagerInner>, token: CancellationToken) {
    let mut failures: u32 = 0;

    loop {
        let (delay, connector) = {
            let Some(inner) = manager.upgrade() else {
                return;
            };
            (inner.policy.delay(failures), Arc::clone(&inner.connector))
        };

        tokio::select! {
            () = token.cancelled() => return,
            () = tokio::time::sleep(delay) => {}
        }

        tracing::info!(attempt = failures + 1, "reconnecting to backend");
        let result = tokio::select! {
            () = token.cancelled() => return,
            result = connector.connect() => result,
        };

        let Some(inner) = manager.upgrade() else {
            if let Ok(opened) = result {
                opened.link.close().await;
            }
            return;
        };

        match result {
            Ok(opened) => {
                let stale = {
                    let mut shared = inner.lock();
                    if token.is_cancelled() {
                        Some(opened.link)
                    } else {
                        inner.install(&mut shared, opened);
                        None
                    }
                };
                match stale {
                    Some(link) => link.close().await,
                    None => tracing::info!(attempts = failures + 1, "backend reconnected"),
                }
                return;
            }
            Err(e) => {
                failures += 1;
                tracing::warn!(attempt = failures, error = %e, "reconnect attempt failed");
                let mut shared = inner.lock();
                if token.is_cancelled() {
                    return;
                }
                if inner.policy.exhausted(failures) {
                    tracing::error!(attempts = failures, "giving up on backend reconnection");
                    shared.reconnect = None;
                    inner.set_state(&mut shared, ConnectionState::Failed);
                    return;
                }
                inner
                    .notifier
                    .publish(BackendEvent::ConnectionChanged(ConnectionState::Reconnecting));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use std::time::Duration;

    use super::*;
    use crate::backend::scripted::{LinkCall, ScriptedConnector};

    fn manager(connector: &ScriptedConnector, max_attempts: Option<u32>) -> ConnectionManager {
        ConnectionManager::from_parts(
            Arc::new(connector.clone()),
            EventNotifier::new(64),
            ReconnectPolicy::new(
                Duration::from_millis(100),
                Duration::from_millis(400),
                max_attempts,
                false,
            ),
            2,
        )
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<BackendEvent>) -> BackendEvent {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("event in time")
            .expect("channel open")
    }

    #[tokio::test]
    async fn send_requires_connection() {
        let connector = ScriptedConnector::new();
        let m = manager(&connector, Some(3));
        let err = m.send(&Command::typed("hello")).await.unwrap_err();
        assert!(matches!(err, BridgeError::NotConnected));
        assert!(connector.calls().is_empty());
    }

    #[tokio::test]
    async fn failed_start_moves_to_failed() {
        let connector = ScriptedConnector::new();
        connector.fail_next(1);
        let m = manager(&connector, Some(3));
        let (_sub, mut rx) = m.subscribe_channel();

        assert!(matches!(m.start().await, Err(BridgeError::HandshakeFailed(_))));
        assert_eq!(m.state(), ConnectionState::Failed);
        assert_eq!(next(&mut rx).await, BackendEvent::ConnectionChanged(ConnectionState::Connecting));
        assert_eq!(next(&mut rx).await, BackendEvent::ConnectionChanged(ConnectionState::Failed));
    }

    #[tokio::test]
    async fn malformed_frames_surface_as_errors_until_threshold() {
        let connector = ScriptedConnector::new();
        let m = manager(&connector, Some(1));
        m.start().await.unwrap();
        let (_sub, mut rx) = m.subscribe_channel();
        let session = connector.current().unwrap();

        session.inject("not json");
        session.inject(r#"{"type":"output","text":"ok"}"#);
        session.inject("still not json");
        session.inject("{}");

        assert!(matches!(next(&mut rx).await, BackendEvent::Error(msg) if msg.starts_with("malformed backend event")));
        assert_eq!(next(&mut rx).await, BackendEvent::Output("ok".into()));
        assert!(matches!(next(&mut rx).await, BackendEvent::Error(_)));
        assert!(matches!(next(&mut rx).await, BackendEvent::Error(_)));
        assert_eq!(m.state(), ConnectionState::Connected, "two in a row is within the threshold");

        session.inject("third strike");
        assert!(matches!(next(&mut rx).await, BackendEvent::Error(_)));
        assert_eq!(
            next(&mut rx).await,
            BackendEvent::ConnectionChanged(ConnectionState::Reconnecting)
        );
        m.stop().await;
    }

    #[tokio::test]
    async fn capability_failure_keeps_connection() {
        let connector = ScriptedConnector::new();
        connector.reject_capability(Capability::Browser);
        let m = manager(&connector, Some(3));
        m.start().await.unwrap();

        let err = m.enable_capability(Capability::Browser).await.unwrap_err();
        assert!(matches!(err, BridgeError::CapabilityUnavailable(_)));
        assert_eq!(m.state(), ConnectionState::Connected);
        m.enable_capability(Capability::Voice).await.unwrap();
        m.disable_capability(Capability::Voice).await.unwrap();
        assert!(connector.calls().contains(&LinkCall::Capability(Capability::Voice, false)));
    }

    #[tokio::test]
    async fn capability_without_session_is_unavailable() {
        let connector = ScriptedConnector::new();
        let m = manager(&connector, Some(3));
        assert!(matches!(
            m.enable_capability(Capability::Voice).await,
            Err(BridgeError::CapabilityUnavailable(_))
        ));
        assert!(connector.calls().is_empty());
    }

    #[tokio::test]
    async fn stop_closes_the_link() {
        let connector = ScriptedConnector::new();
        let m = manager(&connector, Some(3));
        m.start().await.unwrap();
        m.stop().await;
        assert_eq!(m.state(), ConnectionState::Disconnected);
        assert!(connector.current().unwrap().is_closed());
        assert_eq!(connector.calls().last(), Some(&LinkCall::Close));
    }

    #[tokio::test]
    async fn system_info_comes_from_the_link() {
        let connector = ScriptedConnector::new();
        let m = manager(&connector, Some(3));
        assert!(matches!(m.system_info().await, Err(BridgeError::NotConnected)));
        m.start().await.unwrap();
        assert_eq!(m.system_info().await.unwrap()["platform"], "scripted");
    }
}
