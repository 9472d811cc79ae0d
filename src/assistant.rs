//! The facade the presentation layer talks to.
//!
//! [`Assistant`] composes the [`ConnectionManager`], the [`CommandDispatcher`]
//! and the conversation state. Backend events are consumed by one background
//! task that turns them into conversation entries, status text and
//! [`UiUpdate`]s, so the presentation layer only ever needs to render.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use serde::Serialize;
use tokio::sync::mpsc;

use crate::backend::{BackendConnector, Capability};
use crate::command::{Command, CommandOrigin, CommandOutcome};
use crate::config::{AssistantConfig, BridgeConfig};
use crate::conversation::{ChatEntry, Conversation, Sender, UiUpdate};
use crate::dispatcher::CommandDispatcher;
use crate::error::{BridgeError, Result};
use crate::event::BackendEvent;
use crate::fallback::{FallbackResponder, Responder};
use crate::intent::{LocalAction, Theme};
use crate::manager::ConnectionManager;
use crate::notifier::{EventNotifier, Subscription};
use crate::state::{ConnectionState, VoiceState};

const OFFLINE_NOTICE: &str = "⚠️ Backend is offline. Using fallback mode with limited functionality.\n\n\
     For full features, please ensure the backend is running.";
const CONNECTION_LOST: &str = "⚠️ Backend connection lost. Some features may not be available.\n\n\
     The application will attempt to reconnect automatically.";
const RECONNECTED: &str = "✅ Backend connection restored.";
const GAVE_UP: &str = "⚠️ Backend is unavailable after repeated reconnection attempts. \
     Using fallback mode.";
const NOT_AVAILABLE: &str = "Backend is not available.\nSome features may be limited.";
const VOICE_NOT_SENT: &str = "⚠️ Voice command not sent: still waiting for the previous reply.";
const VOICE_NEEDS_BACKEND: &str = "⚠️ Voice recognition requires backend connection.\n\n\
     Please ensure the backend is running and connected.";

/// Point-in-time view of the facade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssistantStatus {
    pub connection: ConnectionState,
    pub voice: VoiceState,
    pub status_text: String,
    pub busy: bool,
    pub theme: Theme,
}

struct UiState {
    conversation: Conversation,
    voice: VoiceState,
    /// A live session existed and was lost; cleared on reconnect or teardown.
    lost: bool,
    outbox: Vec<UiUpdate>,
}

impl UiState {
    fn append(&mut self, sender: Sender, content: impl Into<String>) {
        let entry = self.conversation.push(sender, content);
        self.outbox.push(UiUpdate::EntryAppended(entry));
    }

    fn status(&mut self, text: impl Into<String>) {
        if self.conversation.set_status(text) {
            self.outbox
                .push(UiUpdate::StatusChanged(self.conversation.status().to_owned()));
        }
    }

    fn voice(&mut self, voice: VoiceState) {
        if self.voice != voice {
            self.voice = voice;
            self.outbox.push(UiUpdate::VoiceChanged(voice));
        }
    }

    fn theme(&mut self, theme: Theme) {
        if self.conversation.set_theme(theme) {
            self.outbox.push(UiUpdate::ThemeChanged(theme));
        }
    }
}

struct AssistantInner<R: Responder> {
    manager: ConnectionManager,
    dispatcher: CommandDispatcher<R>,
    config: AssistantConfig,
    ui: Mutex<UiState>,
    updates: EventNotifier<UiUpdate>,
    /// Serialises voice transitions, which await the backend.
    voice_gate: tokio::sync::Mutex<()>,
    events: Subscription,
}

/// Orchestration facade. Cheap to clone.
pub struct Assistant<R: Responder = FallbackResponder> {
    inner: Arc<AssistantInner<R>>,
}

impl<R: Responder> Clone for Assistant<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Assistant<FallbackResponder> {
    /// Build the full stack over `connector` from `config`.
    ///
    /// Must be called within a Tokio runtime.
    pub fn new(connector: impl BackendConnector, config: &BridgeConfig) -> Self {
        let manager = ConnectionManager::new(connector, config);
        Self::with_responder(manager, FallbackResponder::default(), config)
    }
}

impl<R: Responder> Assistant<R> {
    /// Build a facade over an existing manager with a custom offline
    /// responder.
    ///
    /// Must be called within a Tokio runtime.
    pub fn with_responder(manager: ConnectionManager, responder: R, config: &BridgeConfig) -> Self {
        let (events, rx) = manager.subscribe_channel();
        let inner = Arc::new(AssistantInner {
            dispatcher: CommandDispatcher::new(manager.clone(), responder),
            manager,
            config: config.assistant.clone(),
            ui: Mutex::new(UiState {
                conversation: Conversation::new(),
                voice: VoiceState::Inactive,
                lost: false,
                outbox: Vec::new(),
            }),
            updates: EventNotifier::new(config.events.subscriber_warn_depth),
            voice_gate: tokio::sync::Mutex::new(()),
            events,
        });
        tokio::spawn(event_loop(Arc::downgrade(&inner), rx));
        Self { inner }
    }

    #[must_use]
    pub fn manager(&self) -> &ConnectionManager {
        &self.inner.manager
    }

    #[must_use]
    pub fn dispatcher(&self) -> &CommandDispatcher<R> {
        &self.inner.dispatcher
    }

    /// Start the backend. Failures become conversation entries, never errors.
    pub async fn start(&self) -> ConnectionState {
        self.inner.with_ui(|ui| ui.status("Initializing backend..."));

        match self.inner.manager.start().await {
            Ok(()) => {
                self.inner.with_ui(|ui| ui.status("Backend connected"));

                if self.inner.config.enable_browser_on_connect
                    && let Err(e) = self.inner.manager.enable_capability(Capability::Browser).await
                {
                    tracing::info!(error = %e, "browser automation unavailable");
                }

                match self.inner.manager.system_info().await {
                    Ok(info) => {
                        tracing::debug!(%info, "backend system info");
                        self.inner.with_ui(|ui| {
                            ui.append(
                                Sender::System,
                                "Backend initialized successfully!\n\n\
                                 Voice recognition and system automation are now available.",
                            );
                        });
                    }
                    Err(e) => tracing::warn!(error = %e, "could not fetch backend system info"),
                }
            }
            Err(BridgeError::Cancelled) => {
                tracing::debug!("backend start superseded");
            }
            Err(e) => {
                tracing::warn!(error = %e, "backend start failed");
                self.inner.with_ui(|ui| {
                    ui.status("Failed to connect to backend");
                    ui.append(Sender::System, NOT_AVAILABLE);
                });
            }
        }
        self.inner.manager.state()
    }

    /// Deactivate voice and shut the backend down.
    pub async fn stop(&self) {
        {
            let _gate = self.inner.voice_gate.lock().await;
            self.inner.with_ui(|ui| ui.voice(VoiceState::Inactive));
        }
        self.inner.manager.stop().await;
        self.inner.with_ui(|ui| {
            ui.lost = false;
            ui.conversation.set_busy(false);
            ui.status("Backend stopped");
        });
    }

    /// Send typed text.
    pub async fn send_message(&self, text: &str) -> CommandOutcome {
        self.inner.submit(Command::typed(text)).await
    }

    /// Flip voice capture. Returns the resulting state.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::NotConnected`] without a live session, or
    /// [`BridgeError::CapabilityUnavailable`] if the backend refused; in both
    /// cases voice stays inactive and the failure is also reported in the
    /// conversation.
    pub async fn toggle_voice(&self) -> Result<VoiceState> {
        let _gate = self.inner.voice_gate.lock().await;
        let current = self.inner.lock_ui().voice;

        match current {
            VoiceState::Inactive => {
                if !self.inner.manager.is_connected() {
                    self.inner.with_ui(|ui| {
                        ui.append(Sender::System, VOICE_NEEDS_BACKEND);
                        ui.status("Voice recognition unavailable - backend offline");
                    });
                    return Err(BridgeError::NotConnected);
                }

                self.inner.with_ui(|ui| {
                    ui.voice(VoiceState::Active);
                    ui.append(Sender::System, "🎤 Voice input activated. Listening...");
                });

                if let Err(e) = self.inner.manager.enable_capability(Capability::Voice).await {
                    self.inner.with_ui(|ui| {
                        ui.voice(VoiceState::Inactive);
                        ui.append(Sender::System, format!("⚠️ {e}"));
                        ui.status("Voice recognition unavailable");
                    });
                    return Err(e);
                }
                Ok(VoiceState::Active)
            }
            VoiceState::Active => {
                self.inner.with_ui(|ui| {
                    ui.voice(VoiceState::Inactive);
                    ui.append(Sender::System, "Voice input deactivated.");
                });
                if let Err(e) = self.inner.manager.disable_capability(Capability::Voice).await {
                    self.inner.with_ui(|ui| ui.status(format!("Error: {e}")));
                }
                Ok(VoiceState::Inactive)
            }
        }
    }

    #[must_use]
    pub fn status(&self) -> AssistantStatus {
        let ui = self.inner.lock_ui();
        AssistantStatus {
            connection: self.inner.manager.state(),
            voice: ui.voice,
            status_text: ui.conversation.status().to_owned(),
            busy: ui.conversation.is_busy(),
            theme: ui.conversation.theme(),
        }
    }

    #[must_use]
    pub fn voice_state(&self) -> VoiceState {
        self.inner.lock_ui().voice
    }

    #[must_use]
    pub fn entries(&self) -> Vec<ChatEntry> {
        self.inner.lock_ui().conversation.entries().to_vec()
    }

    pub fn clear_conversation(&self) {
        self.inner.with_ui(|ui| {
            let note = ui.conversation.clear();
            ui.outbox.push(UiUpdate::Cleared);
            ui.outbox.push(UiUpdate::EntryAppended(note));
            ui.status("Chat cleared");
        });
    }

    /// Write the transcript into `dir`.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Io`] if the file cannot be written; the failure
    /// is also reported in the conversation.
    pub fn export_transcript(&self, dir: &Path) -> Result<PathBuf> {
        self.inner.with_ui(|ui| match ui.conversation.export_to(dir) {
            Ok(path) => {
                ui.append(Sender::System, format!("Chat exported to: {}", path.display()));
                ui.status("Chat exported successfully");
                Ok(path)
            }
            Err(e) => {
                tracing::warn!(dir = %dir.display(), error = %e, "transcript export failed");
                ui.append(Sender::System, format!("Export failed: {e}"));
                Err(e)
            }
        })
    }

    /// Register for presentation updates.
    pub fn subscribe_updates<F>(&self, handler: F) -> Subscription
    where
        F: FnMut(UiUpdate) + Send + 'static,
    {
        self.inner.updates.subscribe(handler)
    }

    /// Register a channel subscriber for presentation updates.
    pub fn subscribe_update_channel(&self) -> (Subscription, mpsc::UnboundedReceiver<UiUpdate>) {
        self.inner.updates.subscribe_channel()
    }

    pub fn unsubscribe_updates(&self, subscription: Subscription) -> bool {
        self.inner.updates.unsubscribe(subscription)
    }

    /// Register for raw backend events.
    pub fn subscribe_events<F>(&self, handler: F) -> Subscription
    where
        F: FnMut(BackendEvent) + Send + 'static,
    {
        self.inner.manager.subscribe(handler)
    }
}

impl<R: Responder> AssistantInner<R> {
    fn lock_ui(&self) -> MutexGuard<'_, UiState> {
        match self.ui.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Mutate UI state and publish the resulting updates in order.
    fn with_ui<T>(&self, f: impl FnOnce(&mut UiState) -> T) -> T {
        let mut ui = self.lock_ui();
        let out = f(&mut ui);
        for update in ui.outbox.drain(..) {
            self.updates.publish(update);
        }
        out
    }

    async fn submit(&self, command: Command) -> CommandOutcome {
        let blank = command.is_blank();
        if !blank {
            let accepted = self.with_ui(|ui| {
                if ui.conversation.is_busy() {
                    // Spoken input is always echoed, even when it cannot be sent.
                    if command.origin() == CommandOrigin::Voice {
                        ui.append(Sender::User, command.text());
                        ui.append(Sender::System, VOICE_NOT_SENT);
                    }
                    return false;
                }
                // Set before dispatch: the result may arrive before submit returns.
                ui.conversation.set_busy(true);
                ui.append(Sender::User, command.text());
                ui.status(match command.origin() {
                    CommandOrigin::Typed => "Processing...",
                    CommandOrigin::Voice => "Processing voice command...",
                });
                true
            });
            if !accepted {
                tracing::info!("command dropped; previous command still awaiting its result");
                return CommandOutcome::Rejected("a command is already in progress".to_owned());
            }
        }

        let outcome = self.dispatcher.submit(command).await;

        self.with_ui(|ui| match &outcome {
            CommandOutcome::Sent => {}
            CommandOutcome::FallbackHandled(reply) => {
                ui.conversation.set_busy(false);
                if self.config.offline_notice {
                    ui.append(Sender::System, OFFLINE_NOTICE);
                }
                ui.append(Sender::Assistant, reply.clone());
                ui.status("Ready");
            }
            CommandOutcome::LocalHandled(action) => {
                ui.conversation.set_busy(false);
                let LocalAction::ChangeTheme(theme) = action;
                match theme {
                    Some(theme) => {
                        ui.theme(*theme);
                        ui.status(format!("Theme changed to {theme}"));
                    }
                    None => ui.status("Ready"),
                }
                ui.append(Sender::System, action.describe());
            }
            CommandOutcome::Rejected(_) if blank => {}
            CommandOutcome::Rejected(reason) => {
                ui.conversation.set_busy(false);
                ui.append(Sender::System, format!("⚠️ Command not sent: {reason}"));
                ui.status("Command not sent");
            }
        });
        outcome
    }

    async fn on_event(&self, event: BackendEvent) {
        match event {
            BackendEvent::Transcription(text) => {
                if text.trim().is_empty() {
                    return;
                }
                let outcome = self.submit(Command::voice(text)).await;
                tracing::debug!(?outcome, "voice command routed");
            }
            BackendEvent::CommandResult(text) => self.with_ui(|ui| {
                ui.append(Sender::Assistant, text);
                ui.conversation.set_busy(false);
                ui.status("Ready");
            }),
            BackendEvent::Error(message) => self.with_ui(|ui| {
                ui.append(Sender::System, format!("⚠️ {message}"));
                ui.conversation.set_busy(false);
                ui.status(message);
            }),
            BackendEvent::Output(text) => self.with_ui(|ui| ui.status(format!("Backend: {text}"))),
            BackendEvent::ConnectionChanged(state) => self.on_connection_changed(state).await,
        }
    }

    async fn on_connection_changed(&self, state: ConnectionState) {
        match state {
            ConnectionState::Connecting => {}
            // The initial connection is reported by `start()`.
            ConnectionState::Connected => self.with_ui(|ui| {
                if std::mem::take(&mut ui.lost) {
                    ui.append(Sender::System, RECONNECTED);
                    ui.status("Backend reconnected");
                }
            }),
            ConnectionState::Reconnecting | ConnectionState::Failed | ConnectionState::Disconnected => {
                let _gate = self.voice_gate.lock().await;
                self.with_ui(|ui| {
                    ui.voice(VoiceState::Inactive);
                    ui.conversation.set_busy(false);
                    match state {
                        ConnectionState::Reconnecting if !ui.lost => {
                            ui.lost = true;
                            ui.append(Sender::System, CONNECTION_LOST);
                            ui.status("Reconnecting...");
                        }
                        ConnectionState::Failed if ui.lost => {
                            ui.lost = false;
                            ui.append(Sender::System, GAVE_UP);
                            ui.status("Backend unavailable");
                        }
                        ConnectionState::Disconnected => ui.lost = false,
                        _ => {}
                    }
                });
            }
        }
    }
}

impl<R: Responder> Drop for AssistantInner<R> {
    fn drop(&mut self) {
        self.manager.unsubscribe(self.events);
    }
}

async fn event_loop<R: Responder>(
    assistant: Weak<AssistantInner<R>>,
    mut events: mpsc::UnboundedReceiver<BackendEvent>,
) {
    while let Some(event) = events.recv().await {
        let Some(inner) = assistant.upgrade() else {
            break;
        };
        inner.on_event(event).await;
    }
    tracing::debug!("assistant event loop finished");
}
