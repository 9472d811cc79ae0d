//! Routes commands to the backend, the offline responder, or a local intent.
//!
//! Routing order for [`CommandDispatcher::submit`]:
//! 1. blank text is rejected,
//! 2. local intents (theme changes) are handled in place,
//! 3. with a live session the command is sent to the backend,
//! 4. otherwise the [`Responder`] answers.
//!
//! The dispatcher holds no state of its own and may be called concurrently.

use std::sync::Arc;

use crate::command::{Command, CommandOutcome};
use crate::error::BridgeError;
use crate::fallback::{FallbackResponder, Responder};
use crate::intent::match_local_intent;
use crate::manager::ConnectionManager;

/// Stateless command router.
pub struct CommandDispatcher<R: Responder = FallbackResponder> {
    manager: ConnectionManager,
    responder: Arc<R>,
}

impl<R: Responder> Clone for CommandDispatcher<R> {
    fn clone(&self) -> Self {
        Self {
            manager: self.manager.clone(),
            responder: Arc::clone(&self.responder),
        }
    }
}

impl CommandDispatcher<FallbackResponder> {
    /// Dispatcher with the canned offline responder for this host.
    #[must_use]
    pub fn with_default_responder(manager: ConnectionManager) -> Self {
        Self::new(manager, FallbackResponder::default())
    }
}

impl<R: Responder> CommandDispatcher<R> {
    #[must_use]
    pub fn new(manager: ConnectionManager, responder: R) -> Self {
        Self {
            manager,
            responder: Arc::new(responder),
        }
    }

    #[must_use]
    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    /// Route `command` and report what happened to it.
    pub async fn submit(&self, command: Command) -> CommandOutcome {
        if command.is_blank() {
            return CommandOutcome::Rejected("empty command".to_owned());
        }

        if let Some(action) = match_local_intent(command.text()) {
            tracing::debug!(?action, "command handled locally");
            return CommandOutcome::LocalHandled(action);
        }

        if self.manager.is_connected() {
            match self.manager.send(&command).await {
                Ok(()) => return CommandOutcome::Sent,
                // Lost the session between the check and the send.
                Err(BridgeError::NotConnected) if !self.manager.is_connected() => {
                    tracing::info!("backend went away before send; using fallback");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "backend did not accept command");
                    return CommandOutcome::Rejected(e.to_string());
                }
            }
        }

        CommandOutcome::FallbackHandled(self.responder.respond(command.text()))
    }
}
