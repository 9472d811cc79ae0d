#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::Arc;
use std::time::Duration;

use assistant_bridge::backend::scripted::{LinkCall, ScriptedConnector};
use assistant_bridge::intent::Theme;
use assistant_bridge::reconnect::ReconnectPolicy;
use assistant_bridge::{
    Assistant, BridgeConfig, BridgeError, Capability, CommandOutcome, ConnectionManager,
    ConnectionState, EventNotifier, FallbackResponder, Sender, UiUpdate, VoiceState,
};

fn assistant(connector: &ScriptedConnector) -> Assistant {
    let manager = ConnectionManager::from_parts(
        Arc::new(connector.clone()),
        EventNotifier::new(64),
        ReconnectPolicy::new(Duration::from_millis(10), Duration::from_millis(40), Some(3), false),
        5,
    );
    Assistant::with_responder(manager, FallbackResponder::default(), &BridgeConfig::default())
}

async fn wait_for(what: &str, mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

fn contents(assistant: &Assistant) -> Vec<(Sender, String)> {
    assistant
        .entries()
        .into_iter()
        .map(|e| (e.sender, e.content))
        .collect()
}

#[tokio::test]
async fn offline_system_info_uses_fallback() {
    let connector = ScriptedConnector::new();
    let a = assistant(&connector);

    let outcome = a.send_message("system info").await;
    let CommandOutcome::FallbackHandled(reply) = &outcome else {
        panic!("expected fallback, got {outcome:?}");
    };
    assert!(reply.contains("System Information"));

    let entries = contents(&a);
    assert_eq!(entries.len(), 4);
    assert_eq!(entries[1], (Sender::User, "system info".to_owned()));
    assert_eq!(entries[2].0, Sender::System);
    assert!(entries[2].1.contains("fallback mode"));
    assert_eq!(entries[3], (Sender::Assistant, reply.clone()));
    assert!(!a.status().busy);
    assert!(connector.calls().is_empty());
}

#[tokio::test]
async fn offline_notice_can_be_disabled() {
    let connector = ScriptedConnector::new();
    let mut config = BridgeConfig::default();
    config.assistant.offline_notice = false;
    let a = Assistant::new(connector.clone(), &config);

    a.send_message("help").await;
    let senders: Vec<Sender> = contents(&a).into_iter().map(|(s, _)| s).collect();
    assert_eq!(senders, vec![Sender::Assistant, Sender::User, Sender::Assistant]);
}

#[tokio::test]
async fn blank_message_changes_nothing() {
    let connector = ScriptedConnector::new();
    let a = assistant(&connector);
    let (_sub, mut updates) = a.subscribe_update_channel();

    assert_eq!(
        a.send_message("   ").await,
        CommandOutcome::Rejected("empty command".into())
    );
    assert_eq!(a.entries().len(), 1);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(updates.try_recv().is_err());
}

#[tokio::test]
async fn voice_requires_connection() {
    let connector = ScriptedConnector::new();
    let a = assistant(&connector);

    let err = a.toggle_voice().await.unwrap_err();
    assert!(matches!(err, BridgeError::NotConnected));
    assert_eq!(a.voice_state(), VoiceState::Inactive);
    assert!(connector.calls().is_empty(), "enable-capability must not be called");

    let last = a.entries().pop().unwrap();
    assert_eq!(last.sender, Sender::System);
    assert!(last.content.contains("requires backend connection"));
    assert_eq!(a.status().status_text, "Voice recognition unavailable - backend offline");
}

#[tokio::test]
async fn voice_toggles_the_capability() {
    let connector = ScriptedConnector::new();
    let a = assistant(&connector);
    assert_eq!(a.start().await, ConnectionState::Connected);

    assert_eq!(a.toggle_voice().await.unwrap(), VoiceState::Active);
    assert_eq!(a.voice_state(), VoiceState::Active);
    assert_eq!(a.toggle_voice().await.unwrap(), VoiceState::Inactive);

    let calls = connector.calls();
    assert!(calls.contains(&LinkCall::Capability(Capability::Voice, true)));
    assert_eq!(calls.last(), Some(&LinkCall::Capability(Capability::Voice, false)));
}

#[tokio::test]
async fn rejected_voice_reverts_to_inactive() {
    let connector = ScriptedConnector::new();
    connector.reject_capability(Capability::Voice);
    let a = assistant(&connector);
    a.start().await;
    let (_sub, mut updates) = a.subscribe_update_channel();

    let err = a.toggle_voice().await.unwrap_err();
    assert!(matches!(err, BridgeError::CapabilityUnavailable(_)));
    assert_eq!(a.voice_state(), VoiceState::Inactive);
    assert_eq!(a.manager().state(), ConnectionState::Connected);

    let mut voice_changes = Vec::new();
    while let Ok(Some(update)) = tokio::time::timeout(Duration::from_millis(100), updates.recv()).await {
        if let UiUpdate::VoiceChanged(v) = update {
            voice_changes.push(v);
        }
    }
    assert_eq!(voice_changes, vec![VoiceState::Active, VoiceState::Inactive]);
}

#[tokio::test]
async fn start_enables_browser_and_reports() {
    let connector = ScriptedConnector::new();
    let a = assistant(&connector);
    assert_eq!(a.start().await, ConnectionState::Connected);
    assert!(connector.calls().contains(&LinkCall::Capability(Capability::Browser, true)));
    assert!(contents(&a).iter().any(|(s, c)| *s == Sender::System
        && c.starts_with("Backend initialized successfully")));
}

#[tokio::test]
async fn failed_start_is_reported_not_raised() {
    let connector = ScriptedConnector::new();
    connector.fail_next(1);
    let a = assistant(&connector);
    assert_eq!(a.start().await, ConnectionState::Failed);
    let last = a.entries().pop().unwrap();
    assert!(last.content.starts_with("Backend is not available"));
    assert_eq!(a.status().status_text, "Failed to connect to backend");
}

#[tokio::test]
async fn sent_command_stays_busy_until_result() {
    let connector = ScriptedConnector::new();
    let a = assistant(&connector);
    a.start().await;

    assert_eq!(a.send_message("open mail").await, CommandOutcome::Sent);
    assert_eq!(connector.commands(), vec!["open mail".to_owned()]);
    assert!(a.status().busy);
    assert_eq!(a.status().status_text, "Processing...");

    // A second command while the first is pending is refused.
    assert!(matches!(a.send_message("and another").await, CommandOutcome::Rejected(_)));
    assert_eq!(connector.commands().len(), 1);

    connector
        .current()
        .unwrap()
        .inject(r#"{"type":"command_result","text":"open mail","result":"Mail opened"}"#);
    wait_for("result entry", || !a.status().busy).await;

    let last = a.entries().pop().unwrap();
    assert_eq!((last.sender, last.content.as_str()), (Sender::Assistant, "Mail opened"));
    assert_eq!(a.status().status_text, "Ready");
}

#[tokio::test]
async fn backend_error_clears_busy() {
    let connector = ScriptedConnector::new();
    let a = assistant(&connector);
    a.start().await;
    a.send_message("break things").await;

    connector
        .current()
        .unwrap()
        .inject(r#"{"type":"error","message":"Command failed"}"#);
    wait_for("error entry", || !a.status().busy).await;
    let last = a.entries().pop().unwrap();
    assert_eq!(last.sender, Sender::System);
    assert_eq!(last.content, "⚠️ Command failed");
}

#[tokio::test]
async fn transcription_is_echoed_and_sent() {
    let connector = ScriptedConnector::new().with_echo_replies();
    let a = assistant(&connector);
    a.start().await;

    connector.current().unwrap().transcribe("what time is it");
    wait_for("voice command sent", || !connector.commands().is_empty()).await;
    wait_for("reply", || {
        a.entries()
            .iter()
            .any(|e| e.content == "Command processed: what time is it")
    })
    .await;

    assert_eq!(connector.commands(), vec!["what time is it".to_owned()]);
    let users: Vec<String> = a
        .entries()
        .into_iter()
        .filter(|e| e.sender == Sender::User)
        .map(|e| e.content)
        .collect();
    assert_eq!(users, vec!["what time is it".to_owned()], "echoed exactly once");
}

#[tokio::test]
async fn transcription_while_busy_is_echoed_but_not_sent() {
    let connector = ScriptedConnector::new();
    let a = assistant(&connector);
    a.start().await;
    assert_eq!(a.send_message("open mail").await, CommandOutcome::Sent);

    connector.current().unwrap().transcribe("what time is it");
    wait_for("spoken text echoed", || {
        a.entries()
            .iter()
            .any(|e| e.sender == Sender::User && e.content == "what time is it")
    })
    .await;

    let last = a.entries().pop().unwrap();
    assert_eq!(last.sender, Sender::System);
    assert!(last.content.contains("Voice command not sent"), "{}", last.content);
    assert_eq!(connector.commands(), vec!["open mail".to_owned()]);
    assert!(a.status().busy, "still waiting for the first reply");
}

#[tokio::test]
async fn send_failure_while_connected_is_reported() {
    let connector = ScriptedConnector::new();
    let a = assistant(&connector);
    a.start().await;
    connector.fail_sends(Some("HTTP 500"));

    let outcome = a.send_message("open mail").await;
    assert!(matches!(outcome, CommandOutcome::Rejected(_)), "{outcome:?}");

    let status = a.status();
    assert!(!status.busy);
    assert_eq!(status.connection, ConnectionState::Connected);
    assert_eq!(status.status_text, "Command not sent");
    let entries = contents(&a);
    assert!(!entries.iter().any(|(_, c)| c.contains("fallback mode")));
    let (sender, content) = entries.last().unwrap();
    assert_eq!(*sender, Sender::System);
    assert!(content.contains("HTTP 500"), "{content}");
}

#[tokio::test]
async fn connection_loss_and_recovery_are_reported() {
    let connector = ScriptedConnector::new();
    let a = assistant(&connector);
    a.start().await;
    a.toggle_voice().await.unwrap();

    connector.current().unwrap().drop_connection("backend exited");
    wait_for("connection lost entry", || {
        a.entries().iter().any(|e| e.content.contains("connection lost"))
    })
    .await;
    wait_for("voice forced off", || a.voice_state() == VoiceState::Inactive).await;

    wait_for("reconnected entry", || {
        a.entries().iter().any(|e| e.content.contains("connection restored"))
    })
    .await;
    assert_eq!(a.manager().state(), ConnectionState::Connected);
    let lost = a
        .entries()
        .iter()
        .filter(|e| e.content.contains("connection lost"))
        .count();
    assert_eq!(lost, 1);
}

#[tokio::test]
async fn exhausted_reconnection_is_reported() {
    let connector = ScriptedConnector::new();
    let a = assistant(&connector);
    a.start().await;
    connector.set_always_fail(true);
    connector.current().unwrap().drop_connection("backend exited");

    wait_for("gave up entry", || {
        a.entries().iter().any(|e| e.content.contains("repeated reconnection attempts"))
    })
    .await;
    assert_eq!(a.manager().state(), ConnectionState::Failed);

    // Commands now take the offline path.
    assert!(matches!(
        a.send_message("help").await,
        CommandOutcome::FallbackHandled(_)
    ));
}

#[tokio::test]
async fn theme_intent_updates_theme() {
    let connector = ScriptedConnector::new();
    let a = assistant(&connector);
    let (_sub, mut updates) = a.subscribe_update_channel();

    a.send_message("change theme to light").await;
    assert_eq!(a.status().theme, Theme::Light);
    assert_eq!(a.status().status_text, "Theme changed to Light");
    assert_eq!(a.entries().pop().unwrap().content, "Theme changed to Light mode");

    let mut saw_theme = false;
    while let Ok(Some(update)) = tokio::time::timeout(Duration::from_millis(100), updates.recv()).await {
        if update == UiUpdate::ThemeChanged(Theme::Light) {
            saw_theme = true;
        }
    }
    assert!(saw_theme);
}

#[tokio::test]
async fn clear_and_export() {
    let connector = ScriptedConnector::new();
    let a = assistant(&connector);
    a.send_message("help").await;

    a.clear_conversation();
    let entries = a.entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].sender, Sender::System);
    assert_eq!(a.status().status_text, "Chat cleared");

    let dir = tempfile::tempdir().unwrap();
    let path = a.export_transcript(dir.path()).unwrap();
    let body = std::fs::read_to_string(&path).unwrap();
    assert!(body.contains("] System: Chat cleared. How can I assist you?"));
    assert!(a.entries().pop().unwrap().content.starts_with("Chat exported to: "));
}

#[tokio::test]
async fn updates_arrive_in_order() {
    let connector = ScriptedConnector::new();
    let a = assistant(&connector);
    let (_sub, mut updates) = a.subscribe_update_channel();

    a.send_message("search for rust").await;

    let mut appended = Vec::new();
    while let Ok(Some(update)) = tokio::time::timeout(Duration::from_millis(100), updates.recv()).await {
        if let UiUpdate::EntryAppended(entry) = update {
            appended.push(entry.sender);
        }
    }
    assert_eq!(appended, vec![Sender::User, Sender::System, Sender::Assistant]);
}

#[tokio::test]
async fn stop_turns_voice_off_and_disconnects() {
    let connector = ScriptedConnector::new();
    let a = assistant(&connector);
    a.start().await;
    a.toggle_voice().await.unwrap();

    a.stop().await;
    assert_eq!(a.voice_state(), VoiceState::Inactive);
    assert_eq!(a.status().connection, ConnectionState::Disconnected);
    assert!(connector.current().unwrap().is_closed());
}
