//! Conversation log and presentation-facing state owned by the
//! [`Assistant`](crate::assistant::Assistant).

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::Serialize;

use crate::error::Result;
use crate::intent::Theme;
use crate::state::VoiceState;

pub(crate) const WELCOME: &str = "Welcome! I'm your desktop assistant. I can help you with:\n\n\
     • System commands and file management\n\
     • Web searches and browsing\n\
     • Application downloads and installations\n\
     • Voice recognition and automation\n\n\
     Try saying 'system info' or 'search for something' to get started!";

pub(crate) const CLEARED: &str = "Chat cleared. How can I assist you?";

/// Author of a [`ChatEntry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Sender {
    User,
    Assistant,
    System,
}

impl Sender {
    /// Name shown in transcripts.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::User => "You",
            Self::Assistant => "Assistant",
            Self::System => "System",
        }
    }
}

/// One line of the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatEntry {
    pub sender: Sender,
    pub content: String,
    pub timestamp: DateTime<Local>,
}

impl ChatEntry {
    #[must_use]
    pub fn new(sender: Sender, content: impl Into<String>) -> Self {
        Self {
            sender,
            content: content.into(),
            timestamp: Local::now(),
        }
    }

    /// `HH:MM` display time.
    #[must_use]
    pub fn time_label(&self) -> String {
        self.timestamp.format("%H:%M").to_string()
    }

    /// `[HH:MM] Sender: content`
    #[must_use]
    pub fn render(&self) -> String {
        format!("[{}] {}: {}", self.time_label(), self.sender.label(), self.content)
    }
}

/// Notification for the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum UiUpdate {
    EntryAppended(ChatEntry),
    StatusChanged(String),
    VoiceChanged(VoiceState),
    ThemeChanged(Theme),
    Cleared,
}

/// Chat log plus status line, busy flag and theme.
#[derive(Debug, Clone)]
pub struct Conversation {
    entries: Vec<ChatEntry>,
    status: String,
    busy: bool,
    theme: Theme,
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}

impl Conversation {
    /// A conversation seeded with the welcome message.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: vec![ChatEntry::new(Sender::Assistant, WELCOME)],
            status: "Ready".to_owned(),
            busy: false,
            theme: Theme::Dark,
        }
    }

    pub fn push(&mut self, sender: Sender, content: impl Into<String>) -> ChatEntry {
        let entry = ChatEntry::new(sender, content);
        self.entries.push(entry.clone());
        entry
    }

    #[must_use]
    pub fn entries(&self) -> &[ChatEntry] {
        &self.entries
    }

    #[must_use]
    pub fn status(&self) -> &str {
        &self.status
    }

    /// Returns `true` if the status text changed.
    pub fn set_status(&mut self, status: impl Into<String>) -> bool {
        let status = status.into();
        if self.status == status {
            return false;
        }
        self.status = status;
        true
    }

    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.busy
    }

    pub fn set_busy(&mut self, busy: bool) {
        self.busy = busy;
    }

    #[must_use]
    pub fn theme(&self) -> Theme {
        self.theme
    }

    /// Returns `true` if the theme changed.
    pub fn set_theme(&mut self, theme: Theme) -> bool {
        let changed = self.theme != theme;
        self.theme = theme;
        changed
    }

    /// Drop every entry, leaving a single system note.
    pub fn clear(&mut self) -> ChatEntry {
        self.entries.clear();
        self.busy = false;
        self.push(Sender::System, CLEARED)
    }

    /// Entries rendered one per paragraph.
    #[must_use]
    pub fn transcript(&self) -> String {
        self.entries
            .iter()
            .map(ChatEntry::render)
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Write the transcript to `dir/chat_export_YYYYMMDD_HHMMSS.txt`.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Io`](crate::error::BridgeError::Io) if the file
    /// cannot be written.
    pub fn export_to(&self, dir: &Path) -> Result<PathBuf> {
        let name = format!("chat_export_{}.txt", Local::now().format("%Y%m%d_%H%M%S"));
        std::fs::create_dir_all(dir)?;
        let path = dir.join(name);
        std::fs::write(&path, self.transcript())?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn starts_with_welcome() {
        let conv = Conversation::new();
        assert_eq!(conv.entries().len(), 1);
        assert_eq!(conv.entries()[0].sender, Sender::Assistant);
        assert_eq!(conv.status(), "Ready");
        assert!(!conv.is_busy());
    }

    #[test]
    fn render_uses_short_time_and_label() {
        let entry = ChatEntry::new(Sender::User, "hello");
        let rendered = entry.render();
        assert!(rendered.ends_with("] You: hello"));
        assert_eq!(entry.time_label().len(), 5);
        assert!(rendered.starts_with('['));
    }

    #[test]
    fn clear_leaves_one_system_entry() {
        let mut conv = Conversation::new();
        conv.push(Sender::User, "one");
        conv.set_busy(true);
        let note = conv.clear();
        assert_eq!(conv.entries(), &[note.clone()]);
        assert_eq!(note.sender, Sender::System);
        assert!(!conv.is_busy());
    }

    #[test]
    fn status_and_theme_report_changes() {
        let mut conv = Conversation::new();
        assert!(!conv.set_status("Ready"));
        assert!(conv.set_status("Processing..."));
        assert!(!conv.set_theme(Theme::Dark));
        assert!(conv.set_theme(Theme::Light));
    }

    #[test]
    fn export_writes_transcript() {
        let dir = tempfile::tempdir().unwrap();
        let mut conv = Conversation::new();
        conv.push(Sender::User, "system info");
        conv.push(Sender::Assistant, "all good");

        let path = conv.export_to(dir.path()).unwrap();
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("chat_export_") && name.ends_with(".txt"));
        assert_eq!(name.len(), "chat_export_20240101_120000.txt".len());

        let body = std::fs::read_to_string(&path).unwrap();
        let paragraphs: Vec<&str> = body.split("\n\n[").collect();
        assert_eq!(paragraphs.len(), 3);
        assert!(body.contains("] You: system info"));
        assert!(body.ends_with("] Assistant: all good"));
    }
}
