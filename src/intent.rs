//! Local intents handled before a command is routed anywhere.
//!
//! | Phrase | Action |
//! |--------|--------|
//! | "change theme ..." | [`LocalAction::ChangeTheme`] |
//! | "switch theme ..." | [`LocalAction::ChangeTheme`] |
//!
//! Matching is a case-insensitive substring test; the first matching phrase wins.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Colour scheme requested through the theme intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Theme {
    Light,
    Dark,
    #[serde(rename = "AMOLED")]
    Amoled,
}

impl Theme {
    /// Variant keywords in the order they are checked.
    const KEYWORDS: [(&'static str, Theme); 3] = [
        ("light", Theme::Light),
        ("dark", Theme::Dark),
        ("amoled", Theme::Amoled),
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Light => "Light",
            Self::Dark => "Dark",
            Self::Amoled => "AMOLED",
        }
    }
}

impl fmt::Display for Theme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An intent consumed locally instead of reaching the backend or fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalAction {
    /// Switch the colour scheme. `None` when no known theme was named.
    ChangeTheme(Option<Theme>),
}

impl LocalAction {
    /// Human-readable confirmation for the conversation log.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::ChangeTheme(Some(theme)) => format!("Theme changed to {theme} mode"),
            Self::ChangeTheme(None) => {
                "Theme not recognised. Try \"change theme to light\", \"dark\" or \"amoled\"."
                    .to_owned()
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum IntentKind {
    ChangeTheme,
}

/// Fixed phrase table, checked in order.
const PHRASES: [(&str, IntentKind); 2] = [
    ("change theme", IntentKind::ChangeTheme),
    ("switch theme", IntentKind::ChangeTheme),
];

/// Recognise a local intent in `text`.
#[must_use]
pub fn match_local_intent(text: &str) -> Option<LocalAction> {
    let lower = text.to_lowercase();
    let (_, kind) = PHRASES.iter().find(|(phrase, _)| lower.contains(phrase))?;
    match kind {
        IntentKind::ChangeTheme => {
            let theme = Theme::KEYWORDS
                .iter()
                .find(|(keyword, _)| lower.contains(keyword))
                .map(|(_, theme)| *theme);
            Some(LocalAction::ChangeTheme(theme))
        }
    }
}
