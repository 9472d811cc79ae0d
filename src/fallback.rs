//! Offline responder used when no backend session exists.
//!
//! Intents are matched by case-insensitive substring, in priority order:
//! file creation, search, system info, help. Anything else gets a generic
//! nudge listing example commands.

/// Produces a reply for a command text. Implementations must be pure apart
/// from reading ambient facts such as the clock or host information.
pub trait Responder: Send + Sync + 'static {
    fn respond(&self, text: &str) -> String;
}

/// Recognised offline intents, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackIntent {
    CreateFile,
    Search,
    SystemInfo,
    Help,
}

impl FallbackIntent {
    const ORDERED: [FallbackIntent; 4] = [
        FallbackIntent::CreateFile,
        FallbackIntent::Search,
        FallbackIntent::SystemInfo,
        FallbackIntent::Help,
    ];

    fn phrases(self) -> &'static [&'static str] {
        match self {
            Self::CreateFile => &["create file"],
            Self::Search => &["search for", "google"],
            Self::SystemInfo => &["system info"],
            Self::Help => &["help"],
        }
    }
}

/// Classify `text`, returning the first matching intent and its parameter
/// (the trimmed remainder after the phrase, or `"unknown"`).
#[must_use]
pub fn classify(text: &str) -> Option<(FallbackIntent, String)> {
    let lower = text.to_lowercase();
    FallbackIntent::ORDERED
        .into_iter()
        .find(|intent| intent.phrases().iter().any(|p| lower.contains(p)))
        .map(|intent| (intent, extract_parameter(&lower, intent.phrases())))
}

/// Text following the first phrase that yields a non-empty remainder.
fn extract_parameter(lower: &str, phrases: &[&str]) -> String {
    phrases
        .iter()
        .filter_map(|phrase| {
            let idx = lower.find(phrase)?;
            let rest = lower[idx + phrase.len()..].trim();
            (!rest.is_empty()).then(|| rest.to_owned())
        })
        .next()
        .unwrap_or_else(|| "unknown".to_owned())
}

/// Host facts embedded in the system-info reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostFacts {
    pub os: String,
    pub arch: String,
    pub machine: String,
    pub user: String,
    pub processors: usize,
}

impl HostFacts {
    /// Collect facts about the current host.
    #[must_use]
    pub fn current() -> Self {
        let env_or_unknown = |keys: &[&str]| {
            keys.iter()
                .find_map(|k| std::env::var(k).ok().filter(|v| !v.is_empty()))
                .unwrap_or_else(|| "unknown".to_owned())
        };
        Self {
            os: std::env::consts::OS.to_owned(),
            arch: std::env::consts::ARCH.to_owned(),
            machine: env_or_unknown(&["HOSTNAME", "COMPUTERNAME"]),
            user: env_or_unknown(&["USER", "USERNAME"]),
            processors: std::thread::available_parallelism()
                .map(std::num::NonZeroUsize::get)
                .unwrap_or(1),
        }
    }
}

/// The canned offline responder.
#[derive(Debug, Clone)]
pub struct FallbackResponder {
    host: HostFacts,
}

impl Default for FallbackResponder {
    fn default() -> Self {
        Self::new(HostFacts::current())
    }
}

impl FallbackResponder {
    #[must_use]
    pub fn new(host: HostFacts) -> Self {
        Self { host }
    }

    fn system_info(&self) -> String {
        format!(
            "💻 System Information:\n\n\
             • OS: {}\n\
             • Architecture: {}\n\
             • Machine: {}\n\
             • User: {}\n\
             • Processors: {}\n\
             • Status: All systems operational",
            self.host.os, self.host.arch, self.host.machine, self.host.user, self.host.processors
        )
    }
}

impl Responder for FallbackResponder {
    fn respond(&self, text: &str) -> String {
        match classify(text) {
            Some((FallbackIntent::CreateFile, name)) => {
                format!("File creation command received.\n\nCreating file: {name}")
            }
            Some((FallbackIntent::Search, query)) => {
                format!("Searching for: {query}\n\nOpening browser and performing search...")
            }
            Some((FallbackIntent::SystemInfo, _)) => self.system_info(),
            Some((FallbackIntent::Help, _)) => "Available Commands:\n\n\
                 **File Operations:** create file, delete file, list files\n\
                 **Web Operations:** search for, open website, download app\n\
                 **System:** system info, install app\n\
                 **Theme:** change theme to light/dark/amoled"
                .to_owned(),
            None => format!(
                "I received your command: \"{text}\"\n\n\
                 Try commands like:\n\
                 • \"search for AI tutorials\"\n\
                 • \"system info\"\n\
                 • \"change theme to light\"\n\
                 • \"help\" for more commands"
            ),
        }
    }
}
