//! Tracing setup for binaries embedding the bridge.
//!
//! Diagnostics always go to stderr; stdout belongs to whatever protocol the
//! host process speaks. `RUST_LOG` overrides the configured filter.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LoggingConfig;
use crate::error::{BridgeError, Result};

/// File name prefix for the rolling log file.
const LOG_FILE_PREFIX: &str = "assistant-bridge.log";

/// Install the global subscriber.
///
/// Returns the file writer guard when `log_dir` is configured; keep it alive
/// for the lifetime of the process or buffered lines are lost.
///
/// # Errors
///
/// Returns [`BridgeError::Config`] for an invalid filter or when a global
/// subscriber is already installed, and [`BridgeError::Io`] if the log
/// directory cannot be created.
pub fn init_tracing(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => directive_filter(&config.filter)?,
    };

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let (file_layer, guard) = match &config.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| BridgeError::Config(format!("failed to install tracing subscriber: {e}")))?;

    Ok(guard)
}

fn directive_filter(directives: &str) -> Result<EnvFilter> {
    EnvFilter::try_new(directives)
        .map_err(|e| BridgeError::Config(format!("invalid log filter {directives:?}: {e}")))
}
