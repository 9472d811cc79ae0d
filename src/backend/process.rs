//! Child process hosting the backend API server.
//!
//! The interpreter is resolved in this order:
//! 1. `backend.interpreter` from config (if set)
//! 2. `python3` on `PATH` via [`which::which`]
//! 3. `python` on `PATH`
//!
//! Stdout and stderr of the child are forwarded line by line into `tracing`
//! so the server's own logging ends up next to ours.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};

use crate::config::BackendConfig;
use crate::error::{BridgeError, Result};

/// Interpreter names looked up on `PATH`, in order.
const INTERPRETER_CANDIDATES: [&str; 2] = ["python3", "python"];

/// Resolve the interpreter used to run the backend script.
///
/// # Errors
///
/// Returns [`BridgeError::HandshakeFailed`] if no interpreter can be found.
pub fn discover_interpreter(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        if path.is_file() {
            return Ok(path.to_path_buf());
        }
        return Err(BridgeError::HandshakeFailed(format!(
            "configured interpreter not found: {}",
            path.display()
        )));
    }

    INTERPRETER_CANDIDATES
        .iter()
        .find_map(|name| which::which(name).ok())
        .ok_or_else(|| {
            BridgeError::HandshakeFailed(format!(
                "no backend interpreter on PATH (tried {})",
                INTERPRETER_CANDIDATES.join(", ")
            ))
        })
}

/// A running backend server process. Killed on drop.
#[derive(Debug)]
pub struct BackendProcess {
    child: Child,
    program: PathBuf,
}

impl BackendProcess {
    /// Spawn `<interpreter> <script>` as configured.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::HandshakeFailed`] if the interpreter cannot be
    /// found or the process cannot be started.
    pub fn spawn(config: &BackendConfig) -> Result<Self> {
        let interpreter = discover_interpreter(config.interpreter.as_deref())?;
        Self::spawn_program(&interpreter, [config.script.as_os_str()], config.working_dir.as_deref())
    }

    /// Spawn an arbitrary program with arguments.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::HandshakeFailed`] if the process cannot be started.
    pub fn spawn_program<I, S>(program: &Path, args: I, working_dir: Option<&Path>) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<std::ffi::OsStr>,
    {
        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = working_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|e| {
            BridgeError::HandshakeFailed(format!(
                "failed to spawn backend at {}: {e}",
                program.display()
            ))
        })?;

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(stdout, "stdout"));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(stderr, "stderr"));
        }

        tracing::info!(
            program = %program.display(),
            pid = child.id().unwrap_or_default(),
            "backend process spawned"
        );

        Ok(Self {
            child,
            program: program.to_path_buf(),
        })
    }

    /// Returns the exit status description if the process has already exited.
    pub fn exited(&mut self) -> Option<String> {
        match self.child.try_wait() {
            Ok(Some(status)) => Some(status.to_string()),
            Ok(None) => None,
            Err(e) => Some(format!("unknown ({e})")),
        }
    }

    /// Kill the process and reap it.
    pub async fn kill(&mut self) {
        if self.exited().is_some() {
            return;
        }
        if let Err(e) = self.child.kill().await {
            tracing::warn!(program = %self.program.display(), error = %e, "failed to kill backend process");
        } else {
            tracing::info!(program = %self.program.display(), "backend process stopped");
        }
    }
}

async fn forward_lines<R>(stream: R, source: &'static str)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut lines = BufReader::new(stream).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if !line.trim().is_empty() => {
                tracing::debug!(target: "assistant_bridge::backend_output", source, "{line}");
            }
            Ok(Some(_)) => {}
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(source, error = %e, "backend output stream closed");
                break;
            }
        }
    }
}
