//! Worker process spawner.
//!
//! Launches one worker CLI process per managed session with:
//! - stdin, stdout and stderr piped;
//! - the session's project directory as working directory;
//! - `kill_on_drop(true)` so an orphaned handle never leaks a process;
//! - `INJECTOR_SESSION_ID` set to the managed session identifier.
//!
//! Readiness is not awaited here: the drain tasks own stdout, so the
//! [`SessionManager`](crate::orchestrator::manager::SessionManager) decides
//! when a worker is ready from what they observe.

use std::path::Path;
use std::process::Stdio;

use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tracing::info;

use crate::config::{InjectorConfig, PromptDelivery};
use crate::{AppError, Result};

/// Environment variable carrying the managed session identifier.
pub const SESSION_ID_ENV: &str = "INJECTOR_SESSION_ID";

/// How worker processes are launched.
#[derive(Debug, Clone)]
pub struct SpawnConfig {
    /// Worker CLI binary (e.g. `claude`).
    pub worker_cli: String,
    /// Arguments passed before the optional prompt argument.
    pub worker_cli_args: Vec<String>,
    /// Where the initial prompt goes.
    pub prompt_delivery: PromptDelivery,
}

impl From<&InjectorConfig> for SpawnConfig {
    fn from(config: &InjectorConfig) -> Self {
        Self {
            worker_cli: config.worker_cli.clone(),
            worker_cli_args: config.worker_cli_args.clone(),
            prompt_delivery: config.prompt_delivery,
        }
    }
}

/// Stdio handles of a freshly spawned worker.
///
/// The caller must keep `child` alive for as long as the worker should run.
#[derive(Debug)]
pub struct WorkerConnection {
    /// Child process handle.
    pub child: Child,
    /// OS process id, if the OS reported one.
    pub pid: Option<u32>,
    /// Worker stdin, for injected frames.
    pub stdin: ChildStdin,
    /// Worker stdout.
    pub stdout: ChildStdout,
    /// Worker stderr.
    pub stderr: ChildStderr,
}

/// Spawn a worker for `session_id` in `working_dir`.
///
/// With [`PromptDelivery::Argument`] the `initial_prompt` is appended as the
/// last command-line argument; otherwise it is ignored here and the caller
/// writes it to stdin.
///
/// # Errors
///
/// - `AppError::Spawn("failed to spawn worker …")` if the OS cannot launch
///   the executable (missing binary, bad working directory, permissions).
/// - `AppError::Spawn("failed to capture worker …")` if a stdio pipe is
///   missing.
pub fn spawn_worker(
    config: &SpawnConfig,
    session_id: &str,
    working_dir: &Path,
    initial_prompt: Option<&str>,
) -> Result<WorkerConnection> {
    let mut cmd = Command::new(&config.worker_cli);
    cmd.args(&config.worker_cli_args);

    if config.prompt_delivery == PromptDelivery::Argument {
        if let Some(prompt) = initial_prompt {
            cmd.arg(prompt);
        }
    }

    if !working_dir.as_os_str().is_empty() {
        cmd.current_dir(working_dir);
    }

    cmd.env(SESSION_ID_ENV, session_id)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|err| {
        AppError::Spawn(format!(
            "failed to spawn worker '{}' in {}: {err}",
            config.worker_cli,
            working_dir.display()
        ))
    })?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| AppError::Spawn("failed to capture worker stdin".into()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| AppError::Spawn("failed to capture worker stdout".into()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| AppError::Spawn("failed to capture worker stderr".into()))?;

    let pid = child.id();
    info!(
        session_id,
        pid,
        worker_cli = %config.worker_cli,
        cwd = %working_dir.display(),
        "worker process spawned"
    );

    Ok(WorkerConnection {
        child,
        pid,
        stdin,
        stdout,
        stderr,
    })
}
