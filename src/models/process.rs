//! Process-level types: managed process status and OS scan results.

use std::fmt::{Display, Formatter};
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a managed worker process.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProcessStatus {
    /// Spawned, readiness not yet observed.
    Starting,
    /// Ready and accepting injections.
    Running,
    /// Worker printed a blocked marker; still injectable.
    Blocked,
    /// Worker printed a completion marker; still injectable.
    Completed,
    /// Stopped on request or exited cleanly.
    Stopped,
    /// Exited with an error or lost its output streams.
    Failed,
}

impl ProcessStatus {
    /// Whether injections may still be delivered.
    #[must_use]
    pub fn accepts_input(self) -> bool {
        !self.is_terminal()
    }

    /// `Stopped` and `Failed` are final.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Failed)
    }

    /// Whether an advisory marker may move the process into `next`.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        !self.is_terminal() && next != Self::Starting
    }
}

impl Display for ProcessStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Blocked => "blocked",
            Self::Completed => "completed",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Point-in-time view of a managed process.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ProcessSnapshot {
    /// Session the process serves.
    pub session_id: String,
    /// OS process identifier.
    pub pid: Option<u32>,
    /// Spawn time.
    pub started_at: DateTime<Utc>,
    /// Current status.
    pub status: ProcessStatus,
    /// Exit code once the process has exited normally.
    pub exit_code: Option<i32>,
    /// Reason recorded when the process failed.
    pub failure: Option<String>,
    /// Bytes of captured stdout.
    pub stdout_bytes: usize,
    /// Bytes of captured stderr.
    pub stderr_bytes: usize,
}

/// A worker process found by scanning the OS process table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct RunningProcessInfo {
    /// OS process identifier.
    pub pid: u32,
    /// Raw command line.
    pub command: String,
    /// Working directory, when the platform exposes it.
    pub working_directory: Option<PathBuf>,
}
