//! Pair running worker processes with their recorded sessions.

use serde::Serialize;

use crate::models::process::RunningProcessInfo;
use crate::models::session::Session;

/// A running process and the recorded session it most likely serves.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct RunningSession {
    /// The scanned process.
    pub process: RunningProcessInfo,
    /// Most recently active session recorded for the process's cwd.
    pub session: Option<Session>,
}

/// Match each process to the latest session whose project path equals the
/// process working directory.
///
/// Processes without a known working directory, or with no matching
/// session, are returned with `session: None`.
#[must_use]
pub fn map_running_sessions(
    sessions: &[Session],
    processes: Vec<RunningProcessInfo>,
) -> Vec<RunningSession> {
    processes
        .into_iter()
        .map(|process| {
            let session = process.working_directory.as_ref().and_then(|cwd| {
                sessions
                    .iter()
                    .filter(|s| &s.project_path == cwd)
                    .max_by_key(|s| s.last_active_at)
                    .cloned()
            });
            RunningSession { process, session }
        })
        .collect()
}
