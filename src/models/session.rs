//! Recorded worker sessions.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A recoverable problem found while reading one session-log line.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ParseWarning {
    /// One-based line number within the log file.
    pub line: usize,
    /// Parser message.
    pub message: String,
}

/// Snapshot of a worker session, built by reading its append-only log.
///
/// Re-reading the log produces a fresh value; a `Session` is never updated
/// in place.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct Session {
    /// Opaque session identifier (the log file stem).
    pub session_id: String,
    /// Owning project directory name.
    pub project_id: String,
    /// Directory the worker operates in.
    pub project_path: PathBuf,
    /// Earliest message, used as a label.
    pub first_message: Option<String>,
    /// Latest model identifier recorded.
    pub model: Option<String>,
    /// Timestamp of the first record.
    pub created_at: DateTime<Utc>,
    /// Timestamp of the last record.
    pub last_active_at: DateTime<Utc>,
    /// Log file the snapshot was read from; empty for ad hoc sessions.
    pub log_path: PathBuf,
    /// Number of records that parsed successfully.
    pub record_count: usize,
    /// Lines that were skipped while reading the log.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parse_warnings: Vec<ParseWarning>,
}

impl Session {
    /// Synthetic session for a worker started without a recorded log.
    #[must_use]
    pub fn ad_hoc(project_path: impl Into<PathBuf>) -> Self {
        let now = Utc::now();
        Self {
            session_id: Uuid::new_v4().to_string(),
            project_id: String::new(),
            project_path: project_path.into(),
            first_message: None,
            model: None,
            created_at: now,
            last_active_at: now,
            log_path: PathBuf::new(),
            record_count: 0,
            parse_warnings: Vec::new(),
        }
    }

    /// Replace the session identifier, keeping every other field.
    #[must_use]
    pub fn with_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }

    /// Short single-line preview of the first message.
    #[must_use]
    pub fn preview(&self, max_chars: usize) -> Option<String> {
        self.first_message.as_ref().map(|msg| {
            let line = msg.lines().next().unwrap_or_default();
            let mut preview: String = line.chars().take(max_chars).collect();
            if line.chars().count() > max_chars || msg.lines().nth(1).is_some() {
                preview.push('…');
            }
            preview
        })
    }
}
