//! Line-delimited JSON session-log parsing.
//!
//! Each line is parsed on its own into a [`LogLine`], so one corrupt record
//! never hides the rest of the log. Logs are append-only and may be written
//! while we read them: a final segment with no terminating newline is a
//! write in progress and is dropped quietly if it does not parse.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;

use crate::models::session::ParseWarning;

/// Text that marks a synthetic system preamble rather than a real message.
const CAVEAT_PREFIX: &str = "Caveat: The messages below were generated";

/// Prefix of slash-command echo records.
const COMMAND_PREFIX: &str = "<command-name>";

/// One record of a session log.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct LogRecord {
    /// Record type (`user`, `assistant`, `summary`, ...).
    #[serde(rename = "type")]
    pub record_type: Option<String>,
    /// Record timestamp.
    pub timestamp: Option<DateTime<Utc>>,
    /// Worker working directory at the time of the record.
    pub cwd: Option<PathBuf>,
    /// Model identifier, when recorded at the top level.
    pub model: Option<String>,
    /// Message payload.
    pub message: Option<LogMessage>,
}

/// Message carried by a [`LogRecord`].
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct LogMessage {
    /// Author role (`user`, `assistant`).
    pub role: Option<String>,
    /// Model identifier, when recorded on the message.
    pub model: Option<String>,
    /// Either a plain string or an array of content blocks.
    pub content: Option<serde_json::Value>,
}

impl LogRecord {
    /// Most specific model identifier on this record.
    #[must_use]
    pub fn model(&self) -> Option<&str> {
        self.message
            .as_ref()
            .and_then(|m| m.model.as_deref())
            .or(self.model.as_deref())
    }

    /// Role of the record's message, falling back to the record type.
    #[must_use]
    pub fn role(&self) -> Option<&str> {
        self.message
            .as_ref()
            .and_then(|m| m.role.as_deref())
            .or(self.record_type.as_deref())
    }

    /// Flattened message text, skipping system preambles and command echoes.
    #[must_use]
    pub fn message_text(&self) -> Option<String> {
        let content = self.message.as_ref()?.content.as_ref()?;
        let text = match content {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Array(blocks) => blocks
                .iter()
                .filter_map(|b| b.get("text").and_then(serde_json::Value::as_str))
                .collect::<Vec<_>>()
                .join("\n"),
            _ => return None,
        };

        let trimmed = text.trim();
        if trimmed.is_empty()
            || trimmed.contains(CAVEAT_PREFIX)
            || trimmed.starts_with(COMMAND_PREFIX)
        {
            return None;
        }
        Some(trimmed.to_owned())
    }
}

/// Result of parsing a single line.
#[derive(Debug, Clone, PartialEq)]
pub enum LogLine {
    /// A well-formed record.
    Record(Box<LogRecord>),
    /// Whitespace only.
    Blank,
    /// Not a JSON object of the expected shape.
    Malformed(String),
}

/// Parse one log line.
#[must_use]
pub fn parse_line(line: &str) -> LogLine {
    if line.trim().is_empty() {
        return LogLine::Blank;
    }
    match serde_json::from_str::<LogRecord>(line) {
        Ok(record) => LogLine::Record(Box::new(record)),
        Err(err) => LogLine::Malformed(err.to_string()),
    }
}

/// All records of a log plus the warnings raised while reading it.
#[derive(Debug, Clone, Default)]
pub struct SessionLog {
    /// Records in file order.
    pub records: Vec<LogRecord>,
    /// Skipped lines.
    pub warnings: Vec<ParseWarning>,
}

/// Values reduced from a log for building a [`Session`](crate::models::session::Session).
#[derive(Debug, Clone, PartialEq)]
pub struct LogSummary {
    /// First record timestamp.
    pub created_at: Option<DateTime<Utc>>,
    /// Last record timestamp.
    pub last_active_at: Option<DateTime<Utc>>,
    /// First meaningful message, preferring user messages.
    pub first_message: Option<String>,
    /// Latest model identifier.
    pub model: Option<String>,
    /// First recorded working directory.
    pub cwd: Option<PathBuf>,
}

impl SessionLog {
    /// Parse a whole log, isolating failures to single lines.
    #[must_use]
    pub fn parse(content: &str) -> Self {
        let mut log = Self::default();
        let complete = content.ends_with('\n');
        let segments: Vec<&str> = content.split('\n').collect();
        let last_index = segments.len().saturating_sub(1);

        for (index, segment) in segments.iter().enumerate() {
            let is_trailing = index == last_index && !complete;
            match parse_line(segment) {
                LogLine::Record(record) => log.records.push(*record),
                LogLine::Blank => {}
                LogLine::Malformed(message) if is_trailing => {
                    debug!(line = index + 1, %message, "ignoring partial trailing record");
                }
                LogLine::Malformed(message) => log.warnings.push(ParseWarning {
                    line: index + 1,
                    message,
                }),
            }
        }

        log
    }

    /// Reduce the records to session metadata, or `None` when empty.
    #[must_use]
    pub fn summarize(&self) -> Option<LogSummary> {
        if self.records.is_empty() {
            return None;
        }

        let created_at = self.records.iter().find_map(|r| r.timestamp);
        let last_active_at = self.records.iter().rev().find_map(|r| r.timestamp);
        let model = self
            .records
            .iter()
            .rev()
            .find_map(|r| r.model().map(str::to_owned));
        let cwd = self.records.iter().find_map(|r| r.cwd.clone());
        let first_message = self
            .records
            .iter()
            .filter(|r| r.role() == Some("user"))
            .find_map(LogRecord::message_text)
            .or_else(|| self.records.iter().find_map(LogRecord::message_text));

        Some(LogSummary {
            created_at,
            last_active_at,
            first_message,
            model,
            cwd,
        })
    }
}
