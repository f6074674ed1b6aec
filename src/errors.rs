//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
///
/// Parse problems on individual session-log lines are not errors; they are
/// recorded as [`ParseWarning`](crate::models::session::ParseWarning)s on the
/// session that contained them.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Session-storage root (or a project directory) is missing or unreadable.
    StorageUnavailable(String),
    /// The OS process enumeration facility could not be used.
    ProcessQuery(String),
    /// The worker executable could not be launched.
    Spawn(String),
    /// A managed process is already active for the session.
    AlreadyActive(String),
    /// No managed process exists for the session.
    SessionNotFound(String),
    /// The managed process has stopped, failed, or exited.
    SessionNotActive(String),
    /// An operation did not complete within its bound.
    Timeout(String),
    /// A payload field is out of range.
    InvalidPayload(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::StorageUnavailable(msg) => write!(f, "storage unavailable: {msg}"),
            Self::ProcessQuery(msg) => write!(f, "process query: {msg}"),
            Self::Spawn(msg) => write!(f, "spawn: {msg}"),
            Self::AlreadyActive(msg) => write!(f, "already active: {msg}"),
            Self::SessionNotFound(msg) => write!(f, "session not found: {msg}"),
            Self::SessionNotActive(msg) => write!(f, "session not active: {msg}"),
            Self::Timeout(msg) => write!(f, "timeout: {msg}"),
            Self::InvalidPayload(msg) => write!(f, "invalid payload: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<regex::Error> for AppError {
    fn from(err: regex::Error) -> Self {
        Self::Config(format!("invalid marker pattern: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
