//! Session discovery over the on-disk session-log tree.
//!
//! Layout: `<root>/<project_id>/<session_id>.jsonl`. Reading never mutates
//! the logs. Problems are contained at the smallest scope: a bad line is a
//! [`ParseWarning`](crate::models::session::ParseWarning) on its session, a
//! bad file is skipped, and a bad project is skipped by
//! [`SessionDetector::get_all_sessions`].

use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{debug, info_span, warn};

use crate::config::InjectorConfig;
use crate::discovery::session_log::SessionLog;
use crate::models::session::Session;
use crate::{AppError, Result};

/// Extension of session-log files.
pub const LOG_EXTENSION: &str = "jsonl";

/// Finds and parses recorded worker sessions.
#[derive(Debug, Clone)]
pub struct SessionDetector {
    root: PathBuf,
}

impl SessionDetector {
    /// Detector over an explicit session-storage root.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Detector over the configured (or default) root.
    ///
    /// # Errors
    ///
    /// Returns `AppError::StorageUnavailable` if the default root cannot be
    /// resolved.
    pub fn from_config(config: &InjectorConfig) -> Result<Self> {
        Ok(Self::new(config.sessions_root()?))
    }

    /// Session-storage root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// List project identifiers (subdirectory names), sorted.
    ///
    /// # Errors
    ///
    /// Returns `AppError::StorageUnavailable` if the root is missing or
    /// cannot be read.
    pub fn list_projects(&self) -> Result<Vec<String>> {
        let entries = fs::read_dir(&self.root).map_err(|err| {
            AppError::StorageUnavailable(format!("{}: {err}", self.root.display()))
        })?;

        let mut projects: Vec<String> = entries
            .filter_map(std::result::Result::ok)
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| entry.file_name().to_str().map(str::to_owned))
            .collect();
        projects.sort();
        Ok(projects)
    }

    /// Read every session of a project, newest activity first.
    ///
    /// Files that cannot be read or hold no valid record are skipped with a
    /// warning; they never fail the call.
    ///
    /// # Errors
    ///
    /// Returns `AppError::StorageUnavailable` if `project_id` is not a plain
    /// directory name or the project directory cannot be read.
    pub fn get_project_sessions(&self, project_id: &str) -> Result<Vec<Session>> {
        let _span = info_span!("get_project_sessions", project_id).entered();
        let project_dir = self.project_dir(project_id)?;

        let entries = fs::read_dir(&project_dir).map_err(|err| {
            AppError::StorageUnavailable(format!("{}: {err}", project_dir.display()))
        })?;

        let mut sessions = Vec::new();
        for entry in entries.filter_map(std::result::Result::ok) {
            let path = entry.path();
            if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some(LOG_EXTENSION) {
                continue;
            }
            match read_session_file(project_id, &path) {
                Ok(Some(session)) => sessions.push(session),
                Ok(None) => {
                    warn!(path = %path.display(), "session log has no valid records, skipping");
                }
                Err(err) => {
                    warn!(path = %path.display(), %err, "failed to read session log, skipping");
                }
            }
        }

        sessions.sort_by(|a, b| {
            b.last_active_at
                .cmp(&a.last_active_at)
                .then_with(|| a.session_id.cmp(&b.session_id))
        });
        debug!(project_id, count = sessions.len(), "project sessions loaded");
        Ok(sessions)
    }

    /// Read sessions for every project, skipping projects that fail.
    ///
    /// Projects with no sessions are omitted.
    ///
    /// # Errors
    ///
    /// Returns `AppError::StorageUnavailable` only if the root itself cannot
    /// be listed.
    pub fn get_all_sessions(&self) -> Result<BTreeMap<String, Vec<Session>>> {
        let mut all = BTreeMap::new();
        for project_id in self.list_projects()? {
            match self.get_project_sessions(&project_id) {
                Ok(sessions) if sessions.is_empty() => {}
                Ok(sessions) => {
                    all.insert(project_id, sessions);
                }
                Err(err) => {
                    warn!(project_id, %err, "failed to read project sessions, skipping");
                }
            }
        }
        Ok(all)
    }

    /// Look up a recorded session by identifier across all projects.
    ///
    /// # Errors
    ///
    /// Returns `AppError::StorageUnavailable` if the root cannot be listed.
    pub fn find_session(&self, session_id: &str) -> Result<Option<Session>> {
        for project_id in self.list_projects()? {
            let Ok(project_dir) = self.project_dir(&project_id) else {
                continue;
            };
            let path = project_dir.join(format!("{session_id}.{LOG_EXTENSION}"));
            if !path.is_file() {
                continue;
            }
            match read_session_file(&project_id, &path) {
                Ok(Some(session)) => return Ok(Some(session)),
                Ok(None) => {}
                Err(err) => warn!(path = %path.display(), %err, "failed to read session log"),
            }
        }
        Ok(None)
    }

    /// Most recently active session whose project path is `path`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::StorageUnavailable` if the root cannot be listed.
    pub fn latest_session_for_path(&self, path: &Path) -> Result<Option<Session>> {
        Ok(self
            .get_all_sessions()?
            .into_values()
            .flatten()
            .filter(|s| s.project_path == path)
            .max_by_key(|s| s.last_active_at))
    }

    fn project_dir(&self, project_id: &str) -> Result<PathBuf> {
        let mut components = Path::new(project_id).components();
        let is_plain = matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(_)), None)
        );
        if !is_plain {
            return Err(AppError::StorageUnavailable(format!(
                "invalid project id '{project_id}'"
            )));
        }

        let dir = self.root.join(project_id);
        if dir.is_dir() {
            Ok(dir)
        } else {
            Err(AppError::StorageUnavailable(format!(
                "project directory not found: {project_id}"
            )))
        }
    }
}

/// Parse one session-log file into a [`Session`].
///
/// Returns `Ok(None)` when the file holds no valid record.
///
/// # Errors
///
/// Returns `AppError::Io` if the file cannot be read.
pub fn read_session_file(project_id: &str, path: &Path) -> Result<Option<Session>> {
    let bytes = fs::read(path)?;
    let content = String::from_utf8_lossy(&bytes);
    let log = SessionLog::parse(&content);

    for warning in &log.warnings {
        warn!(
            path = %path.display(),
            line = warning.line,
            message = %warning.message,
            "skipping malformed session-log line"
        );
    }

    let Some(summary) = log.summarize() else {
        return Ok(None);
    };

    let Some(session_id) = path.file_stem().and_then(|s| s.to_str()) else {
        return Ok(None);
    };

    let modified = file_modified(path);
    let created_at = summary.created_at.unwrap_or(modified);
    let last_active_at = summary.last_active_at.unwrap_or(created_at);

    Ok(Some(Session {
        session_id: session_id.to_owned(),
        project_id: project_id.to_owned(),
        project_path: summary
            .cwd
            .unwrap_or_else(|| decode_project_path(project_id)),
        first_message: summary.first_message,
        model: summary.model,
        created_at,
        last_active_at,
        log_path: path.to_path_buf(),
        record_count: log.records.len(),
        parse_warnings: log.warnings,
    }))
}

/// Best-effort decoding of a project directory name into a path.
///
/// Session stores encode `/home/me/app` as `-home-me-app`; the mapping is
/// lossy for names that contain `-`, so recorded `cwd` values take
/// precedence.
#[must_use]
pub fn decode_project_path(project_id: &str) -> PathBuf {
    PathBuf::from(project_id.replace('-', "/"))
}

fn file_modified(path: &Path) -> DateTime<Utc> {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .map_or_else(|_| Utc::now(), DateTime::<Utc>::from)
}
