//! Injector configuration parsing and validation.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::orchestrator::markers::MarkerSet;
use crate::{AppError, Result};

/// How the initial prompt reaches a freshly spawned worker.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PromptDelivery {
    /// Written as the first line on the worker's stdin.
    #[default]
    Stdin,
    /// Appended as the final command-line argument.
    Argument,
}

/// Timeout values (milliseconds) bounding the manager's suspension points.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TimeoutConfig {
    /// Maximum wait for the worker's first output line before it is
    /// considered running anyway.
    #[serde(default = "default_startup_grace_ms")]
    pub startup_grace_ms: u64,
    /// Maximum time a single injection may spend waiting for its write.
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,
    /// Grace period between a stop request and a forced kill.
    #[serde(default = "default_stop_grace_ms")]
    pub stop_grace_ms: u64,
}

fn default_startup_grace_ms() -> u64 {
    1500
}

fn default_write_timeout_ms() -> u64 {
    5000
}

fn default_stop_grace_ms() -> u64 {
    5000
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            startup_grace_ms: default_startup_grace_ms(),
            write_timeout_ms: default_write_timeout_ms(),
            stop_grace_ms: default_stop_grace_ms(),
        }
    }
}

/// Output marker patterns (regular expressions) used for advisory status.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct MarkerConfig {
    /// Patterns that flip a running worker to `Completed`.
    #[serde(default = "default_completion_markers")]
    pub completion: Vec<String>,
    /// Patterns that flip a running worker to `Blocked`.
    #[serde(default = "default_blocked_markers")]
    pub blocked: Vec<String>,
}

fn default_completion_markers() -> Vec<String> {
    vec![r"^\s*(?:✅\s*)?TASK[ _-]?COMPLETE\b".into()]
}

fn default_blocked_markers() -> Vec<String> {
    vec![r"^\s*(?:🚫\s*)?BLOCKED\b".into()]
}

impl Default for MarkerConfig {
    fn default() -> Self {
        Self {
            completion: default_completion_markers(),
            blocked: default_blocked_markers(),
        }
    }
}

fn default_worker_cli() -> String {
    "claude".into()
}

/// Top-level configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct InjectorConfig {
    /// Worker executable spawned for new sessions (e.g. `claude`).
    #[serde(default = "default_worker_cli")]
    pub worker_cli: String,
    /// Arguments passed to the worker before any prompt argument.
    #[serde(default)]
    pub worker_cli_args: Vec<String>,
    /// Root of the session-log tree; defaults to `~/.claude/projects`.
    #[serde(default)]
    pub sessions_root: Option<PathBuf>,
    /// Initial prompt delivery convention.
    #[serde(default)]
    pub prompt_delivery: PromptDelivery,
    /// Timeout configuration.
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    /// Output marker contract.
    #[serde(default)]
    pub markers: MarkerConfig,
}

impl Default for InjectorConfig {
    fn default() -> Self {
        Self {
            worker_cli: default_worker_cli(),
            worker_cli_args: Vec::new(),
            sessions_root: None,
            prompt_delivery: PromptDelivery::default(),
            timeouts: TimeoutConfig::default(),
            markers: MarkerConfig::default(),
        }
    }
}

impl InjectorConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and validate it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Session-log root, resolved against the user's home directory when
    /// not configured explicitly.
    ///
    /// # Errors
    ///
    /// Returns `AppError::StorageUnavailable` if no root is configured and the
    /// home directory cannot be determined.
    pub fn sessions_root(&self) -> Result<PathBuf> {
        if let Some(root) = &self.sessions_root {
            return Ok(root.clone());
        }
        dirs::home_dir()
            .map(|home| home.join(".claude").join("projects"))
            .ok_or_else(|| {
                AppError::StorageUnavailable("could not determine home directory".into())
            })
    }

    /// Startup grace period as a [`Duration`].
    #[must_use]
    pub fn startup_grace(&self) -> Duration {
        Duration::from_millis(self.timeouts.startup_grace_ms)
    }

    /// Per-injection write timeout as a [`Duration`].
    #[must_use]
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.timeouts.write_timeout_ms)
    }

    /// Stop grace period as a [`Duration`].
    #[must_use]
    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.timeouts.stop_grace_ms)
    }

    /// Compile the configured marker patterns.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if any pattern is not a valid regex.
    pub fn marker_set(&self) -> Result<MarkerSet> {
        MarkerSet::new(&self.markers.completion, &self.markers.blocked)
    }

    fn validate(&self) -> Result<()> {
        if self.worker_cli.trim().is_empty() {
            return Err(AppError::Config("worker_cli must not be empty".into()));
        }

        if self.timeouts.write_timeout_ms == 0 {
            return Err(AppError::Config(
                "timeouts.write_timeout_ms must be greater than zero".into(),
            ));
        }

        if self.markers.completion.is_empty() && self.markers.blocked.is_empty() {
            warn!("no output markers configured; status will never leave running on its own");
        }

        self.marker_set()?;

        if let Some(root) = &self.sessions_root {
            if !root.is_dir() {
                warn!(root = %root.display(), "configured sessions_root does not exist yet");
            }
        }

        Ok(())
    }
}
