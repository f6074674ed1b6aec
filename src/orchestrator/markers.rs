//! Output marker contract.
//!
//! Workers signal advisory state by printing a line matching one of the
//! configured patterns:
//!
//! | Default pattern                         | Status      |
//! |-----------------------------------------|-------------|
//! | `^\s*(?:🚫\s*)?BLOCKED\b`               | `Blocked`   |
//! | `^\s*(?:✅\s*)?TASK[ _-]?COMPLETE\b`    | `Completed` |
//!
//! Blocked patterns are checked first. Matching is per captured line and is
//! best-effort: a worker that never prints a marker simply stays `Running`.

use regex::Regex;

use crate::models::process::ProcessStatus;
use crate::Result;

/// Compiled completion and blocked patterns.
#[derive(Debug, Clone)]
pub struct MarkerSet {
    completion: Vec<Regex>,
    blocked: Vec<Regex>,
}

impl MarkerSet {
    /// Compile marker patterns.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if any pattern fails to compile.
    pub fn new<S: AsRef<str>>(completion: &[S], blocked: &[S]) -> Result<Self> {
        Ok(Self {
            completion: compile(completion)?,
            blocked: compile(blocked)?,
        })
    }

    /// A marker set that never matches.
    #[must_use]
    pub fn none() -> Self {
        Self {
            completion: Vec::new(),
            blocked: Vec::new(),
        }
    }

    /// Classify one line of worker output.
    ///
    /// Returns the status the line signals, if any.
    #[must_use]
    pub fn classify(&self, line: &str) -> Option<ProcessStatus> {
        if self.blocked.iter().any(|re| re.is_match(line)) {
            Some(ProcessStatus::Blocked)
        } else if self.completion.iter().any(|re| re.is_match(line)) {
            Some(ProcessStatus::Completed)
        } else {
            None
        }
    }
}

impl Default for MarkerSet {
    fn default() -> Self {
        // Default patterns are static and known to compile.
        let config = crate::config::MarkerConfig::default();
        Self::new(&config.completion, &config.blocked).unwrap_or_else(|_| Self::none())
    }
}

fn compile<S: AsRef<str>>(patterns: &[S]) -> Result<Vec<Regex>> {
    patterns
        .iter()
        .map(|p| Regex::new(p.as_ref()).map_err(Into::into))
        .collect()
}
