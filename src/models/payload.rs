//! Injection payloads delivered into a worker's stdin.
//!
//! A payload is an immutable value: its [`body`](InjectionPayload::body) is a
//! pure function of its [`PayloadKind`], so the same payload always renders
//! to the same text. Rendered text contains no control characters other
//! than `\n`, which keeps it safe to write into a terminal-oriented worker.

use std::fmt::Write;

use serde::{Deserialize, Serialize};

use crate::{AppError, Result};

/// Largest accepted progress percentage.
pub const MAX_PERCENTAGE: u8 = 100;

/// Kind of injected update together with its fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PayloadKind {
    /// Passive background information.
    Context {
        /// Information text.
        text: String,
    },
    /// Non-blocking advisory.
    Warning {
        /// Advisory text.
        text: String,
    },
    /// Condition the worker should treat as blocking.
    Block {
        /// Blocker description.
        text: String,
    },
    /// Progress report from another worker or the orchestrator.
    Progress {
        /// Completion percentage in `0..=100`.
        percentage: u8,
        /// Progress message.
        message: String,
    },
    /// Completion notice with ordered key/value details.
    Completion {
        /// One-line summary.
        summary: String,
        /// Details rendered in insertion order.
        metadata: Vec<(String, String)>,
    },
    /// Raw text delivered as if a user typed it.
    UserPrompt {
        /// Prompt text.
        text: String,
    },
}

/// A formatted unit of information for injection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "PayloadKind", into = "PayloadKind")]
pub struct InjectionPayload {
    kind: PayloadKind,
}

impl InjectionPayload {
    /// Passive context update.
    #[must_use]
    pub fn context(text: impl Into<String>) -> Self {
        Self {
            kind: PayloadKind::Context { text: text.into() },
        }
    }

    /// Non-blocking warning.
    #[must_use]
    pub fn warning(text: impl Into<String>) -> Self {
        Self {
            kind: PayloadKind::Warning { text: text.into() },
        }
    }

    /// Blocking condition requiring the worker's attention.
    #[must_use]
    pub fn block(text: impl Into<String>) -> Self {
        Self {
            kind: PayloadKind::Block { text: text.into() },
        }
    }

    /// Progress update.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidPayload` if `percentage` is outside `0..=100`.
    pub fn progress(percentage: i64, message: impl Into<String>) -> Result<Self> {
        let percentage = u8::try_from(percentage)
            .ok()
            .filter(|p| *p <= MAX_PERCENTAGE)
            .ok_or_else(|| {
                AppError::InvalidPayload(format!(
                    "progress percentage {percentage} is outside 0..=100"
                ))
            })?;

        Ok(Self {
            kind: PayloadKind::Progress {
                percentage,
                message: message.into(),
            },
        })
    }

    /// Completion notice; `metadata` keeps its iteration order.
    #[must_use]
    pub fn completion<K, V>(
        summary: impl Into<String>,
        metadata: impl IntoIterator<Item = (K, V)>,
    ) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            kind: PayloadKind::Completion {
                summary: summary.into(),
                metadata: metadata
                    .into_iter()
                    .map(|(k, v)| (k.into(), v.into()))
                    .collect(),
            },
        }
    }

    /// Raw user prompt, injected verbatim (after sanitizing).
    #[must_use]
    pub fn user_prompt(text: impl Into<String>) -> Self {
        Self {
            kind: PayloadKind::UserPrompt { text: text.into() },
        }
    }

    /// The payload's kind and fields.
    #[must_use]
    pub fn kind(&self) -> &PayloadKind {
        &self.kind
    }

    /// Short label for logging (`context`, `warning`, ...).
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self.kind {
            PayloadKind::Context { .. } => "context",
            PayloadKind::Warning { .. } => "warning",
            PayloadKind::Block { .. } => "block",
            PayloadKind::Progress { .. } => "progress",
            PayloadKind::Completion { .. } => "completion",
            PayloadKind::UserPrompt { .. } => "user_prompt",
        }
    }

    /// Render the human-readable text written to the worker.
    #[must_use]
    pub fn body(&self) -> String {
        match &self.kind {
            PayloadKind::Context { text } => {
                format!("📋 REAL-TIME CONTEXT UPDATE:\n{}", sanitize(text))
            }
            PayloadKind::Warning { text } => format!("⚠️ WARNING:\n{}", sanitize(text)),
            PayloadKind::Block { text } => format!(
                "🚨 BLOCKER - ATTENTION NEEDED:\n{}\n\nPlease review this blocker and adjust your approach.",
                sanitize(text)
            ),
            PayloadKind::Progress {
                percentage,
                message,
            } => format!("📊 PROGRESS UPDATE [{percentage}%]:\n{}", sanitize(message)),
            PayloadKind::Completion { summary, metadata } => {
                let mut body = format!("✅ COMPLETION NOTIFICATION:\n{}", sanitize(summary));
                if !metadata.is_empty() {
                    body.push_str("\n\nDetails:");
                    for (index, (key, value)) in metadata.iter().enumerate() {
                        let _ = write!(
                            body,
                            "\n{}. {}: {}",
                            index + 1,
                            sanitize(key),
                            sanitize(value)
                        );
                    }
                }
                body
            }
            PayloadKind::UserPrompt { text } => sanitize(text),
        }
    }

    /// Serialize the payload as JSON.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidPayload` if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| AppError::InvalidPayload(e.to_string()))
    }

    /// Parse a payload from JSON, enforcing the same field ranges as the
    /// constructors.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidPayload` for malformed JSON or out-of-range
    /// fields.
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| AppError::InvalidPayload(e.to_string()))
    }
}

impl TryFrom<PayloadKind> for InjectionPayload {
    type Error = AppError;

    fn try_from(kind: PayloadKind) -> Result<Self> {
        if let PayloadKind::Progress { percentage, .. } = &kind {
            if *percentage > MAX_PERCENTAGE {
                return Err(AppError::InvalidPayload(format!(
                    "progress percentage {percentage} is outside 0..=100"
                )));
            }
        }
        Ok(Self { kind })
    }
}

impl From<InjectionPayload> for PayloadKind {
    fn from(payload: InjectionPayload) -> Self {
        payload.kind
    }
}

/// Normalize line endings and strip control characters other than `\n`.
fn sanitize(text: &str) -> String {
    let normalized = text.replace("\r\n", "\n").replace('\r', "\n");
    normalized
        .chars()
        .filter_map(|c| match c {
            '\n' => Some('\n'),
            '\t' => Some(' '),
            c if c.is_control() => None,
            c => Some(c),
        })
        .collect()
}

/// Ready-made payloads for common coordination events.
pub mod presets {
    use std::fmt::Write;

    use super::InjectionPayload;

    /// An upstream dependency finished; hand its results downstream.
    #[must_use]
    pub fn dependency_completed(
        upstream: &str,
        summary: &str,
        insights: &[String],
    ) -> InjectionPayload {
        let mut text = format!(
            "Upstream dependency '{upstream}' has completed.\n\nSummary: {summary}"
        );
        if !insights.is_empty() {
            text.push_str("\n\nKey insights:");
            for insight in insights {
                let _ = write!(text, "\n- {insight}");
            }
        }
        text.push_str("\n\nYou can now proceed with your task using this context.");
        InjectionPayload::context(text)
    }

    /// A task's prerequisites are satisfied.
    #[must_use]
    pub fn task_ready(task: &str, context: &str) -> InjectionPayload {
        InjectionPayload::context(format!(
            "Task '{task}' is ready to start.\n\nContext: {context}"
        ))
    }

    /// A test failed; the worker should fix it before continuing.
    #[must_use]
    pub fn test_failed(test: &str, error: &str) -> InjectionPayload {
        InjectionPayload::block(format!(
            "Test '{test}' failed with error:\n\n{error}\n\nPlease fix the failing test before proceeding."
        ))
    }

    /// A security audit raised an issue.
    #[must_use]
    pub fn security_warning(issue: &str, severity: &str) -> InjectionPayload {
        InjectionPayload::warning(format!(
            "Security audit found {severity} severity issue:\n\n{issue}\n\nPlease address this security concern."
        ))
    }

    /// Reviewer feedback on a file.
    #[must_use]
    pub fn code_review_feedback(file: &str, feedback: &str) -> InjectionPayload {
        InjectionPayload::context(format!("Code review feedback for {file}:\n\n{feedback}"))
    }
}
