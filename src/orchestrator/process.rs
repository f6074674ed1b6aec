//! State of one managed worker process.
//!
//! [`ProcessShared`] is written by the drain tasks and the exit monitor and
//! read by the [`SessionManager`](super::manager::SessionManager). Its lock
//! is a plain `std::sync::Mutex`: it guards in-memory bookkeeping only and
//! is never held across an `.await`. Every state change wakes the waiters on
//! [`ProcessShared::wait_until`].

use std::process::ExitStatus;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::process::Child;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::models::process::{ProcessSnapshot, ProcessStatus};
use crate::orchestrator::markers::MarkerSet;
use crate::stream::reader::{OutputSink, OutputStream};
use crate::stream::writer::WriteRequest;
use crate::{AppError, Result};

/// Mutable bookkeeping for one worker.
#[derive(Debug)]
pub(crate) struct ProcessState {
    pub status: ProcessStatus,
    pub stdout: String,
    pub stderr: String,
    pub saw_output: bool,
    pub open_streams: u8,
    pub exited: bool,
    pub exit_code: Option<i32>,
    pub failure: Option<String>,
    pub stop_requested: bool,
}

impl ProcessState {
    fn new() -> Self {
        Self {
            status: ProcessStatus::Starting,
            stdout: String::new(),
            stderr: String::new(),
            saw_output: false,
            open_streams: 2,
            exited: false,
            exit_code: None,
            failure: None,
            stop_requested: false,
        }
    }

    fn transition(&mut self, session_id: &str, next: ProcessStatus) {
        if self.status == next || !self.status.can_transition_to(next) {
            return;
        }
        debug!(session_id, from = %self.status, to = %next, "status transition");
        self.status = next;
    }

    fn fail(&mut self, session_id: &str, reason: String) {
        if self.status.is_terminal() {
            return;
        }
        warn!(session_id, reason = %reason, "worker failed");
        self.status = ProcessStatus::Failed;
        self.failure = Some(reason);
    }
}

/// State shared between a worker's tasks and the manager.
#[derive(Debug)]
pub(crate) struct ProcessShared {
    pub session_id: String,
    markers: Arc<MarkerSet>,
    state: Mutex<ProcessState>,
    changed: Notify,
}

impl ProcessShared {
    pub fn new(session_id: String, markers: Arc<MarkerSet>) -> Self {
        Self {
            session_id,
            markers,
            state: Mutex::new(ProcessState::new()),
            changed: Notify::new(),
        }
    }

    /// Lock the state; a poisoned lock still yields the data.
    pub fn lock(&self) -> MutexGuard<'_, ProcessState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply `f` to the state and wake every waiter.
    pub fn update<T>(&self, f: impl FnOnce(&mut ProcessState) -> T) -> T {
        let out = f(&mut self.lock());
        self.changed.notify_waiters();
        out
    }

    /// Wait until `pred` holds for the state.
    pub async fn wait_until(&self, mut pred: impl FnMut(&ProcessState) -> bool) {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if pred(&self.lock()) {
                return;
            }
            notified.await;
        }
    }

    /// Wait up to `limit` for the process to exit; returns whether it did.
    pub async fn wait_exited(&self, limit: Duration) -> bool {
        tokio::time::timeout(limit, self.wait_until(|s| s.exited))
            .await
            .is_ok()
    }

    /// Copy of everything captured from `stream` so far.
    pub fn captured(&self, stream: OutputStream) -> String {
        let state = self.lock();
        match stream {
            OutputStream::Stdout => state.stdout.clone(),
            OutputStream::Stderr => state.stderr.clone(),
        }
    }

    pub fn status(&self) -> ProcessStatus {
        self.lock().status
    }

    pub fn has_exited(&self) -> bool {
        self.lock().exited
    }

    /// Fail with `SessionNotActive` unless injections are accepted.
    pub fn ensure_accepting(&self) -> Result<()> {
        let state = self.lock();
        if state.status.accepts_input() && !state.exited {
            return Ok(());
        }
        let detail = state
            .failure
            .as_deref()
            .map_or_else(String::new, |reason| format!(" ({reason})"));
        Err(AppError::SessionNotActive(format!(
            "session {} is {}{detail}",
            self.session_id, state.status
        )))
    }

    /// Promote `Starting` to `Running`.
    pub fn mark_ready(&self) {
        self.update(|s| {
            if s.status == ProcessStatus::Starting {
                s.transition(&self.session_id, ProcessStatus::Running);
            }
        });
    }

    /// A payload was delivered; a blocked worker is running again.
    pub fn mark_injected(&self) {
        self.update(|s| {
            if s.status == ProcessStatus::Blocked {
                s.transition(&self.session_id, ProcessStatus::Running);
            }
        });
    }

    /// Record a stop request; the process is `Stopped` from now on.
    ///
    /// Returns `false` if a stop had already been requested.
    pub fn mark_stop_requested(&self) -> bool {
        self.update(|s| {
            let first = !s.stop_requested;
            s.stop_requested = true;
            s.transition(&self.session_id, ProcessStatus::Stopped);
            first
        })
    }

    /// Record the process exit reported by the monitor.
    pub fn record_exit(&self, result: std::io::Result<ExitStatus>) {
        self.update(|s| {
            s.exited = true;
            match result {
                Ok(status) => {
                    s.exit_code = status.code();
                    if s.stop_requested || status.success() {
                        info!(session_id = %self.session_id, %status, "worker exited");
                        s.transition(&self.session_id, ProcessStatus::Stopped);
                    } else {
                        let reason = status.code().map_or_else(
                            || "worker terminated by signal".to_owned(),
                            |code| format!("worker exited with code {code}"),
                        );
                        s.fail(&self.session_id, reason);
                    }
                }
                Err(err) => s.fail(&self.session_id, format!("wait error: {err}")),
            }
        });
    }

    pub fn snapshot(&self, pid: Option<u32>, started_at: DateTime<Utc>) -> ProcessSnapshot {
        let state = self.lock();
        ProcessSnapshot {
            session_id: self.session_id.clone(),
            pid,
            started_at,
            status: state.status,
            exit_code: state.exit_code,
            failure: state.failure.clone(),
            stdout_bytes: state.stdout.len(),
            stderr_bytes: state.stderr.len(),
        }
    }
}

impl OutputSink for ProcessShared {
    fn on_line(&self, stream: OutputStream, line: &str) {
        let marker = match stream {
            OutputStream::Stdout => self.markers.classify(line),
            OutputStream::Stderr => None,
        };
        self.update(|s| {
            let buffer = match stream {
                OutputStream::Stdout => &mut s.stdout,
                OutputStream::Stderr => &mut s.stderr,
            };
            buffer.push_str(line);
            buffer.push('\n');

            s.saw_output = true;
            if s.status == ProcessStatus::Starting {
                s.transition(&self.session_id, ProcessStatus::Running);
            }
            if let Some(next) = marker {
                info!(session_id = %self.session_id, status = %next, "worker marker detected");
                s.transition(&self.session_id, next);
            }
        });
    }

    fn on_read_error(&self, stream: OutputStream, reason: &str) {
        self.update(|s| {
            s.fail(
                &self.session_id,
                format!("{} read failed: {reason}", stream.as_str()),
            );
        });
    }

    fn on_closed(&self, _stream: OutputStream) {
        self.update(|s| s.open_streams = s.open_streams.saturating_sub(1));
    }
}

/// Registry entry for one worker: its shared state and task controls.
#[derive(Debug)]
pub(crate) struct ManagedProcess {
    pub shared: Arc<ProcessShared>,
    pub pid: Option<u32>,
    pub started_at: DateTime<Utc>,
    pub writer_tx: mpsc::Sender<WriteRequest>,
    /// Stops the drain tasks.
    pub cancel: CancellationToken,
    /// Stops the writer task, closing the worker's stdin.
    pub close_input: CancellationToken,
    /// Asks the exit monitor to kill the worker.
    pub kill: CancellationToken,
}

impl ManagedProcess {
    /// Queue `frame` on the writer and wait up to `limit` for the ack.
    ///
    /// A frame that times out while queued may still be delivered later.
    pub async fn send(&self, frame: String, limit: Duration) -> Result<()> {
        let session_id = &self.shared.session_id;
        let (request, ack) = WriteRequest::new(frame);

        let delivery = async {
            self.writer_tx.send(request).await.map_err(|_| {
                AppError::SessionNotActive(format!("session {session_id} input is closed"))
            })?;
            ack.await.map_err(|_| {
                AppError::SessionNotActive(format!("session {session_id} write was abandoned"))
            })?
        };

        tokio::time::timeout(limit, delivery)
            .await
            .map_err(|_| {
                AppError::Timeout(format!(
                    "write to session {session_id} did not complete within {limit:?}"
                ))
            })?
    }

    /// Stop every task and kill the worker if it is still alive.
    pub fn abort(&self) {
        self.close_input.cancel();
        self.kill.cancel();
        self.cancel.cancel();
    }
}

impl Drop for ManagedProcess {
    fn drop(&mut self) {
        self.abort();
    }
}

/// Wait for the worker to exit, killing it when `kill` fires, and record the
/// outcome on `shared`.
pub(crate) fn monitor_exit(
    shared: Arc<ProcessShared>,
    mut child: Child,
    kill: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let result = tokio::select! {
            result = child.wait() => result,
            () = kill.cancelled() => {
                info!(session_id = %shared.session_id, "killing worker process");
                if let Err(err) = child.start_kill() {
                    warn!(session_id = %shared.session_id, %err, "failed to kill worker process");
                }
                child.wait().await
            }
        };
        shared.record_exit(result);
    })
}
