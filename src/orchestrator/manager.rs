//! Managed worker sessions: start, inject, stop.
//!
//! The [`SessionManager`] owns a registry of worker processes keyed by
//! session identifier. Each worker gets:
//!
//! - two drain tasks ([`run_output_reader`]) that capture stdout and stderr
//!   until EOF,
//! - one writer task ([`run_writer`]) through which every injection for that
//!   worker is serialized,
//! - one exit monitor that records how the process ended.
//!
//! The registry lock is a `tokio::sync::Mutex` that is only held for map
//! lookups and updates, never across process I/O.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError};
use std::time::Duration;

use chrono::Utc;
use futures_util::future::join_all;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::{InjectorConfig, PromptDelivery};
use crate::models::payload::InjectionPayload;
use crate::models::process::{ProcessSnapshot, ProcessStatus};
use crate::models::session::Session;
use crate::orchestrator::markers::MarkerSet;
use crate::orchestrator::process::{monitor_exit, ManagedProcess, ProcessShared};
use crate::stream::reader::{run_output_reader, OutputSink, OutputStream};
use crate::stream::spawner::{spawn_worker, SpawnConfig};
use crate::stream::writer::run_writer;
use crate::{AppError, Result};

/// Queued injections per worker before senders wait.
const WRITE_QUEUE_DEPTH: usize = 64;

#[derive(Debug, Default)]
struct Registry {
    active: HashMap<String, Arc<ManagedProcess>>,
}

/// Ids whose workers are being launched. Only touched while no `.await` is
/// pending, so a plain mutex suffices.
type Starting = Arc<std::sync::Mutex<HashSet<String>>>;

/// Claim on a session id while its worker starts; released on drop, also
/// when the `start_session` future is cancelled.
#[derive(Debug)]
struct Reservation {
    starting: Starting,
    session_id: String,
}

impl Drop for Reservation {
    fn drop(&mut self) {
        self.starting
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.session_id);
    }
}

/// Timing knobs for the manager.
#[derive(Debug, Clone, Copy)]
struct Timeouts {
    startup_grace: Duration,
    write_timeout: Duration,
    stop_grace: Duration,
}

/// Launches and controls worker processes.
///
/// Cloning is cheap; clones share the same registry.
#[derive(Debug, Clone)]
pub struct SessionManager {
    spawn: Arc<SpawnConfig>,
    markers: Arc<MarkerSet>,
    timeouts: Timeouts,
    registry: Arc<Mutex<Registry>>,
    starting: Starting,
}

impl SessionManager {
    /// Build a manager from configuration.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if a marker pattern does not compile.
    pub fn new(config: &InjectorConfig) -> Result<Self> {
        Ok(Self {
            spawn: Arc::new(SpawnConfig::from(config)),
            markers: Arc::new(config.marker_set()?),
            timeouts: Timeouts {
                startup_grace: config.startup_grace(),
                write_timeout: config.write_timeout(),
                stop_grace: config.stop_grace(),
            },
            registry: Arc::new(Mutex::new(Registry::default())),
            starting: Starting::default(),
        })
    }

    /// Launch a worker for `session` and deliver `initial_prompt`.
    ///
    /// The worker starts in `session.project_path`. The call returns once the
    /// worker has produced output or the startup grace period has elapsed,
    /// whichever comes first.
    ///
    /// # Errors
    ///
    /// - `AppError::AlreadyActive` if the session already has a live worker
    ///   or is being started by another caller.
    /// - `AppError::Spawn` if the worker cannot be launched, rejects its
    ///   initial prompt, or exits before producing any output.
    pub async fn start_session(
        &self,
        session: &Session,
        initial_prompt: Option<String>,
    ) -> Result<String> {
        let session_id = session.session_id.clone();
        let span = info_span!("start_session", session_id = %session_id);

        async move {
            let reservation = self.reserve(&session_id).await?;
            let process = match self.launch(session, initial_prompt).await {
                Ok(process) => process,
                Err(err) => {
                    warn!(%err, "worker failed to start");
                    return Err(err);
                }
            };

            let mut registry = self.registry.lock().await;
            registry
                .active
                .insert(session_id.clone(), Arc::clone(&process));
            drop(reservation);
            drop(registry);

            if let Err(err) = self.await_ready(&process).await {
                self.remove_entry(&session_id, &process).await;
                return Err(err);
            }

            info!(pid = process.pid, "worker session started");
            Ok(session_id)
        }
        .instrument(span)
        .await
    }

    /// Deliver `payload` to the worker's stdin as one newline-terminated
    /// frame.
    ///
    /// Concurrent injections into the same session are written whole, in the
    /// order they were queued. A successful injection returns a `Blocked`
    /// worker to `Running`.
    ///
    /// # Errors
    ///
    /// - `AppError::SessionNotFound` if no worker is registered for
    ///   `session_id`.
    /// - `AppError::SessionNotActive` if the worker is stopped, failed, or
    ///   its stdin is closed.
    /// - `AppError::Timeout` if the write does not complete in time.
    pub async fn inject(&self, session_id: &str, payload: &InjectionPayload) -> Result<()> {
        let process = self.lookup(session_id).await?;
        process.shared.ensure_accepting()?;

        let frame = payload.body();
        let bytes = frame.len();
        process
            .send(frame, self.timeouts.write_timeout)
            .await
            .inspect_err(|err| warn!(session_id, %err, "injection failed"))?;

        process.shared.mark_injected();
        debug!(session_id, kind = payload.label(), bytes, "payload injected");
        Ok(())
    }

    /// Inject `payload` into every active session concurrently.
    ///
    /// One session failing does not affect the others. Results are sorted
    /// by session identifier.
    pub async fn broadcast(&self, payload: &InjectionPayload) -> Vec<(String, Result<()>)> {
        let targets = self.list_active_sessions().await;
        let results = join_all(targets.iter().map(|id| self.inject(id, payload))).await;
        targets.into_iter().zip(results).collect()
    }

    /// Stop the worker for `session_id`.
    ///
    /// Closes the worker's stdin, asks it to terminate, then waits up to the
    /// stop grace period. A worker still alive after the grace period is
    /// killed with `force`; without it the session stays registered as
    /// `Stopped` and takes no more input until it exits or a forced stop
    /// follows. Repeating a non-forced stop returns at once. Stopping an
    /// unknown or already stopped session is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Timeout` if the worker survives a kill.
    pub async fn stop_session(&self, session_id: &str, force: bool) -> Result<()> {
        let span = info_span!("stop_session", session_id, force);

        async move {
            let process = self.registry.lock().await.active.get(session_id).cloned();
            let Some(process) = process else {
                debug!("no worker registered, nothing to stop");
                return Ok(());
            };

            if !process.shared.has_exited() {
                let grace = self.timeouts.stop_grace;
                let first_request = process.shared.mark_stop_requested();
                if first_request {
                    process.close_input.cancel();
                    send_terminate(process.pid);
                } else if !force {
                    debug!("stop already requested");
                    return Ok(());
                }

                let exited = first_request && process.shared.wait_exited(grace).await;
                if !exited {
                    if !force {
                        warn!(?grace, "worker still running after stop grace period");
                        return Ok(());
                    }
                    warn!("worker ignored stop request, killing");
                    process.kill.cancel();
                    if !process.shared.wait_exited(grace).await {
                        return Err(AppError::Timeout(format!(
                            "session {session_id} did not exit after kill"
                        )));
                    }
                }
            }

            self.remove_entry(session_id, &process).await;
            info!(status = %process.shared.status(), "worker session stopped");
            Ok(())
        }
        .instrument(span)
        .await
    }

    /// Stop every registered worker; results are sorted by session id.
    pub async fn stop_all(&self, force: bool) -> Vec<(String, Result<()>)> {
        let mut ids: Vec<String> = self.registry.lock().await.active.keys().cloned().collect();
        ids.sort();
        let results = join_all(ids.iter().map(|id| self.stop_session(id, force))).await;
        ids.into_iter().zip(results).collect()
    }

    /// Whether `session_id` has a live worker that accepts injections.
    pub async fn is_session_active(&self, session_id: &str) -> bool {
        self.lookup(session_id)
            .await
            .is_ok_and(|p| p.shared.ensure_accepting().is_ok())
    }

    /// Identifiers of sessions with live workers, sorted.
    pub async fn list_active_sessions(&self) -> Vec<String> {
        let registry = self.registry.lock().await;
        let mut ids: Vec<String> = registry
            .active
            .iter()
            .filter(|(_, p)| p.shared.ensure_accepting().is_ok())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Snapshots of every registered worker, sorted by session id.
    pub async fn list_snapshots(&self) -> Vec<ProcessSnapshot> {
        let registry = self.registry.lock().await;
        let mut snapshots: Vec<ProcessSnapshot> = registry
            .active
            .values()
            .map(|p| p.shared.snapshot(p.pid, p.started_at))
            .collect();
        snapshots.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        snapshots
    }

    /// Current status of a registered worker.
    ///
    /// # Errors
    ///
    /// Returns `AppError::SessionNotFound` if `session_id` is not registered.
    pub async fn status(&self, session_id: &str) -> Result<ProcessStatus> {
        Ok(self.lookup(session_id).await?.shared.status())
    }

    /// Point-in-time view of a registered worker.
    ///
    /// # Errors
    ///
    /// Returns `AppError::SessionNotFound` if `session_id` is not registered.
    pub async fn snapshot(&self, session_id: &str) -> Result<ProcessSnapshot> {
        let process = self.lookup(session_id).await?;
        Ok(process.shared.snapshot(process.pid, process.started_at))
    }

    /// Everything the worker has written to stdout so far.
    ///
    /// # Errors
    ///
    /// Returns `AppError::SessionNotFound` if `session_id` is not registered.
    pub async fn output(&self, session_id: &str) -> Result<String> {
        let process = self.lookup(session_id).await?;
        Ok(process.shared.captured(OutputStream::Stdout))
    }

    /// Everything the worker has written to stderr so far.
    ///
    /// # Errors
    ///
    /// Returns `AppError::SessionNotFound` if `session_id` is not registered.
    pub async fn error_output(&self, session_id: &str) -> Result<String> {
        let process = self.lookup(session_id).await?;
        Ok(process.shared.captured(OutputStream::Stderr))
    }

    /// Wait until the worker's stdout contains `needle`; returns the stdout
    /// captured at that point.
    ///
    /// # Errors
    ///
    /// - `AppError::SessionNotFound` if `session_id` is not registered.
    /// - `AppError::Timeout` if `needle` does not appear within `limit`.
    pub async fn wait_for_output(
        &self,
        session_id: &str,
        needle: &str,
        limit: Duration,
    ) -> Result<String> {
        let process = self.lookup(session_id).await?;
        tokio::time::timeout(
            limit,
            process.shared.wait_until(|s| s.stdout.contains(needle)),
        )
        .await
        .map_err(|_| {
            AppError::Timeout(format!(
                "session {session_id} did not print {needle:?} within {limit:?}"
            ))
        })?;
        Ok(process.shared.captured(OutputStream::Stdout))
    }

    /// Drop registry entries whose workers have exited; returns their ids.
    pub async fn cleanup_finished(&self) -> Vec<String> {
        let mut registry = self.registry.lock().await;
        let mut finished: Vec<String> = registry
            .active
            .iter()
            .filter(|(_, p)| p.shared.has_exited())
            .map(|(id, _)| id.clone())
            .collect();
        for id in &finished {
            registry.active.remove(id);
        }
        drop(registry);

        finished.sort();
        if !finished.is_empty() {
            info!(count = finished.len(), "removed finished worker sessions");
        }
        finished
    }

    // ── Private helpers ──────────────────────────────────────────────────────

    async fn lookup(&self, session_id: &str) -> Result<Arc<ManagedProcess>> {
        self.registry
            .lock()
            .await
            .active
            .get(session_id)
            .cloned()
            .ok_or_else(|| AppError::SessionNotFound(format!("no worker for session {session_id}")))
    }

    /// Claim `session_id` for a new worker.
    ///
    /// A registered worker that is stopped or failed is replaced; one that
    /// still runs (or is being started) rejects the claim.
    async fn reserve(&self, session_id: &str) -> Result<Reservation> {
        let mut registry = self.registry.lock().await;
        let mut starting = self.starting.lock().unwrap_or_else(PoisonError::into_inner);
        if starting.contains(session_id) {
            return Err(AppError::AlreadyActive(format!(
                "session {session_id} is already starting"
            )));
        }
        if let Some(existing) = registry.active.get(session_id) {
            let status = existing.shared.status();
            if !status.is_terminal() && !existing.shared.has_exited() {
                return Err(AppError::AlreadyActive(format!(
                    "session {session_id} already has a {status} worker"
                )));
            }
            debug!(session_id, %status, "replacing finished worker");
            registry.active.remove(session_id);
        }
        starting.insert(session_id.to_owned());
        Ok(Reservation {
            starting: Arc::clone(&self.starting),
            session_id: session_id.to_owned(),
        })
    }

    /// Spawn the worker, start its tasks, and deliver the initial prompt.
    async fn launch(
        &self,
        session: &Session,
        initial_prompt: Option<String>,
    ) -> Result<Arc<ManagedProcess>> {
        let session_id = session.session_id.clone();
        let connection = spawn_worker(
            &self.spawn,
            &session_id,
            &session.project_path,
            initial_prompt.as_deref(),
        )?;

        let shared = Arc::new(ProcessShared::new(
            session_id.clone(),
            Arc::clone(&self.markers),
        ));
        let cancel = CancellationToken::new();
        let close_input = cancel.child_token();
        let kill = CancellationToken::new();
        let (writer_tx, writer_rx) = mpsc::channel(WRITE_QUEUE_DEPTH);

        let sink: Arc<dyn OutputSink> = shared.clone();
        tokio::spawn(
            run_output_reader(
                session_id.clone(),
                OutputStream::Stdout,
                connection.stdout,
                Arc::clone(&sink),
                cancel.clone(),
            )
            .in_current_span(),
        );
        tokio::spawn(
            run_output_reader(
                session_id.clone(),
                OutputStream::Stderr,
                connection.stderr,
                sink,
                cancel.clone(),
            )
            .in_current_span(),
        );

        let writer_id = session_id.clone();
        let writer_cancel = close_input.clone();
        let stdin = connection.stdin;
        tokio::spawn(
            async move {
                if let Err(err) =
                    run_writer(writer_id.clone(), stdin, writer_rx, writer_cancel).await
                {
                    debug!(session_id = %writer_id, %err, "writer task ended with error");
                }
            }
            .in_current_span(),
        );

        monitor_exit(Arc::clone(&shared), connection.child, kill.clone());

        let process = Arc::new(ManagedProcess {
            shared,
            pid: connection.pid,
            started_at: Utc::now(),
            writer_tx,
            cancel,
            close_input,
            kill,
        });

        if self.spawn.prompt_delivery == PromptDelivery::Stdin {
            if let Some(prompt) = initial_prompt {
                let frame = InjectionPayload::user_prompt(prompt).body();
                if let Err(err) = process.send(frame, self.timeouts.write_timeout).await {
                    process.abort();
                    return Err(AppError::Spawn(format!(
                        "worker did not accept its initial prompt: {err}"
                    )));
                }
            }
        }

        Ok(process)
    }

    /// Wait for the first output or the startup grace period.
    async fn await_ready(&self, process: &ManagedProcess) -> Result<()> {
        let grace = self.timeouts.startup_grace;
        let _ = tokio::time::timeout(
            grace,
            process
                .shared
                .wait_until(|s| s.saw_output || (s.exited && s.open_streams == 0)),
        )
        .await;

        let state = process.shared.lock();
        if state.exited && !state.saw_output {
            let reason = state
                .failure
                .clone()
                .unwrap_or_else(|| "worker exited without output".to_owned());
            return Err(AppError::Spawn(format!(
                "worker exited before becoming ready: {reason}"
            )));
        }
        drop(state);

        process.shared.mark_ready();
        Ok(())
    }

    /// Remove `session_id` if it still maps to `process`, and stop its tasks.
    async fn remove_entry(&self, session_id: &str, process: &Arc<ManagedProcess>) {
        let mut registry = self.registry.lock().await;
        if registry
            .active
            .get(session_id)
            .is_some_and(|current| Arc::ptr_eq(current, process))
        {
            registry.active.remove(session_id);
        }
        drop(registry);
        process.abort();
    }
}

/// Ask the worker to terminate (`SIGTERM` on unix).
#[cfg(unix)]
fn send_terminate(pid: Option<u32>) {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Some(raw) = pid.and_then(|p| i32::try_from(p).ok()) else {
        return;
    };
    match kill(Pid::from_raw(raw), Signal::SIGTERM) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(err) => warn!(pid = raw, %err, "failed to signal worker"),
    }
}

/// Closing stdin is the only polite stop request available here.
#[cfg(not(unix))]
fn send_terminate(_pid: Option<u32>) {}
