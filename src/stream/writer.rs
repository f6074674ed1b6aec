//! Stdin writer task.
//!
//! Each worker has exactly one writer task; every injection for that worker
//! is queued to it through an [`mpsc`] channel, so frames from concurrent
//! callers are written whole and in queue order. The caller learns the
//! outcome of its write through the [`WriteRequest::ack`] channel.
//!
//! When the task ends (cancellation, closed queue, or a failed write) it
//! drops the worker's stdin, which closes the pipe.

use bytes::BytesMut;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::Encoder;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::stream::codec::LineCodec;
use crate::{AppError, Result};

/// One frame to deliver to the worker.
#[derive(Debug)]
pub struct WriteRequest {
    /// Frame text; a single `\n` is appended on the wire.
    pub frame: String,
    /// Receives the write outcome once the frame is flushed or has failed.
    pub ack: oneshot::Sender<Result<()>>,
}

impl WriteRequest {
    /// Build a request and the receiver for its acknowledgement.
    #[must_use]
    pub fn new(frame: String) -> (Self, oneshot::Receiver<Result<()>>) {
        let (ack, rx) = oneshot::channel();
        (Self { frame, ack }, rx)
    }
}

/// Writer task: write queued frames to `stdin` until cancelled.
///
/// Exits cleanly when:
/// - `cancel` is triggered, including while a write is blocked on a full
///   pipe, or
/// - `requests` is closed (all senders dropped).
///
/// Requests still queued when the task stops are acknowledged with
/// `AppError::SessionNotActive`.
///
/// # Errors
///
/// Returns `AppError::SessionNotActive` if a write to `stdin` fails (for
/// example, the worker has exited and the pipe is broken). The failing
/// request is acknowledged with the same error.
pub async fn run_writer<W>(
    session_id: String,
    stdin: W,
    mut requests: mpsc::Receiver<WriteRequest>,
    cancel: CancellationToken,
) -> Result<()>
where
    W: AsyncWrite + Unpin + Send,
{
    let mut stdin = stdin;
    let mut codec = LineCodec::new();
    let mut outcome = Ok(());

    loop {
        let request = tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(session_id, "writer: cancellation received, stopping");
                break;
            }

            request = requests.recv() => {
                let Some(request) = request else {
                    debug!(session_id, "writer: request channel closed, stopping");
                    break;
                };
                request
            }
        };

        let mut buf = BytesMut::new();
        codec.encode(request.frame, &mut buf)?;

        let written = tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(session_id, "writer: cancelled during write, stopping");
                let _ = request.ack.send(Err(AppError::SessionNotActive(
                    "session is stopping".into(),
                )));
                break;
            }

            result = write_frame(&mut stdin, &buf) => result,
        };

        match written {
            Ok(()) => {
                debug!(session_id, bytes = buf.len(), "writer: frame delivered");
                let _ = request.ack.send(Ok(()));
            }
            Err(err) => {
                warn!(session_id, error = %err, "writer: write to stdin failed");
                let message = format!("write to worker stdin failed: {err}");
                let _ = request
                    .ack
                    .send(Err(AppError::SessionNotActive(message.clone())));
                outcome = Err(AppError::SessionNotActive(message));
                break;
            }
        }
    }

    requests.close();
    while let Ok(pending) = requests.try_recv() {
        let _ = pending.ack.send(Err(AppError::SessionNotActive(
            "worker input is closed".into(),
        )));
    }

    outcome
}

async fn write_frame<W>(stdin: &mut W, bytes: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    stdin.write_all(bytes).await?;
    stdin.flush().await
}
