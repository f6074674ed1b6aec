//! Output drain task.
//!
//! Reads a worker's stdout or stderr line by line through [`LineCodec`] and
//! hands every line to an [`OutputSink`]. The task reads until EOF no matter
//! what the sink does with the lines, so a worker can never block on a full
//! pipe.

use std::sync::Arc;

use futures_util::StreamExt;
use tokio::io::AsyncRead;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::stream::codec::LineCodec;

/// Which of the worker's output pipes a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    /// Standard output.
    Stdout,
    /// Standard error.
    Stderr,
}

impl OutputStream {
    /// Lowercase name for log fields.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        }
    }
}

/// Receiver of drained output.
///
/// Implementations must not block: they run inline on the drain task.
pub trait OutputSink: Send + Sync {
    /// A complete line (without its terminator) arrived on `stream`.
    fn on_line(&self, stream: OutputStream, line: &str);

    /// Reading `stream` failed; no further lines will arrive on it.
    fn on_read_error(&self, stream: OutputStream, reason: &str);

    /// The drain task for `stream` has stopped.
    fn on_closed(&self, stream: OutputStream);
}

/// Drain `source` into `sink` until EOF, a read error, or `cancel`.
///
/// A final line without a trailing newline is delivered at EOF. Read errors
/// are reported once through [`OutputSink::on_read_error`] and end the task.
/// [`OutputSink::on_closed`] is called last, however the task ends.
pub async fn run_output_reader<R>(
    session_id: String,
    stream: OutputStream,
    source: R,
    sink: Arc<dyn OutputSink>,
    cancel: CancellationToken,
) where
    R: AsyncRead + Unpin + Send,
{
    let mut framed = FramedRead::new(source, LineCodec::new());
    let stream_name = stream.as_str();

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(session_id, stream = stream_name, "output reader: cancellation received, stopping");
                break;
            }

            item = framed.next() => {
                match item {
                    None => {
                        debug!(session_id, stream = stream_name, "output reader: EOF detected");
                        break;
                    }
                    Some(Err(err)) => {
                        warn!(session_id, stream = stream_name, error = %err, "output reader: IO error, stopping");
                        sink.on_read_error(stream, &err.to_string());
                        break;
                    }
                    Some(Ok(line)) => {
                        trace!(session_id, stream = stream_name, line = %line, "worker output");
                        sink.on_line(stream, &line);
                    }
                }
            }
        }
    }

    sink.on_closed(stream);
}
