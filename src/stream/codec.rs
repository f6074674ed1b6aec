//! Line framing for worker stdio.
//!
//! Output from a worker is arbitrary text: it may not be valid UTF-8 and a
//! single line may be huge. [`LineCodec`] therefore decodes lossily and
//! splits lines longer than [`MAX_LINE_BYTES`] into several items instead of
//! failing, so a misbehaving worker can never stop its output from being
//! drained.
//!
//! # Usage
//!
//! Use [`LineCodec`] with [`tokio_util::codec::FramedRead`] for the worker's
//! stdout/stderr, and its [`Encoder`] impl to frame injected payloads.
//!
//! ```rust,ignore
//! use tokio_util::codec::FramedRead;
//! use worker_injector::stream::codec::LineCodec;
//!
//! let reader = FramedRead::new(child_stdout, LineCodec::new());
//! ```

use bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Maximum bytes emitted as one decoded item: 1 MiB.
///
/// Longer lines are emitted in consecutive chunks of at most this size.
pub const MAX_LINE_BYTES: usize = 1_048_576;

/// Newline-delimited text codec.
#[derive(Debug, Clone)]
pub struct LineCodec {
    max_length: usize,
    /// Bytes of the buffer already searched for a newline.
    next_index: usize,
}

impl LineCodec {
    /// Codec with the default [`MAX_LINE_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_length(MAX_LINE_BYTES)
    }

    /// Codec with a custom chunk limit (at least one byte).
    #[must_use]
    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            max_length: max_length.max(1),
            next_index: 0,
        }
    }
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = std::io::Error;

    /// Decode the next line (without its `\n` or trailing `\r`).
    ///
    /// Returns `Ok(None)` while no complete line and fewer than
    /// `max_length` bytes are buffered.
    fn decode(&mut self, src: &mut BytesMut) -> std::io::Result<Option<String>> {
        let search_end = src.len().min(self.max_length + 1);
        let newline = src[self.next_index.min(search_end)..search_end]
            .iter()
            .position(|b| *b == b'\n')
            .map(|offset| offset + self.next_index.min(search_end));

        if let Some(pos) = newline {
            self.next_index = 0;
            let line = src.split_to(pos + 1);
            return Ok(Some(to_text(&line[..pos])));
        }

        if src.len() >= self.max_length {
            self.next_index = 0;
            let chunk = src.split_to(self.max_length);
            return Ok(Some(to_text(&chunk)));
        }

        self.next_index = src.len();
        Ok(None)
    }

    /// Flush a final unterminated line when the stream ends.
    fn decode_eof(&mut self, src: &mut BytesMut) -> std::io::Result<Option<String>> {
        if let Some(line) = self.decode(src)? {
            return Ok(Some(line));
        }
        self.next_index = 0;
        if src.is_empty() {
            Ok(None)
        } else {
            let rest = src.split();
            Ok(Some(to_text(&rest)))
        }
    }
}

impl Encoder<String> for LineCodec {
    type Error = std::io::Error;

    /// Encode `item` followed by a single `\n`.
    ///
    /// The length limit applies only to decoding.
    fn encode(&mut self, item: String, dst: &mut BytesMut) -> std::io::Result<()> {
        dst.reserve(item.len() + 1);
        dst.put(item.as_bytes());
        dst.put_u8(b'\n');
        Ok(())
    }
}

fn to_text(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}
