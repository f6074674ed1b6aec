//! Unit tests for the worker stdio line codec.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use worker_injector::stream::codec::{LineCodec, MAX_LINE_BYTES};

#[test]
fn decodes_one_line_without_terminator() {
    let mut codec = LineCodec::new();
    let mut buf = BytesMut::from("hello world\n");

    let line = codec.decode(&mut buf).expect("decode succeeds");
    assert_eq!(line.as_deref(), Some("hello world"));
    assert!(buf.is_empty());
}

#[test]
fn batched_lines_decode_one_by_one() {
    let mut codec = LineCodec::new();
    let mut buf = BytesMut::from("one\ntwo\r\nthree\n");

    let mut lines = Vec::new();
    while let Some(line) = codec.decode(&mut buf).expect("decode succeeds") {
        lines.push(line);
    }
    assert_eq!(lines, vec!["one", "two", "three"]);
}

/// A line split across reads is emitted only once its newline arrives.
#[test]
fn partial_line_waits_for_newline() {
    let mut codec = LineCodec::new();
    let mut buf = BytesMut::from("TASK COM");
    assert_eq!(codec.decode(&mut buf).expect("decode succeeds"), None);

    buf.extend_from_slice(b"PLETE\nrest");
    assert_eq!(
        codec.decode(&mut buf).expect("decode succeeds").as_deref(),
        Some("TASK COMPLETE")
    );
    assert_eq!(codec.decode(&mut buf).expect("decode succeeds"), None);
}

#[test]
fn final_unterminated_line_is_flushed_at_eof() {
    let mut codec = LineCodec::new();
    let mut buf = BytesMut::from("last words");

    assert_eq!(
        codec.decode_eof(&mut buf).expect("eof decode succeeds").as_deref(),
        Some("last words")
    );
    assert_eq!(codec.decode_eof(&mut buf).expect("eof decode succeeds"), None);
}

#[test]
fn empty_lines_are_preserved() {
    let mut codec = LineCodec::new();
    let mut buf = BytesMut::from("\n\nx\n");
    assert_eq!(codec.decode(&mut buf).expect("ok").as_deref(), Some(""));
    assert_eq!(codec.decode(&mut buf).expect("ok").as_deref(), Some(""));
    assert_eq!(codec.decode(&mut buf).expect("ok").as_deref(), Some("x"));
}

/// Invalid UTF-8 is replaced rather than failing the stream.
#[test]
fn invalid_utf8_is_decoded_lossily() {
    let mut codec = LineCodec::new();
    let mut buf = BytesMut::from(&b"ok \xff\xfe bytes\n"[..]);
    let line = codec.decode(&mut buf).expect("decode succeeds").expect("one line");
    assert!(line.starts_with("ok "));
    assert!(line.ends_with(" bytes"));
    assert!(line.contains('\u{FFFD}'));
}

/// Lines longer than the limit are split into chunks instead of erroring.
#[test]
fn overlong_line_is_chunked() {
    let mut codec = LineCodec::with_max_length(4);
    let mut buf = BytesMut::from("abcdefghij\nk\n");

    let mut lines = Vec::new();
    while let Some(line) = codec.decode(&mut buf).expect("decode succeeds") {
        lines.push(line);
    }
    assert_eq!(lines, vec!["abcd", "efgh", "ij", "k"]);
}

#[test]
fn default_limit_is_one_mebibyte() {
    assert_eq!(MAX_LINE_BYTES, 1024 * 1024);
    let mut codec = LineCodec::default();
    let mut buf = BytesMut::from(vec![b'a'; MAX_LINE_BYTES + 10].as_slice());

    let first = codec.decode(&mut buf).expect("decode succeeds").expect("chunk");
    assert_eq!(first.len(), MAX_LINE_BYTES);
    assert_eq!(codec.decode(&mut buf).expect("decode succeeds"), None);
    assert_eq!(buf.len(), 10);
}

#[test]
fn encode_appends_single_newline() {
    let mut codec = LineCodec::new();
    let mut buf = BytesMut::new();
    codec
        .encode("📋 REAL-TIME CONTEXT UPDATE:\nhi".to_owned(), &mut buf)
        .expect("encode succeeds");
    assert_eq!(&buf[..], "📋 REAL-TIME CONTEXT UPDATE:\nhi\n".as_bytes());
}
