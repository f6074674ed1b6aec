//! Unit tests for the single stdin writer task.

use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use worker_injector::stream::writer::{run_writer, WriteRequest};
use worker_injector::AppError;

#[tokio::test]
async fn frames_are_written_in_order_and_acknowledged() {
    let (stdin, mut worker_side) = tokio::io::duplex(4096);
    let (tx, rx) = mpsc::channel(8);
    let cancel = CancellationToken::new();
    let task = tokio::spawn(run_writer("s1".into(), stdin, rx, cancel.clone()));

    for frame in ["one", "two\nlines", "three"] {
        let (request, ack) = WriteRequest::new(frame.to_owned());
        tx.send(request).await.expect("writer is running");
        ack.await.expect("ack sent").expect("write succeeds");
    }
    drop(tx);
    task.await.expect("no panic").expect("clean exit");

    let mut written = String::new();
    worker_side
        .read_to_string(&mut written)
        .await
        .expect("read written bytes");
    assert_eq!(written, "one\ntwo\nlines\nthree\n");
}

/// A write into a closed pipe fails with `SessionNotActive`.
#[tokio::test]
async fn write_to_closed_pipe_is_session_not_active() {
    let (stdin, worker_side) = tokio::io::duplex(64);
    drop(worker_side);
    let (tx, rx) = mpsc::channel(8);
    let task = tokio::spawn(run_writer("s1".into(), stdin, rx, CancellationToken::new()));

    let (request, ack) = WriteRequest::new("hello".to_owned());
    tx.send(request).await.expect("writer is running");
    let outcome = ack.await.expect("ack sent");
    assert!(matches!(outcome, Err(AppError::SessionNotActive(_))));

    let exit = task.await.expect("no panic");
    assert!(matches!(exit, Err(AppError::SessionNotActive(_))));
}

/// Cancelling a writer blocked on a full pipe releases the caller.
#[tokio::test]
async fn cancel_interrupts_blocked_write() {
    let (stdin, _worker_side) = tokio::io::duplex(16);
    let (tx, rx) = mpsc::channel(8);
    let cancel = CancellationToken::new();
    let task = tokio::spawn(run_writer("s1".into(), stdin, rx, cancel.clone()));

    let (request, ack) = WriteRequest::new("x".repeat(1024));
    tx.send(request).await.expect("writer is running");
    tokio::time::sleep(Duration::from_millis(50)).await;
    cancel.cancel();

    let outcome = tokio::time::timeout(Duration::from_secs(2), ack)
        .await
        .expect("ack arrives after cancel")
        .expect("ack sent");
    assert!(matches!(outcome, Err(AppError::SessionNotActive(_))));
    task.await.expect("no panic").expect("cancel is a clean exit");
}

/// Requests still queued when the writer stops are rejected, not lost.
#[tokio::test]
async fn queued_requests_are_rejected_on_stop() {
    let (stdin, _worker_side) = tokio::io::duplex(16);
    let (tx, rx) = mpsc::channel(8);
    let cancel = CancellationToken::new();
    let task = tokio::spawn(run_writer("s1".into(), stdin, rx, cancel.clone()));

    let (blocking, blocking_ack) = WriteRequest::new("y".repeat(1024));
    let (queued, queued_ack) = WriteRequest::new("z".to_owned());
    tx.send(blocking).await.expect("writer is running");
    tx.send(queued).await.expect("writer is running");
    tokio::time::sleep(Duration::from_millis(50)).await;
    cancel.cancel();

    task.await.expect("no panic").expect("clean exit");
    assert!(blocking_ack.await.expect("ack sent").is_err());
    assert!(matches!(
        queued_ack.await.expect("ack sent"),
        Err(AppError::SessionNotActive(_))
    ));
}
