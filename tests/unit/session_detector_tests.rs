//! Unit tests for session discovery over a temporary session-log tree.

use std::fs;
use std::path::{Path, PathBuf};

use worker_injector::discovery::session_detector::{decode_project_path, SessionDetector};
use worker_injector::AppError;

fn record(ts: &str, text: &str, cwd: &str) -> String {
    serde_json::json!({
        "type": "user",
        "timestamp": ts,
        "cwd": cwd,
        "message": { "role": "user", "content": text }
    })
    .to_string()
}

fn write_log(root: &Path, project: &str, session: &str, lines: &[String]) -> PathBuf {
    let dir = root.join(project);
    fs::create_dir_all(&dir).expect("create project dir");
    let path = dir.join(format!("{session}.jsonl"));
    let mut content = lines.join("\n");
    content.push('\n');
    fs::write(&path, content).expect("write log");
    path
}

// ── list_projects ─────────────────────────────────────────────────────────────

#[test]
fn missing_root_is_storage_unavailable() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let detector = SessionDetector::new(tmp.path().join("nope"));
    let err = detector.list_projects().expect_err("root is missing");
    assert!(matches!(err, AppError::StorageUnavailable(_)));
}

#[test]
fn projects_are_sorted_directories() {
    let tmp = tempfile::tempdir().expect("tempdir");
    fs::create_dir(tmp.path().join("-work-b")).expect("mkdir");
    fs::create_dir(tmp.path().join("-work-a")).expect("mkdir");
    fs::write(tmp.path().join("stray.txt"), "x").expect("write");

    let projects = SessionDetector::new(tmp.path()).list_projects().expect("list");
    assert_eq!(projects, vec!["-work-a".to_owned(), "-work-b".to_owned()]);
}

// ── get_project_sessions ──────────────────────────────────────────────────────

/// A log written with N records reads back with N records and the expected
/// metadata.
#[test]
fn written_log_reads_back() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let lines: Vec<String> = (0..5)
        .map(|i| record(&format!("2024-05-01T10:0{i}:00Z"), &format!("message {i}"), "/work/app"))
        .collect();
    let path = write_log(tmp.path(), "-work-app", "abc-123", &lines);

    let sessions = SessionDetector::new(tmp.path())
        .get_project_sessions("-work-app")
        .expect("project readable");

    assert_eq!(sessions.len(), 1);
    let session = &sessions[0];
    assert_eq!(session.session_id, "abc-123");
    assert_eq!(session.project_id, "-work-app");
    assert_eq!(session.project_path, PathBuf::from("/work/app"));
    assert_eq!(session.record_count, 5);
    assert_eq!(session.first_message.as_deref(), Some("message 0"));
    assert_eq!(session.log_path, path);
    assert!(session.created_at < session.last_active_at);
    assert!(session.parse_warnings.is_empty());
}

/// One corrupt file among valid ones never fails the listing.
#[test]
fn corrupt_file_is_skipped() {
    let tmp = tempfile::tempdir().expect("tempdir");
    write_log(
        tmp.path(),
        "proj",
        "good-1",
        &[record("2024-05-01T10:00:00Z", "one", "/w")],
    );
    write_log(
        tmp.path(),
        "proj",
        "good-2",
        &[record("2024-05-02T10:00:00Z", "two", "/w")],
    );
    write_log(tmp.path(), "proj", "bad", &["{{{{".to_owned(), "nope".to_owned()]);

    let sessions = SessionDetector::new(tmp.path())
        .get_project_sessions("proj")
        .expect("project readable");

    let ids: Vec<&str> = sessions.iter().map(|s| s.session_id.as_str()).collect();
    assert_eq!(ids, vec!["good-2", "good-1"], "newest activity first");
}

#[test]
fn bad_lines_become_parse_warnings() {
    let tmp = tempfile::tempdir().expect("tempdir");
    write_log(
        tmp.path(),
        "proj",
        "mixed",
        &[
            record("2024-05-01T10:00:00Z", "one", "/w"),
            "garbage".to_owned(),
            record("2024-05-01T10:01:00Z", "two", "/w"),
        ],
    );

    let sessions = SessionDetector::new(tmp.path())
        .get_project_sessions("proj")
        .expect("project readable");
    assert_eq!(sessions[0].record_count, 2);
    assert_eq!(sessions[0].parse_warnings.len(), 1);
    assert_eq!(sessions[0].parse_warnings[0].line, 2);
}

#[test]
fn non_log_files_are_ignored() {
    let tmp = tempfile::tempdir().expect("tempdir");
    write_log(tmp.path(), "proj", "s1", &[record("2024-05-01T10:00:00Z", "x", "/w")]);
    fs::write(tmp.path().join("proj").join("notes.txt"), "hello").expect("write");

    let sessions = SessionDetector::new(tmp.path())
        .get_project_sessions("proj")
        .expect("project readable");
    assert_eq!(sessions.len(), 1);
}

#[test]
fn missing_project_is_storage_unavailable() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let err = SessionDetector::new(tmp.path())
        .get_project_sessions("ghost")
        .expect_err("no such project");
    assert!(matches!(err, AppError::StorageUnavailable(_)));
}

#[test]
fn path_like_project_id_is_rejected() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let err = SessionDetector::new(tmp.path())
        .get_project_sessions("../etc")
        .expect_err("not a plain name");
    assert!(matches!(err, AppError::StorageUnavailable(_)));
}

/// Without a recorded `cwd`, the project path is decoded from the directory
/// name.
#[test]
fn project_path_falls_back_to_directory_name() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let line = serde_json::json!({
        "type": "user",
        "timestamp": "2024-05-01T10:00:00Z",
        "message": { "role": "user", "content": "hi" }
    })
    .to_string();
    write_log(tmp.path(), "-home-me-app", "s1", &[line]);

    let sessions = SessionDetector::new(tmp.path())
        .get_project_sessions("-home-me-app")
        .expect("project readable");
    assert_eq!(sessions[0].project_path, PathBuf::from("/home/me/app"));
    assert_eq!(decode_project_path("-srv-x"), PathBuf::from("/srv/x"));
}

// ── get_all_sessions / lookups ────────────────────────────────────────────────

#[test]
fn all_sessions_omits_empty_projects() {
    let tmp = tempfile::tempdir().expect("tempdir");
    write_log(tmp.path(), "a", "s1", &[record("2024-05-01T10:00:00Z", "x", "/a")]);
    write_log(tmp.path(), "b", "s2", &[record("2024-05-01T10:00:00Z", "y", "/b")]);
    fs::create_dir(tmp.path().join("empty")).expect("mkdir");

    let all = SessionDetector::new(tmp.path())
        .get_all_sessions()
        .expect("root readable");
    assert_eq!(all.keys().cloned().collect::<Vec<_>>(), vec!["a", "b"]);
}

#[test]
fn find_session_searches_every_project() {
    let tmp = tempfile::tempdir().expect("tempdir");
    write_log(tmp.path(), "a", "s1", &[record("2024-05-01T10:00:00Z", "x", "/a")]);
    write_log(tmp.path(), "b", "s2", &[record("2024-05-01T10:00:00Z", "y", "/b")]);
    let detector = SessionDetector::new(tmp.path());

    let found = detector.find_session("s2").expect("root readable");
    assert_eq!(found.map(|s| s.project_id), Some("b".to_owned()));
    assert!(detector.find_session("s9").expect("root readable").is_none());
}

#[test]
fn latest_session_for_path_picks_most_recent() {
    let tmp = tempfile::tempdir().expect("tempdir");
    write_log(tmp.path(), "p", "old", &[record("2024-05-01T10:00:00Z", "x", "/w")]);
    write_log(tmp.path(), "p", "new", &[record("2024-06-01T10:00:00Z", "y", "/w")]);
    write_log(tmp.path(), "q", "other", &[record("2024-07-01T10:00:00Z", "z", "/elsewhere")]);

    let latest = SessionDetector::new(tmp.path())
        .latest_session_for_path(Path::new("/w"))
        .expect("root readable");
    assert_eq!(latest.map(|s| s.session_id), Some("new".to_owned()));
}

// ── Preview ───────────────────────────────────────────────────────────────────

#[test]
fn preview_is_one_truncated_line() {
    let mut session = worker_injector::models::session::Session::ad_hoc("/work/app");
    assert_eq!(session.preview(10), None);

    session.first_message = Some("fix the parser".into());
    assert_eq!(session.preview(40).as_deref(), Some("fix the parser"));
    assert_eq!(session.preview(7).as_deref(), Some("fix the…"));

    session.first_message = Some("first line\nsecond line".into());
    assert_eq!(session.preview(40).as_deref(), Some("first line…"));
}
