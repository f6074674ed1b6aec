//! Unit tests for injection payload formatting and validation.

use worker_injector::models::payload::{presets, InjectionPayload, PayloadKind};
use worker_injector::AppError;

// ── Formatting ────────────────────────────────────────────────────────────────

#[test]
fn context_body_has_header_and_text() {
    let payload = InjectionPayload::context("schema v2 is live");
    assert_eq!(
        payload.body(),
        "📋 REAL-TIME CONTEXT UPDATE:\nschema v2 is live"
    );
    assert_eq!(payload.label(), "context");
}

#[test]
fn warning_body_has_header_and_text() {
    let payload = InjectionPayload::warning("disk almost full");
    assert_eq!(payload.body(), "⚠️ WARNING:\ndisk almost full");
}

#[test]
fn block_body_asks_worker_to_adjust() {
    let body = InjectionPayload::block("API down").body();
    assert!(body.starts_with("🚨 BLOCKER - ATTENTION NEEDED:\nAPI down"));
    assert!(body.ends_with("Please review this blocker and adjust your approach."));
}

#[test]
fn progress_body_shows_percentage() {
    let payload = InjectionPayload::progress(42, "halfway-ish").expect("42 is in range");
    assert_eq!(payload.body(), "📊 PROGRESS UPDATE [42%]:\nhalfway-ish");
}

/// Metadata entries render numbered, in insertion order.
#[test]
fn completion_body_keeps_metadata_order() {
    let payload = InjectionPayload::completion(
        "auth module done",
        [("zeta", "last key alphabetically"), ("alpha", "first key")],
    );
    assert_eq!(
        payload.body(),
        "✅ COMPLETION NOTIFICATION:\nauth module done\n\nDetails:\n1. zeta: last key alphabetically\n2. alpha: first key"
    );
}

#[test]
fn completion_without_metadata_has_no_details_section() {
    let payload = InjectionPayload::completion("done", Vec::<(String, String)>::new());
    assert_eq!(payload.body(), "✅ COMPLETION NOTIFICATION:\ndone");
}

#[test]
fn user_prompt_is_injected_verbatim() {
    let payload = InjectionPayload::user_prompt("run the tests");
    assert_eq!(payload.body(), "run the tests");
    assert_eq!(payload.label(), "user_prompt");
}

/// The same payload always renders the same text.
#[test]
fn body_is_deterministic() {
    let payload = InjectionPayload::completion("x", [("k", "v")]);
    assert_eq!(payload.body(), payload.clone().body());
}

// ── Sanitizing ────────────────────────────────────────────────────────────────

#[test]
fn control_characters_are_stripped() {
    let body = InjectionPayload::context("a\u{1b}[31mred\u{7}\tb\r\nc\rd").body();
    assert_eq!(body, "📋 REAL-TIME CONTEXT UPDATE:\na[31mred b\nc\nd");
    assert!(!body.chars().any(|c| c.is_control() && c != '\n'));
}

// ── Validation ────────────────────────────────────────────────────────────────

#[test]
fn progress_bounds_are_inclusive() {
    assert!(InjectionPayload::progress(0, "start").is_ok());
    assert!(InjectionPayload::progress(100, "end").is_ok());
}

#[test]
fn progress_outside_range_is_invalid_payload() {
    for value in [-1, 101, 1_000] {
        let err = InjectionPayload::progress(value, "bad").expect_err("out of range");
        assert!(
            matches!(err, AppError::InvalidPayload(_)),
            "expected InvalidPayload for {value}, got {err:?}"
        );
    }
}

/// JSON input goes through the same validation as the constructors.
#[test]
fn from_json_rejects_out_of_range_progress() {
    let err = InjectionPayload::from_json(r#"{"kind":"progress","percentage":150,"message":"x"}"#)
        .expect_err("150 must be rejected");
    assert!(matches!(err, AppError::InvalidPayload(_)));
}

#[test]
fn from_json_reads_tagged_kind() {
    let payload = InjectionPayload::from_json(r#"{"kind":"warning","text":"careful"}"#)
        .expect("valid payload json");
    assert_eq!(
        payload.kind(),
        &PayloadKind::Warning {
            text: "careful".into()
        }
    );
}

#[test]
fn to_json_uses_snake_case_tag() {
    let json = InjectionPayload::user_prompt("hi").to_json().expect("serializes");
    let value: serde_json::Value = serde_json::from_str(&json).expect("valid json");
    assert_eq!(value["kind"], "user_prompt");
    assert_eq!(value["text"], "hi");
}

// ── Presets ───────────────────────────────────────────────────────────────────

#[test]
fn dependency_completed_lists_insights() {
    let payload = presets::dependency_completed(
        "db-schema",
        "tables created",
        &["use UUID keys".to_owned(), "indexes on email".to_owned()],
    );
    assert_eq!(payload.label(), "context");
    let body = payload.body();
    assert!(body.contains("Upstream dependency 'db-schema' has completed."));
    assert!(body.contains("Key insights:\n- use UUID keys\n- indexes on email"));
}

#[test]
fn test_failed_is_a_blocker() {
    let payload = presets::test_failed("login_works", "expected 200, got 500");
    assert_eq!(payload.label(), "block");
    assert!(payload.body().contains("expected 200, got 500"));
}

#[test]
fn security_warning_names_severity() {
    let payload = presets::security_warning("SQL built by concatenation", "high");
    assert_eq!(payload.label(), "warning");
    assert!(payload.body().contains("found high severity issue"));
}

#[test]
fn task_ready_and_review_feedback_are_context() {
    assert_eq!(presets::task_ready("api", "schema ready").label(), "context");
    let review = presets::code_review_feedback("src/lib.rs", "rename foo");
    assert_eq!(review.label(), "context");
    assert!(review.body().contains("Code review feedback for src/lib.rs"));
}
