//! Unit tests for the wire envelope.

use serde_json::json;

use interview_link::models::envelope::{control, Envelope};
use interview_link::AppError;

#[test]
fn outbound_envelope_is_stamped() {
    let envelope = Envelope::new("answer_draft", json!({ "text": "hi" }));
    let wire: serde_json::Value = serde_json::from_str(&envelope.to_json().unwrap()).unwrap();

    assert_eq!(wire["type"], "answer_draft");
    assert_eq!(wire["data"]["text"], "hi");
    assert!(wire["timestamp"].as_str().unwrap().ends_with('Z'));
    assert_eq!(wire["message_id"].as_str().unwrap().len(), 36);
}

#[test]
fn authenticate_carries_the_token() {
    let envelope = Envelope::authenticate("tok");
    assert_eq!(envelope.kind, control::AUTHENTICATE);
    assert_eq!(envelope.data["token"], "tok");
}

#[test]
fn parse_accepts_minimal_frames() {
    let envelope = Envelope::parse(r#"{"type":"authenticated"}"#).unwrap();
    assert_eq!(envelope.kind, "authenticated");
    assert!(envelope.data.is_null());
    assert!(envelope.message_id.is_none());
    assert!(envelope.is_control());
}

#[test]
fn numeric_ping_timestamp_is_echoed_in_pong() {
    let ping = Envelope::parse(r#"{"type":"ping","timestamp":1712345.25}"#).unwrap();
    let pong = Envelope::pong(&ping);

    assert_eq!(pong.kind, control::PONG);
    assert!(pong.data["ping_timestamp"].is_number());
    assert_eq!(pong.data["ping_timestamp"], 1_712_345.25);
}

#[test]
fn string_ping_timestamp_is_echoed_as_string() {
    let ping = Envelope::parse(r#"{"type":"ping","timestamp":"2024-05-01T10:00:00Z"}"#).unwrap();
    let pong = Envelope::pong(&ping);

    assert_eq!(pong.data["ping_timestamp"], "2024-05-01T10:00:00Z");
}

#[test]
fn parse_rejects_garbage_and_empty_type() {
    assert!(matches!(Envelope::parse("not json"), Err(AppError::Protocol(_))));
    assert!(matches!(Envelope::parse(r#"{"data":{}}"#), Err(AppError::Protocol(_))));
    assert!(matches!(Envelope::parse(r#"{"type":""}"#), Err(AppError::Protocol(_))));
}

#[test]
fn reason_prefers_message_then_reason() {
    let with_message = Envelope::new("error", json!({ "message": "boom", "reason": "other" }));
    let with_reason = Envelope::new("auth_failed", json!({ "reason": "expired" }));
    let bare = Envelope::new("error", json!("plain"));

    assert_eq!(with_message.reason(), "boom");
    assert_eq!(with_reason.reason(), "expired");
    assert_eq!(bare.reason(), "\"plain\"");
}

#[test]
fn reserved_types_are_recognised() {
    for kind in ["authenticate", "authenticated", "auth_failed", "error", "ping", "pong"] {
        assert!(control::is_reserved(kind), "{kind} should be reserved");
    }
    assert!(!control::is_reserved("notification"));
}
