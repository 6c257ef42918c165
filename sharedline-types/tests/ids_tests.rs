use sharedline_types::{ParticipantId, RoomCode, StrokeKey};
use std::collections::HashSet;
use std::str::FromStr;

// ── ParticipantId ─────────────────────────────────────────────────

#[test]
fn participant_id_generate_is_unique() {
    let a = ParticipantId::generate();
    let b = ParticipantId::generate();
    assert_ne!(a, b);
}

#[test]
fn participant_id_orders_lexicographically() {
    let x = ParticipantId::new("device-x");
    let y = ParticipantId::new("device-y");
    assert!(x < y);
    assert_eq!(x.cmp(&x), std::cmp::Ordering::Equal);
}

#[test]
fn participant_id_parse_rejects_empty_and_paths() {
    assert!(ParticipantId::parse("").is_err());
    assert!(ParticipantId::parse("a/b").is_err());
    assert!(ParticipantId::parse("a.b").is_err());
    assert!(ParticipantId::parse("abc123").is_ok());
}

#[test]
fn participant_id_from_str_and_display() {
    let id = ParticipantId::from_str("uid-42").unwrap();
    assert_eq!(id.to_string(), "uid-42");
    assert_eq!(id.as_str(), "uid-42");
}

#[test]
fn participant_id_serializes_transparently() {
    let id = ParticipantId::new("uid-1");
    let json = serde_json::to_string(&id).unwrap();
    assert_eq!(json, "\"uid-1\"");
}

// ── RoomCode / StrokeKey ──────────────────────────────────────────

#[test]
fn room_codes_are_time_ordered() {
    let first = RoomCode::generate();
    let second = RoomCode::generate();
    assert!(first < second);
    assert_eq!(first.as_str().len(), 20);
}

#[test]
fn stroke_keys_are_unique() {
    let keys: HashSet<StrokeKey> = (0..500).map(|_| StrokeKey::generate()).collect();
    assert_eq!(keys.len(), 500);
}

#[test]
fn room_code_parse_rejects_separators() {
    assert!(RoomCode::parse("rooms/abc").is_err());
    assert_eq!(RoomCode::parse("-Nabc").unwrap().as_str(), "-Nabc");
}
