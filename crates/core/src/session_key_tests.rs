// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn build_canonical_form() {
    let key = SessionKey::new("kbot", "telegram", PeerKind::User, "u-42").unwrap();
    assert_eq!(key.build(), "agent:kbot:telegram:user:u-42");
}

#[yare::parameterized(
    user_peer    = { "agent:kbot:telegram:user:u-42" },
    channel_peer = { "agent:kbot:slack:channel:C123" },
    colon_peer   = { "agent:kbot:matrix:user:@x:example.org" },
)]
fn round_trips(serialized: &str) {
    let key = SessionKey::parse(serialized).unwrap();
    assert_eq!(key.build(), serialized);
    assert_eq!(SessionKey::parse(&key.build()).unwrap(), key);
}

#[test]
fn round_trip_from_struct() {
    let key = SessionKey::new("kbot", "slack", PeerKind::Channel, "C99").unwrap();
    assert_eq!(SessionKey::parse(&key.build()).unwrap(), key);
}

#[yare::parameterized(
    wrong_prefix  = { "bot:kbot:slack:user:u1" },
    no_prefix     = { "kbot:slack:user:u1" },
)]
fn rejects_bad_prefix(s: &str) {
    assert!(matches!(
        SessionKey::parse(s),
        Err(SessionKeyError::MissingPrefix(_))
    ));
}

#[test]
fn rejects_short_form() {
    assert!(matches!(
        SessionKey::parse("agent:kbot:slack:user"),
        Err(SessionKeyError::SegmentCount(4))
    ));
}

#[yare::parameterized(
    empty_agent    = { "agent::slack:user:u1", "agent" },
    empty_platform = { "agent:kbot::user:u1", "platform" },
    empty_peer     = { "agent:kbot:slack:user:", "peerId" },
)]
fn rejects_empty_segments(s: &str, field: &str) {
    match SessionKey::parse(s) {
        Err(SessionKeyError::EmptySegment(f)) => assert_eq!(f, field),
        other => panic!("expected EmptySegment({field}), got {other:?}"),
    }
}

#[test]
fn rejects_unknown_peer_kind() {
    assert!(matches!(
        SessionKey::parse("agent:kbot:slack:group:g1"),
        Err(SessionKeyError::UnknownPeerKind(k)) if k == "group"
    ));
}

#[test]
fn file_slug_replaces_separators() {
    let key = SessionKey::new("kbot", "slack", PeerKind::User, "u.1").unwrap();
    assert_eq!(key.file_slug(), "agent-kbot-slack-user-u-1");
}

#[test]
fn serde_round_trip() {
    let key = SessionKey::new("kbot", "slack", PeerKind::Channel, "C1").unwrap();
    let json = serde_json::to_string(&key).unwrap();
    assert_eq!(serde_json::from_str::<SessionKey>(&json).unwrap(), key);
}
