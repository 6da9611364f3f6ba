// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn status_serializes_lowercase() {
    assert_eq!(
        serde_json::to_string(&SessionStatus::Completed).unwrap(),
        "\"completed\""
    );
    assert_eq!(SessionStatus::Abandoned.to_string(), "abandoned");
}

#[test]
fn session_round_trips_without_optionals() {
    let session = AgentSession {
        id: SessionId::generate(),
        conversation_id: None,
        agent_type: "coder".to_string(),
        session_key: None,
        status: SessionStatus::Active,
        started_at: 1_000,
        ended_at: None,
    };
    let json = serde_json::to_string(&session).unwrap();
    assert!(!json.contains("conversation_id"));
    assert!(!json.contains("ended_at"));
    assert_eq!(serde_json::from_str::<AgentSession>(&json).unwrap(), session);
}

#[test]
fn is_active_tracks_status() {
    let mut session = AgentSession {
        id: SessionId::new("s"),
        conversation_id: Some(ConversationId::new("c")),
        agent_type: "coder".to_string(),
        session_key: Some("agent:kbot:slack:user:u1".to_string()),
        status: SessionStatus::Active,
        started_at: 0,
        ended_at: None,
    };
    assert!(session.is_active());
    session.status = SessionStatus::Completed;
    assert!(!session.is_active());
}
