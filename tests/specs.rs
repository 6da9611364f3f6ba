// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Workspace-level scenario tests.
//!
//! Exercises the cross-crate paths end to end with fake adapters: message
//! orchestration, rotation, reconstruction, idempotent turns, and the
//! usage-probe fallback. Component-level edges live in each crate's own
//! test modules.

use kbot_adapters::{FakeAcp, FakeChatAdapter, SessionUpdate};
use kbot_core::test_support::{direct_message, session_key};
use kbot_core::{
    ContextUsageUpdate, EventBody, FakeClock, MessageChunkData, SessionId, SessionKey,
};
use kbot_engine::{
    Bot, BotConfig, BotDeps, ContextRestorer, ContextUsageTracker, EngineEvent, EventBus,
    RestorerConfig, SelectorConfig, SessionLifecycleConfig, SessionLifecycleManager,
    SummaryProvider, ToolSummarizer, TurnSelector, UsageConfig,
};
use kbot_storage::{
    AppendEvent, ConversationStore, CreateSession, ReconstructOptions, SessionStore,
    TurnReconstructor,
};
use std::sync::Arc;
use std::time::Duration;

struct NoSummary;

#[async_trait::async_trait]
impl SummaryProvider for NoSummary {
    async fn summarize(&self, turns: &[kbot_core::Turn]) -> Result<String, String> {
        Ok(format!("{} archived turns", turns.len()))
    }
}

struct World {
    _dir: tempfile::TempDir,
    bot: Bot<FakeAcp, FakeChatAdapter, FakeClock, NoSummary>,
    acp: FakeAcp,
    chat: FakeChatAdapter,
    bus: EventBus,
    manager: Arc<SessionLifecycleManager<FakeClock>>,
    sessions: Arc<SessionStore<FakeClock>>,
    conversations: Arc<ConversationStore<FakeClock>>,
}

fn world() -> World {
    let dir = tempfile::tempdir().expect("tempdir");
    let clock = FakeClock::new();
    let bus = EventBus::new();
    let acp = FakeAcp::new();
    let chat = FakeChatAdapter::new();

    let sessions = Arc::new(SessionStore::new(dir.path(), clock.clone()));
    let conversations =
        Arc::new(ConversationStore::open(dir.path(), clock.clone()).expect("open conversations"));
    let manager = Arc::new(SessionLifecycleManager::new(
        SessionLifecycleConfig::default(),
        bus.clone(),
        Arc::clone(&sessions),
    ));
    let usage = Arc::new(ContextUsageTracker::new(
        UsageConfig {
            timeout: Duration::from_millis(30),
            debounce_interval: Duration::from_secs(600),
        },
        clock.clone(),
        bus.clone(),
    ));
    let restorer = ContextRestorer::new(
        RestorerConfig::new(dir.path()),
        TurnSelector::new(
            Arc::new(TurnReconstructor::new(Arc::clone(&sessions))),
            ToolSummarizer::new(),
            SelectorConfig::default(),
        ),
        NoSummary,
    );

    let bot = Bot::new(
        BotConfig::default(),
        BotDeps {
            acp: acp.clone(),
            chat: chat.clone(),
            clock,
            bus: bus.clone(),
            sessions: Arc::clone(&sessions),
            conversations: Arc::clone(&conversations),
            manager: Arc::clone(&manager),
            usage,
            restorer,
        },
    );

    World {
        _dir: dir,
        bot,
        acp,
        chat,
        bus,
        manager,
        sessions,
        conversations,
    }
}

async fn preload_usage(world: &World, key: &SessionKey, percentage: f64) {
    world
        .manager
        .update_context_usage(
            key,
            ContextUsageUpdate {
                model: "opus".to_string(),
                used_tokens: (percentage * 200_000.0) as u64,
                max_tokens: 200_000,
                percentage,
                categories: Vec::new(),
                captured_at_ms: 1_000,
            },
        )
        .await;
}

fn chunk(text: &str) -> SessionUpdate {
    SessionUpdate::AgentMessageChunk {
        text: text.to_string(),
    }
}

// ── Rotation (usage-driven session cycling) ──────────────────────────────────

#[tokio::test]
async fn rotation_happens_only_past_the_usage_threshold() {
    let w = world();
    let key = session_key("u1");
    let mut events = w.bus.subscribe();

    w.acp.script_updates(vec![chunk("one")]);
    w.bot
        .handle_message(direct_message("m1", "u1", "first"))
        .await
        .expect("first message");

    // 50% usage: message 2 keeps the session; exactly one session so far
    preload_usage(&w, &key, 0.50).await;
    w.acp.script_updates(vec![chunk("two")]);
    w.bot
        .handle_message(direct_message("m2", "u1", "second"))
        .await
        .expect("second message");
    assert_eq!(w.acp.new_session_count(), 1);

    // 75% usage: message 3 rotates; the new session opens with a
    // restoration system prompt followed by the user message
    preload_usage(&w, &key, 0.75).await;
    w.acp.script_updates(vec![chunk("three")]);
    w.bot
        .handle_message(direct_message("m3", "u1", "third"))
        .await
        .expect("third message");
    assert_eq!(w.acp.new_session_count(), 2);

    let prompts: Vec<_> = w
        .acp
        .prompts()
        .into_iter()
        .filter(|p| p.text != "/usage")
        .collect();
    let restoration = prompts
        .iter()
        .position(|p| p.text.starts_with("## Session Context"))
        .expect("restoration prompt");
    assert_eq!(prompts[restoration + 1].text, "third");

    let seen: Vec<_> = std::iter::from_fn(|| events.try_recv().ok()).collect();
    assert!(seen
        .iter()
        .any(|e| matches!(e, EngineEvent::SessionRotated { .. })));
    assert!(seen
        .iter()
        .any(|e| matches!(e, EngineEvent::SessionCompleted { .. })));
}

// ── Reconstruction with a gap ────────────────────────────────────────────────

#[tokio::test]
async fn reconstruction_marks_each_maximal_missing_run() {
    let w = world();
    let session = w
        .sessions
        .create_session(CreateSession {
            id: Some(SessionId::new("gap-sess")),
            agent_type: "coder".to_string(),
            ..Default::default()
        })
        .expect("create session");

    // Write events at seqs {0,1,3,4} by rewriting the log with a hole
    let events_path = w
        ._dir
        .path()
        .join("agent-sessions/gap-sess/events.jsonl");
    let mut lines = String::new();
    for seq in [0u64, 1, 3, 4] {
        let event = kbot_core::SessionEvent {
            ts: 1_000 + seq,
            seq,
            session_id: session.id.clone(),
            trace_id: None,
            body: EventBody::MessageChunk(MessageChunkData {
                content: format!("<e{seq}>"),
            }),
        };
        lines.push_str(&serde_json::to_string(&event).expect("serialize"));
        lines.push('\n');
    }
    std::fs::write(&events_path, lines).expect("write events");

    let reconstructor = TurnReconstructor::new(Arc::clone(&w.sessions));
    let out = reconstructor
        .reconstruct(&session.id, 0, 4, ReconstructOptions::default())
        .expect("reconstruct");

    assert_eq!(out.content, "<e0><e1>[gap: events 2-2 missing]<e3><e4>");
    assert!(out.has_gaps);
    assert_eq!(out.events_read, 4);
    assert_eq!(out.events_missing, 1);
}

// ── Idempotent turns ─────────────────────────────────────────────────────────

#[tokio::test]
async fn replayed_platform_message_keeps_one_turn_per_message_id() {
    let w = world();

    w.acp.script_updates(vec![chunk("a")]);
    w.bot
        .handle_message(direct_message("m1", "u1", "ping"))
        .await
        .expect("first delivery");
    w.acp.script_updates(vec![chunk("b")]);
    w.bot
        .handle_message(direct_message("m1", "u1", "ping"))
        .await
        .expect("redelivery");

    let conv = w
        .conversations
        .get_conversation_by_session_key(&session_key("u1"))
        .expect("lookup")
        .expect("conversation exists");
    let turns = w.conversations.read_turns(&conv.id).expect("read turns").turns;
    let with_m1 = turns
        .iter()
        .filter(|t| t.message_id.as_deref() == Some("m1"))
        .count();
    assert_eq!(with_m1, 1, "at most one turn per message_id");
}

// ── Usage probe stall ────────────────────────────────────────────────────────

#[tokio::test]
async fn stalled_usage_probe_never_blocks_the_reply() {
    let w = world(); // no usage stderr scripted: every probe stalls
    let mut events = w.bus.subscribe();

    w.acp.script_updates(vec![chunk("pong")]);
    let handled = w
        .bot
        .handle_message(direct_message("m1", "u1", "ping"))
        .await
        .expect("message handled despite stalled probe");

    assert_eq!(handled.reply, "pong");
    assert_eq!(w.chat.sent(), vec!["pong"]);
    let seen: Vec<_> = std::iter::from_fn(|| events.try_recv().ok()).collect();
    assert!(seen
        .iter()
        .any(|e| matches!(e, EngineEvent::UsageTimeout { .. })));
}

// ── Event-log invariants across the whole pipeline ───────────────────────────

#[tokio::test]
async fn event_log_is_dense_and_monotone_per_session() {
    let w = world();
    w.acp.script_updates(vec![chunk("one "), chunk("two")]);
    let handled = w
        .bot
        .handle_message(direct_message("m1", "u1", "go"))
        .await
        .expect("handled");

    let events = w
        .sessions
        .read_events(&handled.session_id, None)
        .expect("read events")
        .events;
    assert!(!events.is_empty());
    for (i, event) in events.iter().enumerate() {
        assert_eq!(event.seq, i as u64, "dense seq from 0");
    }
    for pair in events.windows(2) {
        assert!(pair[0].ts <= pair[1].ts, "ts monotone with seq");
    }
}

#[tokio::test]
async fn turn_ranges_reconstruct_the_interaction() {
    let w = world();
    w.acp.script_updates(vec![chunk("it works")]);
    w.bot
        .handle_message(direct_message("m1", "u1", "does it work?"))
        .await
        .expect("handled");

    let conv = w
        .conversations
        .get_conversation_by_session_key(&session_key("u1"))
        .expect("lookup")
        .expect("conversation");
    let turns = w.conversations.read_turns(&conv.id).expect("turns").turns;
    let reconstructor = TurnReconstructor::new(Arc::clone(&w.sessions));

    let user = reconstructor
        .reconstruct(
            &turns[0].session_id,
            turns[0].event_range.start_seq,
            turns[0].event_range.end_seq,
            ReconstructOptions::default(),
        )
        .expect("user turn");
    assert_eq!(user.content, "does it work?");

    let assistant = reconstructor
        .reconstruct(
            &turns[1].session_id,
            turns[1].event_range.start_seq,
            turns[1].event_range.end_seq,
            ReconstructOptions::default(),
        )
        .expect("assistant turn");
    assert_eq!(assistant.content, "it works");
}

// ── Session keys ─────────────────────────────────────────────────────────────

#[test]
fn session_keys_round_trip_for_both_peer_kinds() {
    for serialized in [
        "agent:kbot:slack:user:U123",
        "agent:kbot:telegram:channel:-100200300",
    ] {
        let key = SessionKey::parse(serialized).expect("parse");
        assert_eq!(key.build(), serialized);
    }
}

// ── Append-only discipline ───────────────────────────────────────────────────

#[tokio::test]
async fn events_are_immutable_once_written() {
    let w = world();
    let session = w
        .sessions
        .create_session(CreateSession {
            agent_type: "coder".to_string(),
            ..Default::default()
        })
        .expect("create");

    let first = w
        .sessions
        .append_event(AppendEvent {
            session_id: session.id.clone(),
            body: EventBody::MessageChunk(MessageChunkData {
                content: "original".to_string(),
            }),
            trace_id: None,
            ts: None,
        })
        .expect("append");

    // Later appends leave earlier lines untouched
    w.sessions
        .append_event(AppendEvent {
            session_id: session.id.clone(),
            body: EventBody::MessageChunk(MessageChunkData {
                content: "later".to_string(),
            }),
            trace_id: None,
            ts: None,
        })
        .expect("append");

    let read = w.sessions.read_events(&session.id, None).expect("read");
    assert_eq!(read.events[first.seq as usize].content_text(), "original");
}
