// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::restore::{SelectorConfig, ToolSummarizer};
use kbot_core::test_support::{chunk_event, conversation, session_key};
use kbot_core::{EventRange, FakeClock, SessionId};
use kbot_storage::{AppendEvent, CreateSession, SessionStore, TurnReconstructor};
use std::sync::Arc;
use tempfile::tempdir;

struct OkSummary;

#[async_trait]
impl SummaryProvider for OkSummary {
    async fn summarize(&self, turns: &[Turn]) -> Result<String, String> {
        Ok(format!("Earlier: {} turns about the deploy.", turns.len()))
    }
}

struct FailingSummary;

#[async_trait]
impl SummaryProvider for FailingSummary {
    async fn summarize(&self, _turns: &[Turn]) -> Result<String, String> {
        Err("summarizer unavailable".to_string())
    }
}

struct Fixture {
    _dir: tempfile::TempDir,
    store: Arc<SessionStore<FakeClock>>,
    base_dir: std::path::PathBuf,
    turns: Vec<Turn>,
    next_seq: u64,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempdir().unwrap();
        let base_dir = dir.path().to_path_buf();
        let store = Arc::new(SessionStore::new(dir.path(), FakeClock::new()));
        store
            .create_session(CreateSession {
                id: Some(SessionId::new("sess-r")),
                agent_type: "coder".to_string(),
                ..Default::default()
            })
            .unwrap();
        Self {
            _dir: dir,
            store,
            base_dir,
            turns: Vec::new(),
            next_seq: 0,
        }
    }

    fn add_turn(&mut self, role: TurnRole, content: &str) {
        let event = chunk_event("sess-r", 0, content);
        let appended = self
            .store
            .append_event(AppendEvent {
                session_id: SessionId::new("sess-r"),
                body: event.body,
                trace_id: None,
                ts: None,
            })
            .unwrap();
        self.turns.push(Turn {
            ts: 1_000 + self.next_seq,
            seq: self.next_seq,
            role,
            session_id: SessionId::new("sess-r"),
            event_range: EventRange::new(appended.seq, appended.seq).unwrap(),
            message_id: None,
            metadata: None,
        });
        self.next_seq += 1;
    }

    fn restorer<P: SummaryProvider>(
        &self,
        selector_config: SelectorConfig,
        provider: P,
    ) -> ContextRestorer<FakeClock, P> {
        let selector = crate::restore::TurnSelector::new(
            Arc::new(TurnReconstructor::new(Arc::clone(&self.store))),
            ToolSummarizer::new(),
            selector_config,
        );
        ContextRestorer::new(RestorerConfig::new(&self.base_dir), selector, provider)
    }
}

/// Tight budget: each ~40-char turn costs 10 tokens, budget is 25.
fn tight_budget() -> SelectorConfig {
    SelectorConfig {
        max_context_tokens: 250,
        budget_fraction: 0.10,
        margin_fraction: 0.0,
        chars_per_token: 4,
    }
}

#[tokio::test]
async fn empty_conversation_is_skipped() {
    let fx = Fixture::new();
    let conv = conversation("c1", &session_key("u1"));
    let restoration = fx
        .restorer(SelectorConfig::default(), OkSummary)
        .build(&conv, &[])
        .await
        .unwrap();

    assert!(restoration.skipped);
    assert!(restoration.prompt.is_empty());
    assert!(restoration.stats.is_none());
}

#[tokio::test]
async fn prompt_contains_all_sections_in_order() {
    let mut fx = Fixture::new();
    for i in 0..4 {
        fx.add_turn(TurnRole::User, &format!("{:0>37}-{i}", i));
    }
    let conv = conversation("c1", &session_key("u1"));

    // Tight budget forces an archive, which brings in the summary section
    let restoration = fx
        .restorer(tight_budget(), OkSummary)
        .build(&conv, &fx.turns)
        .await
        .unwrap();

    let prompt = &restoration.prompt;
    let context_pos = prompt.find("## Session Context").unwrap();
    let summary_pos = prompt.find("### Summary of Earlier Conversation").unwrap();
    let recent_pos = prompt.find("### Recent Conversation History").unwrap();
    let archive_pos = prompt.find("### Archived History").unwrap();
    let closing_pos = prompt.find("Continue the conversation naturally").unwrap();
    assert!(context_pos < summary_pos);
    assert!(summary_pos < recent_pos);
    assert!(recent_pos < archive_pos);
    assert!(archive_pos < closing_pos);

    assert!(prompt.contains("Earlier: 2 turns about the deploy."));
    assert!(!restoration.summary_failed);
}

#[tokio::test]
async fn prompt_names_the_turns_jsonl_path() {
    // Invariant: output contains the literal archived-history path
    let mut fx = Fixture::new();
    fx.add_turn(TurnRole::User, "hello");
    let conv = conversation("c1", &session_key("u1"));

    let restoration = fx
        .restorer(SelectorConfig::default(), OkSummary)
        .build(&conv, &fx.turns)
        .await
        .unwrap();

    let expected = format!(
        "{}/conversations/c1/turns.jsonl",
        fx.base_dir.display()
    );
    assert!(restoration.prompt.contains(&expected));
}

#[tokio::test]
async fn summary_failure_keeps_recent_turns_only() {
    let mut fx = Fixture::new();
    for i in 0..4 {
        fx.add_turn(TurnRole::User, &format!("{:0>37}-{i}", i));
    }
    let conv = conversation("c1", &session_key("u1"));

    let restoration = fx
        .restorer(tight_budget(), FailingSummary)
        .build(&conv, &fx.turns)
        .await
        .unwrap();

    assert!(restoration.summary_failed);
    assert!(!restoration.prompt.contains("### Summary of Earlier Conversation"));
    assert!(restoration.prompt.contains("### Recent Conversation History"));
    assert!(restoration.prompt.contains("### Archived History"));
}

#[tokio::test]
async fn no_archive_means_no_summary_section() {
    let mut fx = Fixture::new();
    fx.add_turn(TurnRole::User, "short");
    fx.add_turn(TurnRole::Assistant, "reply");
    let conv = conversation("c1", &session_key("u1"));

    let restoration = fx
        .restorer(SelectorConfig::default(), OkSummary)
        .build(&conv, &fx.turns)
        .await
        .unwrap();

    assert!(!restoration.prompt.contains("### Summary of Earlier Conversation"));
    assert!(restoration.prompt.contains("[user] short"));
    assert!(restoration.prompt.contains("[assistant] reply"));
}

#[tokio::test]
async fn oversized_turn_is_truncated_with_marker() {
    let mut fx = Fixture::new();
    fx.add_turn(TurnRole::User, &"x".repeat(200));
    let conv = conversation("c1", &session_key("u1"));

    let mut restorer = fx.restorer(SelectorConfig::default(), OkSummary);
    restorer.config.max_turn_chars = 50;
    let restoration = restorer.build(&conv, &fx.turns).await.unwrap();

    assert!(restoration.prompt.contains("[truncated]"));
    assert!(!restoration.prompt.contains(&"x".repeat(51)));
}

#[tokio::test]
async fn stats_report_exclusions() {
    let mut fx = Fixture::new();
    for i in 0..4 {
        fx.add_turn(TurnRole::User, &format!("{:0>37}-{i}", i));
    }
    let conv = conversation("c1", &session_key("u1"));

    let restoration = fx
        .restorer(tight_budget(), OkSummary)
        .build(&conv, &fx.turns)
        .await
        .unwrap();

    let stats = restoration.stats.unwrap();
    assert_eq!(stats.excluded_count, 2);
    assert!(stats.within_budget);
}
