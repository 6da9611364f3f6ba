// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[tokio::test]
async fn sessions_are_sequential_and_counted() {
    let acp = FakeAcp::new();
    assert_eq!(acp.new_session().await.unwrap(), "fake-sess-1");
    assert_eq!(acp.new_session().await.unwrap(), "fake-sess-2");
    assert_eq!(acp.new_session_count(), 2);
}

#[tokio::test]
async fn prompts_are_recorded_in_order() {
    let acp = FakeAcp::new();
    acp.prompt("s1", PromptSource::System, "identity").await.unwrap();
    acp.prompt("s1", PromptSource::User, "hello").await.unwrap();

    let prompts = acp.prompts();
    assert_eq!(prompts.len(), 2);
    assert_eq!(prompts[0].source, PromptSource::System);
    assert_eq!(prompts[1].text, "hello");
}

#[tokio::test]
async fn scripted_updates_stream_during_prompt() {
    let acp = FakeAcp::new();
    acp.script_updates(vec![SessionUpdate::AgentMessageChunk {
        text: "reply".to_string(),
    }]);

    let mut updates = acp.subscribe_updates();
    acp.prompt("s1", PromptSource::User, "hi").await.unwrap();

    let notification = updates.try_recv().unwrap();
    assert_eq!(notification.session_id, "s1");
}

#[tokio::test]
async fn usage_prompt_emits_scripted_stderr() {
    let acp = FakeAcp::new();
    acp.set_usage_stderr(vec!["<local-command-stdout>".to_string()]);

    let mut stderr = acp.subscribe_stderr();
    acp.prompt("s1", PromptSource::System, "/usage").await.unwrap();

    assert_eq!(stderr.try_recv().unwrap(), "<local-command-stdout>");
}

#[tokio::test]
async fn scripted_failure_and_reachability() {
    let acp = FakeAcp::new();
    acp.set_fail_prompts(true);
    assert!(acp.prompt("s1", PromptSource::User, "x").await.is_err());

    assert!(acp.is_reachable().await);
    acp.set_reachable(false);
    assert!(!acp.is_reachable().await);
}
