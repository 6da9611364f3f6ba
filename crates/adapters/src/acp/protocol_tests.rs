// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn parses_agent_message_chunk() {
    let params = serde_json::json!({
        "sessionUpdate": "agent_message_chunk",
        "content": { "type": "text", "text": "hello " },
    });
    assert_eq!(
        SessionUpdate::from_params(&params),
        SessionUpdate::AgentMessageChunk {
            text: "hello ".to_string()
        }
    );
}

#[test]
fn parses_tool_call_with_structured_input() {
    let params = serde_json::json!({
        "sessionUpdate": "tool_call",
        "toolCallId": "call-1",
        "title": "bash",
        "rawInput": { "command": "ls" },
    });
    match SessionUpdate::from_params(&params) {
        SessionUpdate::ToolCall {
            call_id,
            name,
            input,
        } => {
            assert_eq!(call_id, "call-1");
            assert_eq!(name, "bash");
            assert!(input.contains("ls"));
        }
        other => panic!("expected ToolCall, got {other:?}"),
    }
}

#[test]
fn parses_tool_call_update_output() {
    let params = serde_json::json!({
        "sessionUpdate": "tool_call_update",
        "toolCallId": "call-1",
        "status": "completed",
        "content": [{ "type": "content", "content": { "type": "text", "text": "3 files" } }],
    });
    assert_eq!(
        SessionUpdate::from_params(&params),
        SessionUpdate::ToolCallUpdate {
            call_id: "call-1".to_string(),
            status: "completed".to_string(),
            output: "3 files".to_string(),
        }
    );
}

#[test]
fn unknown_update_preserved_by_tag() {
    let params = serde_json::json!({ "sessionUpdate": "plan" });
    assert_eq!(
        SessionUpdate::from_params(&params),
        SessionUpdate::Other {
            update_type: "plan".to_string()
        }
    );
}

#[test]
fn snake_case_update_type_accepted() {
    let params = serde_json::json!({
        "update_type": "agent_message_chunk",
        "content": { "text": "x" },
    });
    assert_eq!(
        SessionUpdate::from_params(&params),
        SessionUpdate::AgentMessageChunk {
            text: "x".to_string()
        }
    );
}

#[test]
fn prompt_params_shape() {
    let params = prompt_params("sess-1", "user", "hi");
    assert_eq!(params["sessionId"], "sess-1");
    assert_eq!(params["role"], "user");
    assert_eq!(params["prompt"][0]["text"], "hi");
}
