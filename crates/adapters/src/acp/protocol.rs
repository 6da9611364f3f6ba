// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! ACP wire shapes.
//!
//! JSON-RPC 2.0 over the agent's stdio: requests carry an `id`, streamed
//! `session/update` notifications do not. Only the capability subset the
//! runtime consumes is modeled; unknown update types are preserved as
//! [`SessionUpdate::Other`] so new agent features degrade gracefully.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Result of a completed prompt turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptOutcome {
    #[serde(default)]
    pub stop_reason: Option<String>,
}

/// A `session/update` notification tagged with its session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionNotification {
    pub session_id: String,
    pub update: SessionUpdate,
}

/// Streamed update payloads the runtime understands.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionUpdate {
    /// Incremental assistant text.
    AgentMessageChunk { text: String },
    /// The agent invoked a tool.
    ToolCall {
        call_id: String,
        name: String,
        input: String,
    },
    /// A tool finished (or progressed).
    ToolCallUpdate {
        call_id: String,
        status: String,
        output: String,
    },
    /// Anything else; carried by tag for observability.
    Other { update_type: String },
}

impl SessionUpdate {
    /// Parse the `params.update` object of a `session/update` notification.
    pub fn from_params(update: &Value) -> Self {
        let update_type = update
            .get("sessionUpdate")
            .or_else(|| update.get("update_type"))
            .and_then(Value::as_str)
            .unwrap_or("unknown");

        match update_type {
            "agent_message_chunk" => SessionUpdate::AgentMessageChunk {
                text: update
                    .pointer("/content/text")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            },
            "tool_call" => SessionUpdate::ToolCall {
                call_id: str_field(update, "toolCallId"),
                name: str_field(update, "title"),
                input: update
                    .get("rawInput")
                    .map(render_input)
                    .unwrap_or_default(),
            },
            "tool_call_update" => SessionUpdate::ToolCallUpdate {
                call_id: str_field(update, "toolCallId"),
                status: str_field(update, "status"),
                output: update
                    .pointer("/content/0/content/text")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            },
            other => SessionUpdate::Other {
                update_type: other.to_string(),
            },
        }
    }
}

fn str_field(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Flatten a structured tool input to a single line of text.
fn render_input(input: &Value) -> String {
    match input {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Parameters for `session/prompt`.
pub(crate) fn prompt_params(session_id: &str, role: &str, text: &str) -> Value {
    serde_json::json!({
        "sessionId": session_id,
        "role": role,
        "prompt": [{ "type": "text", "text": text }],
    })
}

/// Parameters for `initialize`.
pub(crate) fn initialize_params() -> Value {
    serde_json::json!({
        "protocolVersion": 1,
        "clientInfo": { "name": "kbot", "version": env!("CARGO_PKG_VERSION") },
        "clientCapabilities": {},
    })
}

#[cfg(test)]
#[path = "protocol_tests.rs"]
mod tests;
