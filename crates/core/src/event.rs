// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session event log atoms.
//!
//! Events are the unit of the append-only per-session log. Once written they
//! are immutable; turn pointers reference them by `(session_id, seq)`.
//!
//! Serialized line shape: `{"ts":..,"seq":..,"session_id":..,"trace_id"?:..,"type":"..","data":{..}}`

use crate::session::SessionId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Closed set of event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    SessionStart,
    SessionEnd,
    SessionUpdate,
    PromptSent,
    MessageChunk,
    ToolCall,
    ToolResult,
    Note,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::SessionStart => "session.start",
            EventKind::SessionEnd => "session.end",
            EventKind::SessionUpdate => "session.update",
            EventKind::PromptSent => "prompt.sent",
            EventKind::MessageChunk => "message.chunk",
            EventKind::ToolCall => "tool.call",
            EventKind::ToolResult => "tool.result",
            EventKind::Note => "note",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Who issued a prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptSource {
    User,
    System,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SessionStartData {
    pub agent_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SessionEndData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Streamed agent update, as received from the ACP session/update channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionUpdateData {
    pub update_type: String,
    #[serde(default)]
    pub payload: UpdatePayload,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct UpdatePayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<UpdateContent>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct UpdateContent {
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptSentData {
    pub content: String,
    pub source: PromptSource,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageChunkData {
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallData {
    pub name: String,
    /// Rendered tool input (already flattened to text by the ACP layer).
    #[serde(default)]
    pub input: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResultData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    #[serde(default)]
    pub output: String,
    #[serde(default)]
    pub is_error: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoteData {
    pub text: String,
}

/// Typed event body: the `type` tag plus its `data` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum EventBody {
    #[serde(rename = "session.start")]
    SessionStart(SessionStartData),
    #[serde(rename = "session.end")]
    SessionEnd(SessionEndData),
    #[serde(rename = "session.update")]
    SessionUpdate(SessionUpdateData),
    #[serde(rename = "prompt.sent")]
    PromptSent(PromptSentData),
    #[serde(rename = "message.chunk")]
    MessageChunk(MessageChunkData),
    #[serde(rename = "tool.call")]
    ToolCall(ToolCallData),
    #[serde(rename = "tool.result")]
    ToolResult(ToolResultData),
    #[serde(rename = "note")]
    Note(NoteData),
}

impl EventBody {
    pub fn kind(&self) -> EventKind {
        match self {
            EventBody::SessionStart(_) => EventKind::SessionStart,
            EventBody::SessionEnd(_) => EventKind::SessionEnd,
            EventBody::SessionUpdate(_) => EventKind::SessionUpdate,
            EventBody::PromptSent(_) => EventKind::PromptSent,
            EventBody::MessageChunk(_) => EventKind::MessageChunk,
            EventBody::ToolCall(_) => EventKind::ToolCall,
            EventBody::ToolResult(_) => EventKind::ToolResult,
            EventBody::Note(_) => EventKind::Note,
        }
    }
}

/// One atom in a session's append-only event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEvent {
    /// Epoch milliseconds at append time.
    pub ts: u64,
    /// Dense per-session sequence, starting at 0. Readers tolerate gaps.
    pub seq: u64,
    pub session_id: SessionId,
    /// Correlates `tool.call` with its `tool.result`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(flatten)]
    pub body: EventBody,
}

impl SessionEvent {
    pub fn kind(&self) -> EventKind {
        self.body.kind()
    }

    /// Visible text carried by this event, per-kind.
    ///
    /// `session.update` contributes text only for `agent_message_chunk`
    /// updates; control updates render as empty.
    pub fn content_text(&self) -> &str {
        match &self.body {
            EventBody::PromptSent(d) => &d.content,
            EventBody::MessageChunk(d) => &d.content,
            EventBody::SessionUpdate(d) if d.update_type == "agent_message_chunk" => d
                .payload
                .content
                .as_ref()
                .map(|c| c.text.as_str())
                .unwrap_or(""),
            _ => "",
        }
    }
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
