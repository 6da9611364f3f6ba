// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test builders shared by other crates' tests.
//!
//! Enabled via the `test-support` feature (or `cfg(test)` inside this crate).

use crate::conversation::{Conversation, ConversationId, ConversationStatus};
use crate::event::{
    EventBody, MessageChunkData, PromptSentData, PromptSource, SessionEvent, ToolCallData,
    ToolResultData,
};
use crate::message::{MessageSender, NormalizedMessage};
use crate::session::SessionId;
use crate::session_key::{PeerKind, SessionKey};

pub fn session_key(peer_id: &str) -> SessionKey {
    #[allow(clippy::unwrap_used)]
    SessionKey::new("kbot", "testplat", PeerKind::User, peer_id).unwrap()
}

pub fn chunk_event(session_id: &str, seq: u64, content: &str) -> SessionEvent {
    SessionEvent {
        ts: 1_000 + seq,
        seq,
        session_id: SessionId::new(session_id),
        trace_id: None,
        body: EventBody::MessageChunk(MessageChunkData {
            content: content.to_string(),
        }),
    }
}

pub fn prompt_event(session_id: &str, seq: u64, content: &str) -> SessionEvent {
    SessionEvent {
        ts: 1_000 + seq,
        seq,
        session_id: SessionId::new(session_id),
        trace_id: None,
        body: EventBody::PromptSent(PromptSentData {
            content: content.to_string(),
            source: PromptSource::User,
        }),
    }
}

pub fn tool_call_event(
    session_id: &str,
    seq: u64,
    name: &str,
    input: &str,
    call_id: &str,
) -> SessionEvent {
    SessionEvent {
        ts: 1_000 + seq,
        seq,
        session_id: SessionId::new(session_id),
        trace_id: Some(format!("tr-{call_id}")),
        body: EventBody::ToolCall(ToolCallData {
            name: name.to_string(),
            input: input.to_string(),
            call_id: Some(call_id.to_string()),
        }),
    }
}

pub fn tool_result_event(
    session_id: &str,
    seq: u64,
    call_id: &str,
    output: &str,
    is_error: bool,
) -> SessionEvent {
    SessionEvent {
        ts: 1_000 + seq,
        seq,
        session_id: SessionId::new(session_id),
        trace_id: Some(format!("tr-{call_id}")),
        body: EventBody::ToolResult(ToolResultData {
            call_id: Some(call_id.to_string()),
            output: output.to_string(),
            is_error,
        }),
    }
}

pub fn conversation(id: &str, key: &SessionKey) -> Conversation {
    Conversation {
        id: ConversationId::new(id),
        session_key: key.build(),
        status: ConversationStatus::Active,
        created_at: 1_000,
        updated_at: 1_000,
        turn_count: 0,
        metadata: None,
    }
}

pub fn direct_message(id: &str, sender: &str, text: &str) -> NormalizedMessage {
    NormalizedMessage {
        id: id.to_string(),
        text: text.to_string(),
        sender: MessageSender {
            id: sender.to_string(),
            platform: "testplat".to_string(),
            display_name: sender.to_string(),
        },
        timestamp_ms: 1_000,
        channel: sender.to_string(),
        metadata: None,
    }
}
