// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Platform-facing conversation thread metadata.

use serde::{Deserialize, Serialize};

crate::define_id! {
    /// Unique identifier for a conversation (ULID).
    pub struct ConversationId;
}

/// Conversation status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationStatus {
    Active,
    Archived,
}

/// Thread metadata that outlives any single agent session.
///
/// One Conversation owns many AgentSessions over its lifetime; rotation
/// swaps the session while the conversation (and its turn log) persists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    /// Canonical serialized session key; unique across conversations.
    pub session_key: String,
    pub status: ConversationStatus,
    /// Epoch milliseconds.
    pub created_at: u64,
    pub updated_at: u64,
    #[serde(default)]
    pub turn_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

#[cfg(test)]
#[path = "conversation_tests.rs"]
mod tests;
