// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Normalized inbound platform messages and session-key routing.

use crate::session_key::{PeerKind, SessionKey, SessionKeyError};
use serde::{Deserialize, Serialize};

/// Who sent an inbound message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageSender {
    pub id: String,
    pub platform: String,
    #[serde(default)]
    pub display_name: String,
}

/// Platform-agnostic inbound message, produced by chat adapters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedMessage {
    /// Platform message id (drives turn dedup).
    pub id: String,
    pub text: String,
    pub sender: MessageSender,
    /// Epoch milliseconds.
    pub timestamp_ms: u64,
    /// Platform channel identifier the message arrived on.
    pub channel: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl NormalizedMessage {
    /// A direct message addresses the bot one-on-one: the channel is the
    /// sender's own id, or the adapter marked it explicitly.
    pub fn is_direct(&self) -> bool {
        if self.channel == self.sender.id {
            return true;
        }
        self.metadata
            .as_ref()
            .and_then(|m| m.get("direct_message"))
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }
}

/// Resolve the stable routing key for an inbound message.
///
/// Direct messages key on the sender (`user` peer); everything else keys on
/// the channel, so all participants of a shared channel converse with one
/// session.
pub fn session_key_for(
    agent: &str,
    msg: &NormalizedMessage,
) -> Result<SessionKey, SessionKeyError> {
    if msg.is_direct() {
        SessionKey::new(agent, &msg.sender.platform, PeerKind::User, &msg.sender.id)
    } else {
        SessionKey::new(agent, &msg.sender.platform, PeerKind::Channel, &msg.channel)
    }
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
