// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Turn pointers into the session event log.
//!
//! Turns never store content. They reference a half of an interaction by an
//! inclusive event-range inside one agent session; content is reconstructed
//! on demand. Dangling references are tolerated and render as gap markers.

use crate::session::SessionId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
    System,
}

/// Errors from constructing event ranges
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EventRangeError {
    #[error("event range start_seq {start} exceeds end_seq {end}")]
    Inverted { start: u64, end: u64 },
}

/// Inclusive `[start_seq, end_seq]` window into a session's event log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRange {
    pub start_seq: u64,
    pub end_seq: u64,
}

impl EventRange {
    pub fn new(start_seq: u64, end_seq: u64) -> Result<Self, EventRangeError> {
        if start_seq > end_seq {
            return Err(EventRangeError::Inverted {
                start: start_seq,
                end: end_seq,
            });
        }
        Ok(Self { start_seq, end_seq })
    }

    pub fn contains(&self, seq: u64) -> bool {
        seq >= self.start_seq && seq <= self.end_seq
    }

    /// Number of sequence slots the range spans (always ≥ 1 when valid).
    pub fn span(&self) -> u64 {
        self.end_seq - self.start_seq + 1
    }
}

/// Pointer to one conversational turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    /// Epoch milliseconds.
    pub ts: u64,
    /// Monotonic per-conversation sequence.
    pub seq: u64,
    pub role: TurnRole,
    pub session_id: SessionId,
    pub event_range: EventRange,
    /// Platform message id, used for duplicate suppression.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

#[cfg(test)]
#[path = "turn_tests.rs"]
mod tests;
