// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Supervisor checkpoint: the durable handoff across a restart.
//!
//! Written as YAML under `<dataDir>/checkpoints/<ulid>.yaml`. Files older
//! than 24 hours are rejected on read and swept at supervisor startup.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

crate::define_id! {
    /// Unique identifier for a checkpoint file (ULID).
    pub struct CheckpointId;
}

/// Current checkpoint schema version.
pub const CHECKPOINT_VERSION: u32 = 1;

/// Checkpoints expire 24 hours after `created_at`.
pub const CHECKPOINT_TTL_MS: u64 = 24 * 60 * 60 * 1000;

/// Why the restart happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RestartReason {
    Planned,
    Upgrade,
    Crash,
}

impl fmt::Display for RestartReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RestartReason::Planned => "planned",
            RestartReason::Upgrade => "upgrade",
            RestartReason::Crash => "crash",
        };
        write!(f, "{s}")
    }
}

/// Prompt material handed to the bot waking up from a checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WakeContext {
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_work: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

/// Errors from checkpoint validation
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CheckpointError {
    #[error("unsupported checkpoint version {found} (expected {CHECKPOINT_VERSION})")]
    WrongVersion { found: u32 },
    #[error("checkpoint expired: created {age_ms}ms ago (ttl {CHECKPOINT_TTL_MS}ms)")]
    Expired { age_ms: u64 },
    #[error("invalid created_at timestamp: {0}")]
    BadTimestamp(String),
}

/// Durable restart handoff written by the child, consumed at next spawn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupervisorCheckpoint {
    pub version: u32,
    pub session_id: String,
    pub restart_reason: RestartReason,
    pub wake_context: WakeContext,
    /// RFC3339 timestamp.
    pub created_at: String,
}

impl SupervisorCheckpoint {
    pub fn new(
        session_id: impl Into<String>,
        restart_reason: RestartReason,
        wake_context: WakeContext,
        created_at: impl Into<String>,
    ) -> Self {
        Self {
            version: CHECKPOINT_VERSION,
            session_id: session_id.into(),
            restart_reason,
            wake_context,
            created_at: created_at.into(),
        }
    }

    /// Reject wrong-version checkpoints and expired ones.
    ///
    /// `now_ms` is epoch milliseconds; `created_at` parsing failures are
    /// surfaced rather than treated as fresh.
    pub fn validate(&self, now_ms: u64, created_at_ms: u64) -> Result<(), CheckpointError> {
        if self.version != CHECKPOINT_VERSION {
            return Err(CheckpointError::WrongVersion {
                found: self.version,
            });
        }
        let age_ms = now_ms.saturating_sub(created_at_ms);
        if age_ms >= CHECKPOINT_TTL_MS {
            return Err(CheckpointError::Expired { age_ms });
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "checkpoint_tests.rs"]
mod tests;
