// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Engine error taxonomy.
//!
//! Control-flow outcomes the caller must branch on (circuit open, invalid
//! state) are typed variants with a stable `code()`; external failures wrap
//! the originating layer's error.

use kbot_adapters::{AcpError, ChatError};
use kbot_core::SessionKeyError;
use kbot_storage::StorageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("circuit open; {remaining_ms}ms cooldown remaining")]
    CircuitOpen { remaining_ms: u64 },

    #[error("operation '{op}' not permitted in state {state}")]
    InvalidState { op: &'static str, state: String },

    #[error("agent lifecycle is not healthy")]
    NotHealthy,

    #[error("spawn failed: {0}")]
    SpawnFailed(String),

    #[error("escalation not found: {0}")]
    EscalationNotFound(String),

    #[error("escalation {id} is not pending")]
    EscalationNotPending { id: String },

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Acp(#[from] AcpError),

    #[error("session key: {0}")]
    Key(#[from] SessionKeyError),

    #[error("chat: {0}")]
    Chat(#[from] ChatError),
}

impl EngineError {
    /// Stable machine-readable discriminant.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::CircuitOpen { .. } => "CIRCUIT_OPEN",
            EngineError::InvalidState { .. } => "INVALID_STATE",
            EngineError::NotHealthy => "NOT_HEALTHY",
            EngineError::SpawnFailed(_) => "SPAWN_FAILED",
            EngineError::EscalationNotFound(_) => "ESCALATION_NOT_FOUND",
            EngineError::EscalationNotPending { .. } => "ESCALATION_NOT_PENDING",
            EngineError::Storage(_) => "STORAGE",
            EngineError::Acp(_) => "ACP",
            EngineError::Key(_) => "SESSION_KEY",
            EngineError::Chat(_) => "CHAT",
        }
    }
}
