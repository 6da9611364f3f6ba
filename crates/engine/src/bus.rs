// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Typed engine event bus.
//!
//! A closed enum of event kinds with struct payloads, fanned out to any
//! number of subscribers. Emission is non-blocking: subscribers get an
//! unbounded channel and closed receivers are pruned on the next emit.
//! Listeners that must do real work schedule it on their own tasks.

use kbot_core::{ContextUsageUpdate, SessionId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;

/// What to do when an escalation times out unacknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FallbackAction {
    Retry,
    Pause,
    Fail,
}

/// Engine observations, one variant per event kind.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    // -- agent lifecycle --
    SpawnQueued { depth: usize },
    HealthStatus { healthy: bool, recovered: bool },
    Respawn { attempt: u32, delay_ms: u64 },
    Escalate { reason: String, context: String },
    ShutdownComplete,

    // -- autonomous loop --
    LoopIteration { n: u64 },
    CircuitTripped { errors: u32 },
    CircuitReset,

    // -- session lifecycle --
    SessionCreated { key: String, session_id: SessionId },
    SessionRotated {
        key: String,
        old: SessionId,
        new: SessionId,
    },
    SessionCompleted { id: SessionId },

    // -- context usage --
    UsageUpdate {
        session_id: SessionId,
        update: ContextUsageUpdate,
    },
    UsageError {
        session_id: SessionId,
        message: String,
    },
    UsageTimeout { session_id: SessionId },

    // -- escalation --
    EscalationCreated { id: String },
    EscalationAcknowledged { id: String },
    EscalationFallback {
        id: String,
        fallback: FallbackAction,
    },

    // -- message orchestration --
    MessageFailed {
        message_id: String,
        context: String,
    },
}

/// Multi-subscriber event bus.
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<mpsc::UnboundedSender<EngineEvent>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<EngineEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Emit to all live subscribers; never blocks.
    pub fn emit(&self, event: EngineEvent) {
        self.subscribers
            .lock()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }
}

#[cfg(test)]
#[path = "bus_tests.rs"]
mod tests;
