// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Storage layer for kbot: event-sourced session memory.
//!
//! Each agent session owns a `session.yaml` + append-only `events.jsonl`
//! pair; each conversation owns `conversation.yaml` + `turns.jsonl`. Turns
//! are pointers into the event log and content is strictly derived.

mod checkpoint_store;
mod conversation_store;
mod error;
mod reconstructor;
mod session_store;

pub use checkpoint_store::{created_at_ms, CheckpointStore};
pub use conversation_store::{AppendedTurn, ConversationStore, ReadTurns, TurnInput};
pub use error::StorageError;
pub use reconstructor::{ReconstructOptions, Reconstruction, TurnReconstructor};
pub use session_store::{Appended, AppendEvent, CreateSession, ReadEvents, SessionStore};

use kbot_core::{ConversationId, SessionId};
use std::sync::Arc;

/// Observations emitted by the stores (recovery, appends, reconstruction).
///
/// Observers must be non-blocking; listeners that need to do work schedule
/// it elsewhere.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    TurnAppended {
        conversation_id: ConversationId,
        seq: u64,
        was_duplicate: bool,
    },
    TurnRecovered {
        conversation_id: ConversationId,
        recovered: usize,
        skipped: usize,
    },
    EventsSkipped {
        session_id: SessionId,
        skipped: usize,
    },
    ReconstructionCompleted {
        session_id: SessionId,
        events_read: usize,
        events_missing: u64,
        has_gaps: bool,
    },
}

/// Non-blocking store observer callback.
pub type StoreObserver = Arc<dyn Fn(StoreEvent) + Send + Sync>;
