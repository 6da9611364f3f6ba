// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Conversation metadata and the turn log.
//!
//! Layout: `<base>/conversations/<id>/conversation.yaml` + `turns.jsonl`.
//! Turns are append-only pointers; duplicates (same platform `message_id`)
//! are suppressed so redelivered messages never double-append.

use crate::session_store::write_yaml_atomic;
use crate::{StorageError, StoreEvent, StoreObserver};
use kbot_core::{
    Clock, Conversation, ConversationId, ConversationStatus, EventRange, SessionId, SessionKey,
    SystemClock, Turn, TurnRole,
};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;

/// Input for `append_turn`.
#[derive(Debug, Clone)]
pub struct TurnInput {
    pub role: TurnRole,
    pub session_id: SessionId,
    pub event_range: EventRange,
    pub message_id: Option<String>,
    pub metadata: Option<serde_json::Value>,
    /// Auto-assigned from the clock when omitted.
    pub ts: Option<u64>,
}

/// Result of `append_turn`.
#[derive(Debug, Clone, PartialEq)]
pub struct AppendedTurn {
    pub turn: Turn,
    pub was_duplicate: bool,
}

/// Result of `read_turns`.
#[derive(Debug, Clone)]
pub struct ReadTurns {
    pub turns: Vec<Turn>,
    pub skipped: usize,
}

struct ConvState {
    next_seq: u64,
    message_ids: HashSet<String>,
}

/// Store for conversations: metadata plus the per-conversation turn log.
///
/// Mutations for one conversation are serialized by a per-conversation lock;
/// distinct conversations proceed in parallel.
pub struct ConversationStore<C: Clock = SystemClock> {
    base_dir: PathBuf,
    clock: C,
    states: Mutex<HashMap<String, Arc<Mutex<ConvState>>>>,
    key_index: Mutex<HashMap<String, ConversationId>>,
    observer: Mutex<Option<StoreObserver>>,
}

impl<C: Clock> ConversationStore<C> {
    /// Open a store rooted at `<base_dir>/conversations`, indexing any
    /// conversations already on disk by session key.
    pub fn open(base_dir: impl Into<PathBuf>, clock: C) -> Result<Self, StorageError> {
        let store = Self {
            base_dir: base_dir.into().join("conversations"),
            clock,
            states: Mutex::new(HashMap::new()),
            key_index: Mutex::new(HashMap::new()),
            observer: Mutex::new(None),
        };
        store.build_key_index()?;
        Ok(store)
    }

    pub fn set_observer(&self, observer: StoreObserver) {
        *self.observer.lock() = Some(observer);
    }

    fn emit(&self, event: StoreEvent) {
        if let Some(observer) = self.observer.lock().clone() {
            observer(event);
        }
    }

    fn conv_dir(&self, id: &ConversationId) -> PathBuf {
        self.base_dir.join(id.as_str())
    }

    fn meta_path(&self, id: &ConversationId) -> PathBuf {
        self.conv_dir(id).join("conversation.yaml")
    }

    fn turns_path(&self, id: &ConversationId) -> PathBuf {
        self.conv_dir(id).join("turns.jsonl")
    }

    fn build_key_index(&self) -> Result<(), StorageError> {
        if !self.base_dir.exists() {
            return Ok(());
        }
        let mut index = self.key_index.lock();
        for entry in std::fs::read_dir(&self.base_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let meta = entry.path().join("conversation.yaml");
            let raw = match std::fs::read_to_string(&meta) {
                Ok(raw) => raw,
                Err(_) => continue,
            };
            match serde_yaml_ng::from_str::<Conversation>(&raw) {
                Ok(conv) => {
                    index.insert(conv.session_key.clone(), conv.id);
                }
                Err(e) => {
                    warn!(path = %meta.display(), error = %e, "skipping unreadable conversation.yaml");
                }
            }
        }
        Ok(())
    }

    /// Fetch the conversation for a key, creating it on first contact.
    pub fn get_or_create_conversation(
        &self,
        key: &SessionKey,
    ) -> Result<Conversation, StorageError> {
        let serialized = key.build();
        if let Some(id) = self.key_index.lock().get(&serialized).cloned() {
            return self.get_conversation(&id);
        }

        let now = self.clock.epoch_ms();
        let conv = Conversation {
            id: ConversationId::generate(),
            session_key: serialized.clone(),
            status: ConversationStatus::Active,
            created_at: now,
            updated_at: now,
            turn_count: 0,
            metadata: None,
        };

        std::fs::create_dir_all(self.conv_dir(&conv.id))?;
        write_yaml_atomic(&self.meta_path(&conv.id), &conv)?;
        self.key_index.lock().insert(serialized, conv.id.clone());
        Ok(conv)
    }

    pub fn get_conversation(&self, id: &ConversationId) -> Result<Conversation, StorageError> {
        let path = self.meta_path(id);
        if !path.exists() {
            return Err(StorageError::not_found("conversation", id.as_str()));
        }
        let raw = std::fs::read_to_string(&path)?;
        Ok(serde_yaml_ng::from_str(&raw)?)
    }

    pub fn get_conversation_by_session_key(
        &self,
        key: &SessionKey,
    ) -> Result<Option<Conversation>, StorageError> {
        let id = self.key_index.lock().get(&key.build()).cloned();
        match id {
            Some(id) => Ok(Some(self.get_conversation(&id)?)),
            None => Ok(None),
        }
    }

    pub fn update_conversation_status(
        &self,
        id: &ConversationId,
        status: ConversationStatus,
    ) -> Result<Conversation, StorageError> {
        let mut conv = self.get_conversation(id)?;
        conv.status = status;
        conv.updated_at = self.clock.epoch_ms();
        write_yaml_atomic(&self.meta_path(id), &conv)?;
        Ok(conv)
    }

    /// Append a turn, suppressing duplicates by platform message id.
    ///
    /// A duplicate returns the previously appended turn untouched with
    /// `was_duplicate = true` (at most one turn per message id).
    pub fn append_turn(
        &self,
        id: &ConversationId,
        input: TurnInput,
    ) -> Result<AppendedTurn, StorageError> {
        if input.session_id.as_str().is_empty() {
            return Err(StorageError::validation("session_id", "must not be empty"));
        }
        let mut conv = self.get_conversation(id)?;

        let state = self.state_handle(id)?;
        let mut state = state.lock();

        if let Some(message_id) = input.message_id.as_deref() {
            if state.message_ids.contains(message_id) {
                let existing = self
                    .scan_turns(id)?
                    .turns
                    .into_iter()
                    .find(|t| t.message_id.as_deref() == Some(message_id))
                    .ok_or_else(|| StorageError::not_found("turn", message_id))?;
                self.emit(StoreEvent::TurnAppended {
                    conversation_id: id.clone(),
                    seq: existing.seq,
                    was_duplicate: true,
                });
                return Ok(AppendedTurn {
                    turn: existing,
                    was_duplicate: true,
                });
            }
        }

        let turn = Turn {
            ts: input.ts.unwrap_or_else(|| self.clock.epoch_ms()),
            seq: state.next_seq,
            role: input.role,
            session_id: input.session_id,
            event_range: input.event_range,
            message_id: input.message_id,
            metadata: input.metadata,
        };

        let mut line = serde_json::to_vec(&turn)?;
        line.push(b'\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.turns_path(id))?;
        file.write_all(&line)?;
        file.flush()?;

        state.next_seq = turn.seq + 1;
        if let Some(message_id) = turn.message_id.clone() {
            state.message_ids.insert(message_id);
        }

        conv.turn_count += 1;
        conv.updated_at = self.clock.epoch_ms();
        write_yaml_atomic(&self.meta_path(id), &conv)?;

        self.emit(StoreEvent::TurnAppended {
            conversation_id: id.clone(),
            seq: turn.seq,
            was_duplicate: false,
        });

        Ok(AppendedTurn {
            turn,
            was_duplicate: false,
        })
    }

    /// Read all turns, skipping malformed lines.
    ///
    /// Emits `turn_recovered` when any line had to be skipped.
    pub fn read_turns(&self, id: &ConversationId) -> Result<ReadTurns, StorageError> {
        if !self.meta_path(id).exists() {
            return Err(StorageError::not_found("conversation", id.as_str()));
        }
        let read = self.scan_turns(id)?;
        if read.skipped > 0 {
            self.emit(StoreEvent::TurnRecovered {
                conversation_id: id.clone(),
                recovered: read.turns.len(),
                skipped: read.skipped,
            });
        }
        Ok(read)
    }

    fn scan_turns(&self, id: &ConversationId) -> Result<ReadTurns, StorageError> {
        let path = self.turns_path(id);
        if !path.exists() {
            return Ok(ReadTurns {
                turns: Vec::new(),
                skipped: 0,
            });
        }
        let raw = std::fs::read_to_string(&path)?;
        let mut turns = Vec::new();
        let mut skipped = 0usize;
        for line in raw.split_inclusive('\n') {
            let complete = line.ends_with('\n');
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            if !complete {
                warn!(conversation_id = %id, "skipping crash-truncated turn line");
                skipped += 1;
                continue;
            }
            match serde_json::from_str::<Turn>(trimmed) {
                Ok(turn) => turns.push(turn),
                Err(e) => {
                    warn!(conversation_id = %id, error = %e, "skipping malformed turn line");
                    skipped += 1;
                }
            }
        }
        Ok(ReadTurns { turns, skipped })
    }

    fn state_handle(&self, id: &ConversationId) -> Result<Arc<Mutex<ConvState>>, StorageError> {
        if let Some(handle) = self.states.lock().get(id.as_str()) {
            return Ok(Arc::clone(handle));
        }

        let scan = self.scan_turns(id)?;
        let next_seq = scan.turns.iter().map(|t| t.seq + 1).max().unwrap_or(0);
        let message_ids = scan
            .turns
            .iter()
            .filter_map(|t| t.message_id.clone())
            .collect();

        let mut states = self.states.lock();
        let handle = states
            .entry(id.as_str().to_string())
            .or_insert_with(|| Arc::new(Mutex::new(ConvState {
                next_seq,
                message_ids,
            })));
        Ok(Arc::clone(handle))
    }
}

#[cfg(test)]
#[path = "conversation_store_tests.rs"]
mod tests;
