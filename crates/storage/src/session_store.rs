// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-session metadata and append-only event log.
//!
//! Layout: `<base>/agent-sessions/<id>/session.yaml` + `events.jsonl`.
//! Each event is one line of JSON with a trailing newline, so a crash mid-
//! write leaves a detectable partial tail that readers skip with a warning.
//!
//! Appends are single-writer per session: callers go through one store and
//! the store serializes appends with a per-session lock. Sequence numbers
//! are dense from 0 under normal operation; readers tolerate gaps.

use crate::{StorageError, StoreEvent, StoreObserver};
use kbot_core::{
    AgentSession, Clock, ConversationId, EventBody, EventRange, SessionEvent, SessionId,
    SessionStatus, SystemClock,
};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;

/// Input for `create_session`.
#[derive(Debug, Clone, Default)]
pub struct CreateSession {
    /// Explicit id; a fresh ULID is generated when absent.
    pub id: Option<SessionId>,
    pub conversation_id: Option<ConversationId>,
    pub agent_type: String,
    pub session_key: Option<String>,
}

/// Input for `append_event`.
#[derive(Debug, Clone)]
pub struct AppendEvent {
    pub session_id: SessionId,
    pub body: EventBody,
    pub trace_id: Option<String>,
    /// Auto-assigned from the clock when omitted.
    pub ts: Option<u64>,
}

/// Assigned coordinates of an appended event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Appended {
    pub ts: u64,
    pub seq: u64,
}

/// Result of reading an event log.
#[derive(Debug, Clone)]
pub struct ReadEvents {
    pub events: Vec<SessionEvent>,
    /// Lines skipped as corrupt or crash-truncated.
    pub skipped: usize,
}

struct SessionLog {
    /// Next sequence number to assign.
    next_seq: u64,
}

/// Store for agent sessions: one `session.yaml` + `events.jsonl` per session.
pub struct SessionStore<C: Clock = SystemClock> {
    base_dir: PathBuf,
    clock: C,
    /// Per-session append state; the inner lock serializes writers.
    logs: Mutex<HashMap<String, Arc<Mutex<SessionLog>>>>,
    observer: Mutex<Option<StoreObserver>>,
}

impl<C: Clock> SessionStore<C> {
    /// Create a store rooted at `<base_dir>/agent-sessions`.
    pub fn new(base_dir: impl Into<PathBuf>, clock: C) -> Self {
        Self {
            base_dir: base_dir.into().join("agent-sessions"),
            clock,
            logs: Mutex::new(HashMap::new()),
            observer: Mutex::new(None),
        }
    }

    /// Register a non-blocking observer for store events.
    pub fn set_observer(&self, observer: StoreObserver) {
        *self.observer.lock() = Some(observer);
    }

    fn emit(&self, event: StoreEvent) {
        if let Some(observer) = self.observer.lock().clone() {
            observer(event);
        }
    }

    fn session_dir(&self, id: &SessionId) -> PathBuf {
        self.base_dir.join(id.as_str())
    }

    fn meta_path(&self, id: &SessionId) -> PathBuf {
        self.session_dir(id).join("session.yaml")
    }

    fn events_path(&self, id: &SessionId) -> PathBuf {
        self.session_dir(id).join("events.jsonl")
    }

    /// Create a session and persist its metadata.
    pub fn create_session(&self, input: CreateSession) -> Result<AgentSession, StorageError> {
        if input.agent_type.is_empty() {
            return Err(StorageError::validation("agent_type", "must not be empty"));
        }

        let session = AgentSession {
            id: input.id.unwrap_or_else(SessionId::generate),
            conversation_id: input.conversation_id,
            agent_type: input.agent_type,
            session_key: input.session_key,
            status: SessionStatus::Active,
            started_at: self.clock.epoch_ms(),
            ended_at: None,
        };

        std::fs::create_dir_all(self.session_dir(&session.id))?;
        write_yaml_atomic(&self.meta_path(&session.id), &session)?;
        Ok(session)
    }

    /// Load session metadata.
    pub fn get_session(&self, id: &SessionId) -> Result<AgentSession, StorageError> {
        let path = self.meta_path(id);
        if !path.exists() {
            return Err(StorageError::not_found("session", id.as_str()));
        }
        let raw = std::fs::read_to_string(&path)?;
        Ok(serde_yaml_ng::from_str(&raw)?)
    }

    /// Update session status (and optionally `ended_at`).
    pub fn update_session_status(
        &self,
        id: &SessionId,
        status: SessionStatus,
        ended_at: Option<u64>,
    ) -> Result<AgentSession, StorageError> {
        let mut session = self.get_session(id)?;
        session.status = status;
        if ended_at.is_some() {
            session.ended_at = ended_at;
        } else if status != SessionStatus::Active && session.ended_at.is_none() {
            session.ended_at = Some(self.clock.epoch_ms());
        }
        write_yaml_atomic(&self.meta_path(id), &session)?;
        Ok(session)
    }

    /// Append one event, assigning `ts` and the next dense `seq`.
    pub fn append_event(&self, input: AppendEvent) -> Result<Appended, StorageError> {
        if input.session_id.as_str().is_empty() {
            return Err(StorageError::validation("session_id", "must not be empty"));
        }
        let dir = self.session_dir(&input.session_id);
        if !dir.exists() {
            return Err(StorageError::not_found(
                "session",
                input.session_id.as_str(),
            ));
        }

        let log = self.log_handle(&input.session_id)?;
        let mut log = log.lock();

        let seq = log.next_seq;
        let ts = input.ts.unwrap_or_else(|| self.clock.epoch_ms());
        let event = SessionEvent {
            ts,
            seq,
            session_id: input.session_id.clone(),
            trace_id: input.trace_id,
            body: input.body,
        };

        let mut line = serde_json::to_vec(&event)?;
        line.push(b'\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.events_path(&input.session_id))?;
        file.write_all(&line)?;
        file.flush()?;

        log.next_seq = seq + 1;
        Ok(Appended { ts, seq })
    }

    /// Read events, optionally restricted to an inclusive seq range.
    ///
    /// Corrupt lines and a crash-truncated tail are skipped with a warning
    /// and reported in `skipped`.
    pub fn read_events(
        &self,
        id: &SessionId,
        range: Option<EventRange>,
    ) -> Result<ReadEvents, StorageError> {
        let path = self.events_path(id);
        if !path.exists() {
            // A session with no appends yet has an empty log.
            if self.meta_path(id).exists() {
                return Ok(ReadEvents {
                    events: Vec::new(),
                    skipped: 0,
                });
            }
            return Err(StorageError::not_found("session", id.as_str()));
        }

        let raw = std::fs::read_to_string(&path)?;
        let (events, skipped) = parse_event_lines(&raw, id);

        if skipped > 0 {
            self.emit(StoreEvent::EventsSkipped {
                session_id: id.clone(),
                skipped,
            });
        }

        let events = match range {
            Some(range) => events
                .into_iter()
                .filter(|e| range.contains(e.seq))
                .collect(),
            None => events,
        };

        Ok(ReadEvents { events, skipped })
    }

    /// Per-session append state, scanning the log once on first touch.
    fn log_handle(&self, id: &SessionId) -> Result<Arc<Mutex<SessionLog>>, StorageError> {
        if let Some(handle) = self.logs.lock().get(id.as_str()) {
            return Ok(Arc::clone(handle));
        }

        // Scan outside the map lock; a racing first-touch is resolved below.
        let next_seq = self.scan_last_seq(id)?.map(|s| s + 1).unwrap_or(0);

        let mut logs = self.logs.lock();
        let handle = logs
            .entry(id.as_str().to_string())
            .or_insert_with(|| Arc::new(Mutex::new(SessionLog { next_seq })));
        Ok(Arc::clone(handle))
    }

    fn scan_last_seq(&self, id: &SessionId) -> Result<Option<u64>, StorageError> {
        let path = self.events_path(id);
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&path)?;
        let (events, _) = parse_event_lines(&raw, id);
        Ok(events.iter().map(|e| e.seq).max())
    }
}

/// Parse JSONL event lines, skipping corrupt entries and a newline-less tail.
fn parse_event_lines(raw: &str, id: &SessionId) -> (Vec<SessionEvent>, usize) {
    let mut events = Vec::new();
    let mut skipped = 0usize;

    for line in raw.split_inclusive('\n') {
        let complete = line.ends_with('\n');
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if !complete {
            warn!(
                session_id = %id,
                "skipping crash-truncated partial event line"
            );
            skipped += 1;
            continue;
        }
        match serde_json::from_str::<SessionEvent>(trimmed) {
            Ok(event) => events.push(event),
            Err(e) => {
                warn!(session_id = %id, error = %e, "skipping corrupt event line");
                skipped += 1;
            }
        }
    }

    (events, skipped)
}

/// Write YAML via a temp file + atomic rename.
pub(crate) fn write_yaml_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StorageError> {
    let yaml = serde_yaml_ng::to_string(value)?;
    let tmp_path = path.with_extension("yaml.tmp");
    std::fs::write(&tmp_path, yaml.as_bytes())?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
#[path = "session_store_tests.rs"]
mod tests;
