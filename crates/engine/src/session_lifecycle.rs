// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-conversation session lifecycle and context rotation.
//!
//! Each SessionKey maps to one entry holding the active agent session id,
//! the latest usage reading, and a single-slot async lock. All mutating
//! operations for one key run under that lock; distinct keys proceed in
//! parallel. Rotation is decided at `get_or_create_session` time from the
//! cached usage: at or past the threshold, the old session is completed and
//! a fresh one is created.

use crate::bus::{EngineEvent, EventBus};
use crate::error::EngineError;
use kbot_core::{Clock, ContextUsageUpdate, SessionId, SessionKey, SessionStatus, SystemClock};
use kbot_storage::SessionStore;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{info, warn};

/// Session lifecycle configuration.
#[derive(Debug, Clone)]
pub struct SessionLifecycleConfig {
    /// Usage fraction at which the session rotates.
    pub rotation_threshold: f64,
}

impl Default for SessionLifecycleConfig {
    fn default() -> Self {
        Self {
            rotation_threshold: 0.70,
        }
    }
}

/// How the returned session id came to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionOutcome {
    /// The existing active session was reused.
    Existing,
    /// First session for this key.
    Created,
    /// Usage crossed the threshold; a fresh session replaced `previous`.
    Rotated { previous: SessionId },
}

/// Result of `get_or_create_session`.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionResolution {
    pub session_id: SessionId,
    pub outcome: ResolutionOutcome,
}

#[derive(Default)]
struct KeyState {
    active: Option<SessionId>,
    usage: Option<ContextUsageUpdate>,
}

struct KeyEntry {
    /// Single-slot lock serializing all mutations for this key.
    state: tokio::sync::Mutex<KeyState>,
}

/// Maps session keys to active agent sessions and rotates on demand.
pub struct SessionLifecycleManager<C: Clock = SystemClock> {
    config: SessionLifecycleConfig,
    bus: EventBus,
    sessions: Arc<SessionStore<C>>,
    entries: Mutex<HashMap<String, Arc<KeyEntry>>>,
}

impl<C: Clock> SessionLifecycleManager<C> {
    pub fn new(
        config: SessionLifecycleConfig,
        bus: EventBus,
        sessions: Arc<SessionStore<C>>,
    ) -> Self {
        Self {
            config,
            bus,
            sessions,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn entry(&self, key: &SessionKey) -> Arc<KeyEntry> {
        let mut entries = self.entries.lock();
        Arc::clone(entries.entry(key.build()).or_insert_with(|| {
            Arc::new(KeyEntry {
                state: tokio::sync::Mutex::new(KeyState::default()),
            })
        }))
    }

    /// Resolve the active session for a key, rotating first when the cached
    /// usage is at or past the threshold. `factory` allocates a fresh agent
    /// session id (and is expected to persist it).
    pub async fn get_or_create_session<F, Fut>(
        &self,
        key: &SessionKey,
        factory: F,
    ) -> Result<SessionResolution, EngineError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<SessionId, EngineError>>,
    {
        let entry = self.entry(key);
        let mut state = entry.state.lock().await;

        let active = state.active.clone();
        let percentage = state.usage.as_ref().map(|u| u.percentage).unwrap_or(0.0);

        match active {
            Some(active) => {
                if percentage < self.config.rotation_threshold {
                    return Ok(SessionResolution {
                        session_id: active,
                        outcome: ResolutionOutcome::Existing,
                    });
                }

                // Rotate: fresh session, previous one completed
                let previous = active;
                let new_id = factory().await?;
                if let Err(e) =
                    self.sessions
                        .update_session_status(&previous, SessionStatus::Completed, None)
                {
                    warn!(session_id = %previous, error = %e, "failed to complete rotated session");
                }
                state.active = Some(new_id.clone());
                state.usage = None;

                info!(key = %key, old = %previous, new = %new_id, pct = percentage, "session rotated");
                self.bus.emit(EngineEvent::SessionRotated {
                    key: key.build(),
                    old: previous.clone(),
                    new: new_id.clone(),
                });
                self.bus.emit(EngineEvent::SessionCompleted {
                    id: previous.clone(),
                });

                Ok(SessionResolution {
                    session_id: new_id,
                    outcome: ResolutionOutcome::Rotated { previous },
                })
            }
            None => {
                let new_id = factory().await?;
                state.active = Some(new_id.clone());
                state.usage = None;

                self.bus.emit(EngineEvent::SessionCreated {
                    key: key.build(),
                    session_id: new_id.clone(),
                });

                Ok(SessionResolution {
                    session_id: new_id,
                    outcome: ResolutionOutcome::Created,
                })
            }
        }
    }

    /// Record the latest usage reading. Pure state update; the rotation
    /// decision happens at the next `get_or_create_session`.
    pub async fn update_context_usage(&self, key: &SessionKey, update: ContextUsageUpdate) {
        let entry = self.entry(key);
        let mut state = entry.state.lock().await;
        state.usage = Some(update);
    }

    /// The cached usage for a key, if any.
    pub async fn cached_usage(&self, key: &SessionKey) -> Option<ContextUsageUpdate> {
        let entry = self.entry(key);
        let state = entry.state.lock().await;
        state.usage.clone()
    }

    /// The active session id for a key, if any.
    pub async fn active_session(&self, key: &SessionKey) -> Option<SessionId> {
        let entry = self.entry(key);
        let state = entry.state.lock().await;
        state.active.clone()
    }
}

#[cfg(test)]
#[path = "session_lifecycle_tests.rs"]
mod tests;
