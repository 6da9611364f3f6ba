// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Escalation to humans.
//!
//! When no automated recovery applies (lifecycle `escalate`), one record is
//! created, every configured notification channel is pinged, and an
//! acknowledgment timer starts. Acknowledged records hand their context to
//! the human; unacknowledged ones time out into a configured fallback.

use crate::bus::{EngineEvent, EventBus, FallbackAction};
use crate::error::EngineError;
use async_trait::async_trait;
use kbot_adapters::NotifyAdapter;
use kbot_core::{AgentCheckpoint, Clock, SystemClock};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

kbot_core::define_id! {
    /// Unique identifier for an escalation record (ULID).
    pub struct EscalationId;
}

/// Escalation handler configuration.
#[derive(Debug, Clone)]
pub struct EscalationConfig {
    /// How long to wait for a human before falling back.
    pub timeout: Duration,
    /// What happens when nobody acknowledges in time.
    pub fallback: FallbackAction,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5 * 60),
            fallback: FallbackAction::Pause,
        }
    }
}

/// Escalation record state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscalationState {
    Pending,
    Acknowledged,
    Timeout,
}

/// One escalation.
#[derive(Debug, Clone, PartialEq)]
pub struct EscalationRecord {
    pub id: EscalationId,
    pub reason: String,
    pub context: String,
    pub checkpoint: Option<AgentCheckpoint>,
    pub state: EscalationState,
    pub triggered_at_ms: u64,
    pub acknowledged_by: Option<String>,
}

/// Notification fan-out seam; lets the handler hold mixed channels.
#[async_trait]
pub trait EscalationChannel: Send + Sync + 'static {
    async fn send(&self, title: &str, message: &str);
}

#[async_trait]
impl<N: NotifyAdapter> EscalationChannel for N {
    async fn send(&self, title: &str, message: &str) {
        if let Err(e) = self.notify(title, message).await {
            warn!(error = %e, "escalation notification failed");
        }
    }
}

/// Creates records, notifies channels, and enforces the ack timeout.
pub struct EscalationHandler<C: Clock = SystemClock> {
    config: EscalationConfig,
    bus: EventBus,
    clock: C,
    channels: Vec<Arc<dyn EscalationChannel>>,
    records: Mutex<HashMap<String, EscalationRecord>>,
}

impl<C: Clock> EscalationHandler<C> {
    pub fn new(
        config: EscalationConfig,
        bus: EventBus,
        clock: C,
        channels: Vec<Arc<dyn EscalationChannel>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            bus,
            clock,
            channels,
            records: Mutex::new(HashMap::new()),
        })
    }

    /// Create an escalation, notify all channels, start the ack timer.
    pub async fn escalate(
        self: &Arc<Self>,
        reason: impl Into<String>,
        context: impl Into<String>,
        checkpoint: Option<AgentCheckpoint>,
    ) -> EscalationRecord {
        let record = EscalationRecord {
            id: EscalationId::generate(),
            reason: reason.into(),
            context: context.into(),
            checkpoint,
            state: EscalationState::Pending,
            triggered_at_ms: self.clock.epoch_ms(),
            acknowledged_by: None,
        };
        self.records
            .lock()
            .insert(record.id.as_str().to_string(), record.clone());
        self.bus.emit(EngineEvent::EscalationCreated {
            id: record.id.as_str().to_string(),
        });

        let title = format!("kbot escalation: {}", record.reason);
        let body = format!("{}\n\nid: {}", record.context, record.id);
        for channel in &self.channels {
            channel.send(&title, &body).await;
        }

        // Ack timer; resolved records ignore the expiry
        let this = Arc::clone(self);
        let id = record.id.clone();
        let timeout = self.config.timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            this.expire(&id);
        });

        record
    }

    /// Human takes over: pending → acknowledged, timer is disarmed, and the
    /// record (with its handoff context) is returned.
    pub fn acknowledge(
        &self,
        id: &EscalationId,
        human: Option<String>,
    ) -> Result<EscalationRecord, EngineError> {
        let mut records = self.records.lock();
        let record = records
            .get_mut(id.as_str())
            .ok_or_else(|| EngineError::EscalationNotFound(id.to_string()))?;
        if record.state != EscalationState::Pending {
            return Err(EngineError::EscalationNotPending { id: id.to_string() });
        }
        record.state = EscalationState::Acknowledged;
        record.acknowledged_by = human;
        let record = record.clone();
        drop(records);

        info!(id = %record.id, "escalation acknowledged");
        self.bus.emit(EngineEvent::EscalationAcknowledged {
            id: record.id.as_str().to_string(),
        });
        Ok(record)
    }

    pub fn get(&self, id: &EscalationId) -> Option<EscalationRecord> {
        self.records.lock().get(id.as_str()).cloned()
    }

    pub fn pending(&self) -> Vec<EscalationRecord> {
        self.records
            .lock()
            .values()
            .filter(|r| r.state == EscalationState::Pending)
            .cloned()
            .collect()
    }

    fn expire(&self, id: &EscalationId) {
        let mut records = self.records.lock();
        let Some(record) = records.get_mut(id.as_str()) else {
            return;
        };
        if record.state != EscalationState::Pending {
            return;
        }
        record.state = EscalationState::Timeout;
        drop(records);

        warn!(id = %id, fallback = ?self.config.fallback, "escalation timed out");
        self.bus.emit(EngineEvent::EscalationFallback {
            id: id.as_str().to_string(),
            fallback: self.config.fallback,
        });
    }
}

#[cfg(test)]
#[path = "escalation_tests.rs"]
mod tests;
