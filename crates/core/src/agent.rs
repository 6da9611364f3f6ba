// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent-side state machines and their snapshot types.
//!
//! The lifecycle, autonomous-loop, and circuit-breaker states live here so
//! the engine and the checkpoint snapshots share one definition.

use serde::{Deserialize, Serialize};
use std::fmt;

/// State of the agent-subprocess lifecycle manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    Idle,
    Spawning,
    Healthy,
    Unhealthy,
    Stopping,
    Terminating,
    Failed,
}

impl LifecycleState {
    /// True while a deliberate shutdown is in progress.
    pub fn is_stopping(&self) -> bool {
        matches!(self, LifecycleState::Stopping | LifecycleState::Terminating)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LifecycleState::Idle => "idle",
            LifecycleState::Spawning => "spawning",
            LifecycleState::Healthy => "healthy",
            LifecycleState::Unhealthy => "unhealthy",
            LifecycleState::Stopping => "stopping",
            LifecycleState::Terminating => "terminating",
            LifecycleState::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// State of the autonomous work loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoopState {
    Idle,
    Running,
    Paused,
    Stopping,
}

/// Circuit breaker gate around the autonomous loop.
///
/// The trip timestamp is carried separately (as an optional) and is never
/// inspected while the breaker is `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half-open",
        };
        write!(f, "{s}")
    }
}

/// Snapshot of the lifecycle manager, restorable from `idle`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentCheckpoint {
    pub state: LifecycleState,
    pub backoff_ms: u64,
    pub consecutive_failures: u32,
}

/// Snapshot of the autonomous loop and its breaker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutonomousCheckpoint {
    pub state: LoopState,
    pub circuit: CircuitState,
    pub consecutive_errors: u32,
    /// Epoch ms when the breaker last tripped; absent while `Closed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tripped_at_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_task: Option<String>,
}

#[cfg(test)]
#[path = "agent_tests.rs"]
mod tests;
