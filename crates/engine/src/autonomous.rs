// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Autonomous work loop with a circuit breaker.
//!
//! The loop polls a task source and processes at most one task per
//! iteration. Consecutive failures trip the breaker: the loop pauses, a
//! cooldown timer half-opens the circuit, and the next outcome decides
//! whether it closes (success) or re-opens (failure). `resume()` against an
//! open breaker returns a typed `CIRCUIT_OPEN` error carrying the
//! remaining cooldown.

use crate::bus::{EngineEvent, EventBus};
use crate::error::EngineError;
use async_trait::async_trait;
use kbot_core::{AutonomousCheckpoint, CircuitState, Clock, LoopState, SystemClock};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::{info, warn};

/// Autonomous loop configuration.
#[derive(Debug, Clone)]
pub struct AutonomousConfig {
    pub poll_interval: Duration,
    pub error_threshold: u32,
    pub cooldown: Duration,
}

impl Default for AutonomousConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            error_threshold: 3,
            cooldown: Duration::from_secs(60),
        }
    }
}

/// Source of autonomous work.
#[async_trait]
pub trait TaskSource: Send + Sync + 'static {
    /// Fetch the next task, if any.
    async fn next_task(&self) -> Result<Option<String>, String>;

    /// Process one task.
    async fn process(&self, task: &str) -> Result<(), String>;
}

struct Circuit {
    state: CircuitState,
    tripped_at: Option<(Instant, u64)>,
}

/// The autonomous loop.
pub struct AutonomousLoop<C: Clock = SystemClock> {
    config: AutonomousConfig,
    bus: EventBus,
    clock: C,
    state: Mutex<LoopState>,
    circuit: Mutex<Circuit>,
    consecutive_errors: AtomicU32,
    iterations: AtomicU64,
    /// Invalidates stale cooldown timers after a re-trip or reset.
    trip_generation: AtomicU64,
    current_task: Mutex<Option<String>>,
    source: Mutex<Option<Arc<dyn TaskSource>>>,
    /// Health gate consulted by `start()`.
    healthy: Arc<dyn Fn() -> bool + Send + Sync>,
    wake: Notify,
}

impl<C: Clock> AutonomousLoop<C> {
    pub fn new(
        config: AutonomousConfig,
        bus: EventBus,
        clock: C,
        healthy: Arc<dyn Fn() -> bool + Send + Sync>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            bus,
            clock,
            state: Mutex::new(LoopState::Idle),
            circuit: Mutex::new(Circuit {
                state: CircuitState::Closed,
                tripped_at: None,
            }),
            consecutive_errors: AtomicU32::new(0),
            iterations: AtomicU64::new(0),
            trip_generation: AtomicU64::new(0),
            current_task: Mutex::new(None),
            source: Mutex::new(None),
            healthy,
            wake: Notify::new(),
        })
    }

    pub fn state(&self) -> LoopState {
        *self.state.lock()
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.circuit.lock().state
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors.load(Ordering::SeqCst)
    }

    /// Start the loop. Requires the agent lifecycle to report healthy.
    pub fn start(
        self: &Arc<Self>,
        source: Arc<dyn TaskSource>,
    ) -> Result<(), EngineError> {
        if !(self.healthy)() {
            return Err(EngineError::NotHealthy);
        }
        {
            let mut state = self.state.lock();
            if *state != LoopState::Idle {
                return Err(EngineError::InvalidState {
                    op: "start",
                    state: format!("{state:?}"),
                });
            }
            *state = LoopState::Running;
        }
        *self.source.lock() = Some(Arc::clone(&source));
        tokio::spawn(run_loop(Arc::clone(self)));
        Ok(())
    }

    /// Pause without touching the breaker.
    pub fn pause(&self) {
        let mut state = self.state.lock();
        if *state == LoopState::Running {
            *state = LoopState::Paused;
        }
        drop(state);
        self.wake.notify_waiters();
    }

    /// Resume a paused loop. Fails typed while the breaker is open.
    pub fn resume(self: &Arc<Self>) -> Result<(), EngineError> {
        {
            let circuit = self.circuit.lock();
            if circuit.state == CircuitState::Open {
                let elapsed = circuit
                    .tripped_at
                    .map(|(at, _)| at.elapsed())
                    .unwrap_or_default();
                let remaining = self.config.cooldown.saturating_sub(elapsed);
                return Err(EngineError::CircuitOpen {
                    remaining_ms: remaining.as_millis() as u64,
                });
            }
        }
        {
            let mut state = self.state.lock();
            if *state != LoopState::Paused {
                return Err(EngineError::InvalidState {
                    op: "resume",
                    state: format!("{state:?}"),
                });
            }
            *state = LoopState::Running;
        }
        tokio::spawn(run_loop(Arc::clone(self)));
        Ok(())
    }

    /// Stop the loop; it exits at the next suspension point.
    pub async fn stop(&self) {
        {
            let mut state = self.state.lock();
            if *state == LoopState::Idle {
                return;
            }
            *state = LoopState::Stopping;
        }
        self.wake.notify_waiters();
        // The loop task flips Stopping -> Idle on exit; reflect it here for
        // callers that stop before any task was ever started.
        tokio::task::yield_now().await;
        let mut state = self.state.lock();
        if *state == LoopState::Stopping {
            *state = LoopState::Idle;
        }
    }

    /// Operator override: force the breaker closed and zero the counters.
    pub fn reset_circuit_breaker(&self) {
        self.trip_generation.fetch_add(1, Ordering::SeqCst);
        let mut circuit = self.circuit.lock();
        circuit.state = CircuitState::Closed;
        circuit.tripped_at = None;
        drop(circuit);
        self.consecutive_errors.store(0, Ordering::SeqCst);
        info!("circuit breaker reset by operator");
    }

    pub fn checkpoint(&self) -> AutonomousCheckpoint {
        let circuit = self.circuit.lock();
        AutonomousCheckpoint {
            state: self.state(),
            circuit: circuit.state,
            consecutive_errors: self.consecutive_errors.load(Ordering::SeqCst),
            tripped_at_ms: circuit.tripped_at.map(|(_, epoch)| epoch),
            current_task: self.current_task.lock().clone(),
        }
    }

    /// Restore from a checkpoint; accepted only while idle.
    pub fn restore(&self, checkpoint: &AutonomousCheckpoint) -> bool {
        if self.state() != LoopState::Idle {
            return false;
        }
        let mut circuit = self.circuit.lock();
        circuit.state = checkpoint.circuit;
        circuit.tripped_at = checkpoint
            .tripped_at_ms
            .map(|epoch| (Instant::now(), epoch));
        drop(circuit);
        self.consecutive_errors
            .store(checkpoint.consecutive_errors, Ordering::SeqCst);
        *self.current_task.lock() = checkpoint.current_task.clone();
        true
    }

    /// One failed poll or process.
    fn record_failure(self: &Arc<Self>, context: &str) {
        let errors = self.consecutive_errors.fetch_add(1, Ordering::SeqCst) + 1;
        warn!(errors, context, "autonomous task failure");

        let should_trip = {
            let circuit = self.circuit.lock();
            match circuit.state {
                // A half-open probe failure re-opens immediately
                CircuitState::HalfOpen => true,
                CircuitState::Closed => errors >= self.config.error_threshold,
                CircuitState::Open => false,
            }
        };
        if should_trip {
            self.trip(errors);
        }
    }

    /// One successful task.
    fn record_success(&self) {
        self.consecutive_errors.store(0, Ordering::SeqCst);
        let mut circuit = self.circuit.lock();
        if circuit.state == CircuitState::HalfOpen {
            circuit.state = CircuitState::Closed;
            circuit.tripped_at = None;
            drop(circuit);
            self.bus.emit(EngineEvent::CircuitReset);
        }
    }

    fn trip(self: &Arc<Self>, errors: u32) {
        let generation = self.trip_generation.fetch_add(1, Ordering::SeqCst) + 1;
        {
            let mut circuit = self.circuit.lock();
            circuit.state = CircuitState::Open;
            circuit.tripped_at = Some((Instant::now(), self.clock.epoch_ms()));
        }
        {
            let mut state = self.state.lock();
            if *state == LoopState::Running {
                *state = LoopState::Paused;
            }
        }
        self.wake.notify_waiters();
        self.bus.emit(EngineEvent::CircuitTripped { errors });

        // Cooldown timer: half-open unless a reset or re-trip superseded us
        let this = Arc::clone(self);
        let cooldown = self.config.cooldown;
        tokio::spawn(async move {
            tokio::time::sleep(cooldown).await;
            if this.trip_generation.load(Ordering::SeqCst) != generation {
                return;
            }
            {
                let mut circuit = this.circuit.lock();
                if circuit.state != CircuitState::Open {
                    return;
                }
                circuit.state = CircuitState::HalfOpen;
            }
            info!("circuit breaker half-open after cooldown");

            // Let the loop probe: the next task outcome closes or re-opens
            let resume = {
                let mut state = this.state.lock();
                if *state == LoopState::Paused {
                    *state = LoopState::Running;
                    true
                } else {
                    false
                }
            };
            if resume {
                tokio::spawn(run_loop(Arc::clone(&this)));
            }
        });
    }
}

async fn run_loop<C: Clock>(this: Arc<AutonomousLoop<C>>) {
    let source = this.source.lock().clone();
    let Some(source) = source else {
        return;
    };

    loop {
        if this.state() != LoopState::Running {
            break;
        }

        let n = this.iterations.fetch_add(1, Ordering::SeqCst) + 1;
        this.bus.emit(EngineEvent::LoopIteration { n });

        match source.next_task().await {
            Err(e) => this.record_failure(&e),
            Ok(None) => {}
            Ok(Some(task)) => {
                if this.state() != LoopState::Running {
                    break;
                }
                *this.current_task.lock() = Some(task.clone());
                match source.process(&task).await {
                    Ok(()) => this.record_success(),
                    Err(e) => this.record_failure(&e),
                }
                *this.current_task.lock() = None;
            }
        }

        if this.state() != LoopState::Running {
            break;
        }
        tokio::select! {
            _ = tokio::time::sleep(this.config.poll_interval) => {}
            _ = this.wake.notified() => {}
        }
    }

    let mut state = this.state.lock();
    if *state == LoopState::Stopping {
        *state = LoopState::Idle;
    }
}

#[cfg(test)]
#[path = "autonomous_tests.rs"]
mod tests;
