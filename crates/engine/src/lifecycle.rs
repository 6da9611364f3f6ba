// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent subprocess lifecycle manager.
//!
//! Owns the agent instance exclusively: spawn serialization, periodic
//! health probes, crash recovery with exponential backoff, and escalation
//! when recovery stalls at maximum backoff. Monitor tasks are tied to an
//! instance generation so a stop/kill retires them promptly.

use crate::bus::{EngineEvent, EventBus};
use crate::error::EngineError;
use async_trait::async_trait;
use kbot_core::{AgentCheckpoint, LifecycleState};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{info, warn};

/// Lifecycle configuration.
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    pub max_concurrent_spawns: usize,
    pub shutdown_timeout: Duration,
    pub health_check_interval: Duration,
    pub failure_threshold: u32,
    pub backoff_min: Duration,
    pub backoff_max: Duration,
    /// Default environment injected into the agent; caller extra-env wins.
    pub agent_env: Vec<(String, String)>,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            max_concurrent_spawns: 1,
            shutdown_timeout: Duration::from_secs(10),
            health_check_interval: Duration::from_secs(30),
            failure_threshold: 3,
            backoff_min: Duration::from_secs(1),
            backoff_max: Duration::from_secs(60),
            agent_env: vec![
                ("KYNETIC_RUNTIME".to_string(), "kbot".to_string()),
                ("KYNETIC_SUPERVISED".to_string(), "1".to_string()),
            ],
        }
    }
}

/// A running agent instance (process + transport).
#[async_trait]
pub trait AgentInstance: Send + Sync {
    fn is_running(&self) -> bool;
    async fn is_reachable(&self) -> bool;
    /// Soft termination signal (close stdin).
    async fn soft_stop(&self);
    async fn kill(&self);
    async fn wait_exit(&self) -> Option<i32>;
}

/// Launches agent instances.
#[async_trait]
pub trait AgentLauncher: Send + Sync + 'static {
    async fn launch(
        &self,
        env: Vec<(String, String)>,
    ) -> Result<Arc<dyn AgentInstance>, EngineError>;
}

/// Agent subprocess lifecycle manager.
pub struct AgentLifecycle {
    launcher: Arc<dyn AgentLauncher>,
    config: LifecycleConfig,
    bus: EventBus,
    state: Mutex<LifecycleState>,
    instance: Mutex<Option<Arc<dyn AgentInstance>>>,
    spawn_permits: Arc<Semaphore>,
    spawn_waiters: AtomicUsize,
    consecutive_failures: AtomicU32,
    backoff: Mutex<Duration>,
    /// Bumped on every install/stop/kill; stale monitor tasks exit.
    generation: AtomicU64,
}

impl AgentLifecycle {
    pub fn new(
        launcher: Arc<dyn AgentLauncher>,
        config: LifecycleConfig,
        bus: EventBus,
    ) -> Arc<Self> {
        let backoff_min = config.backoff_min;
        Arc::new(Self {
            spawn_permits: Arc::new(Semaphore::new(config.max_concurrent_spawns.max(1))),
            launcher,
            bus,
            state: Mutex::new(LifecycleState::Idle),
            instance: Mutex::new(None),
            spawn_waiters: AtomicUsize::new(0),
            consecutive_failures: AtomicU32::new(0),
            backoff: Mutex::new(backoff_min),
            generation: AtomicU64::new(0),
            config,
        })
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.lock()
    }

    pub fn is_healthy(&self) -> bool {
        self.state() == LifecycleState::Healthy
    }

    pub fn current_backoff(&self) -> Duration {
        *self.backoff.lock()
    }

    /// Spawn the agent. Permitted from `idle`, `unhealthy`, or `failed`.
    ///
    /// Excess concurrent requests queue FIFO behind the spawn permit; a
    /// queued request that finds the agent healthy once dequeued returns
    /// without relaunching.
    pub fn spawn(
        self: &Arc<Self>,
        extra_env: Vec<(String, String)>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), EngineError>> + Send + '_>>
    {
        Box::pin(self.spawn_inner(extra_env))
    }

    async fn spawn_inner(
        self: &Arc<Self>,
        extra_env: Vec<(String, String)>,
    ) -> Result<(), EngineError> {
        eprintln!("DBG spawn_inner start");
        {
            // A request arriving while another spawn is in flight queues
            // behind it instead of erroring.
            let state = self.state();
            if matches!(
                state,
                LifecycleState::Healthy | LifecycleState::Stopping | LifecycleState::Terminating
            ) {
                return Err(EngineError::InvalidState {
                    op: "spawn",
                    state: state.to_string(),
                });
            }
        }

        eprintln!("DBG spawn_inner before permit");
        let permit = match self.spawn_permits.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                let depth = self.spawn_waiters.fetch_add(1, Ordering::SeqCst) + 1;
                self.bus.emit(EngineEvent::SpawnQueued { depth });
                let permit = self
                    .spawn_permits
                    .clone()
                    .acquire_owned()
                    .await
                    .map_err(|_| EngineError::SpawnFailed("spawn queue closed".into()))?;
                self.spawn_waiters.fetch_sub(1, Ordering::SeqCst);
                permit
            }
        };

        // A queued request may find the agent already up.
        let state = self.state();
        match state {
            LifecycleState::Healthy | LifecycleState::Spawning => {
                drop(permit);
                return Ok(());
            }
            LifecycleState::Stopping | LifecycleState::Terminating => {
                drop(permit);
                return Err(EngineError::InvalidState {
                    op: "spawn",
                    state: state.to_string(),
                });
            }
            _ => {}
        }

        *self.state.lock() = LifecycleState::Spawning;

        let mut env = self.config.agent_env.clone();
        for (key, value) in extra_env {
            if let Some(slot) = env.iter_mut().find(|(k, _)| *k == key) {
                slot.1 = value;
            } else {
                env.push((key, value));
            }
        }

        eprintln!("DBG spawn_inner before launch");
        match self.launcher.launch(env).await {
            Ok(instance) => {
                let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
                *self.instance.lock() = Some(Arc::clone(&instance));
                *self.state.lock() = LifecycleState::Healthy;
                self.consecutive_failures.store(0, Ordering::SeqCst);
                *self.backoff.lock() = self.config.backoff_min;

                tokio::spawn(health_loop(Arc::clone(self), generation));
                tokio::spawn(exit_watch(Arc::clone(self), instance, generation));

                eprintln!("DBG spawn_inner launched ok");
                info!("agent spawned");
                drop(permit);
                Ok(())
            }
            Err(e) => {
                *self.state.lock() = LifecycleState::Failed;
                drop(permit);
                Err(e)
            }
        }
    }

    /// Graceful stop: soft terminate, bounded wait, hard kill. Idempotent
    /// from `idle`.
    pub async fn stop(&self) -> Result<(), EngineError> {
        if self.state() == LifecycleState::Idle {
            return Ok(());
        }
        *self.state.lock() = LifecycleState::Stopping;
        self.generation.fetch_add(1, Ordering::SeqCst);

        let instance = self.instance.lock().take();
        if let Some(instance) = instance {
            instance.soft_stop().await;
            let exited = tokio::time::timeout(self.config.shutdown_timeout, instance.wait_exit())
                .await
                .is_ok();
            if !exited {
                warn!("agent did not exit within shutdown timeout; killing");
                *self.state.lock() = LifecycleState::Terminating;
                instance.kill().await;
                instance.wait_exit().await;
            }
        }

        *self.state.lock() = LifecycleState::Idle;
        self.bus.emit(EngineEvent::ShutdownComplete);
        Ok(())
    }

    /// Unconditional hard kill from any state.
    pub async fn kill(&self) {
        eprintln!("DBG kill start");
        *self.state.lock() = LifecycleState::Terminating;
        self.generation.fetch_add(1, Ordering::SeqCst);

        let instance = self.instance.lock().take();
        eprintln!("DBG kill got instance {}", instance.is_some());
        if let Some(instance) = instance {
            instance.kill().await;
            eprintln!("DBG kill called instance.kill");
            instance.wait_exit().await;
            eprintln!("DBG kill instance.wait_exit done");
        }

        *self.state.lock() = LifecycleState::Idle;
        self.bus.emit(EngineEvent::ShutdownComplete);
        eprintln!("DBG kill done");
    }

    pub fn get_checkpoint(&self) -> AgentCheckpoint {
        AgentCheckpoint {
            state: self.state(),
            backoff_ms: self.backoff.lock().as_millis() as u64,
            consecutive_failures: self.consecutive_failures.load(Ordering::SeqCst),
        }
    }

    /// Restore backoff and failure counters; accepted only from `idle`.
    pub fn restore_from_checkpoint(&self, checkpoint: &AgentCheckpoint) -> bool {
        if self.state() != LifecycleState::Idle {
            return false;
        }
        *self.backoff.lock() = Duration::from_millis(checkpoint.backoff_ms)
            .clamp(self.config.backoff_min, self.config.backoff_max);
        self.consecutive_failures
            .store(checkpoint.consecutive_failures, Ordering::SeqCst);
        true
    }

    fn generation_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }
}

/// Periodic health probe: process running and transport reachable.
async fn health_loop(lifecycle: Arc<AgentLifecycle>, generation: u64) {
    let mut interval = tokio::time::interval(lifecycle.config.health_check_interval);
    interval.tick().await; // first tick fires immediately; skip it

    loop {
        interval.tick().await;
        if !lifecycle.generation_current(generation) {
            return;
        }
        let state = lifecycle.state();
        if state.is_stopping() || state == LifecycleState::Idle {
            return;
        }

        let instance = lifecycle.instance.lock().clone();
        let Some(instance) = instance else {
            return;
        };
        let pass = instance.is_running() && instance.is_reachable().await;

        if !lifecycle.generation_current(generation) {
            return;
        }

        if pass {
            lifecycle.consecutive_failures.store(0, Ordering::SeqCst);
            if lifecycle.state() == LifecycleState::Unhealthy {
                *lifecycle.state.lock() = LifecycleState::Healthy;
                lifecycle.bus.emit(EngineEvent::HealthStatus {
                    healthy: true,
                    recovered: true,
                });
            }
        } else {
            let failures = lifecycle
                .consecutive_failures
                .fetch_add(1, Ordering::SeqCst)
                + 1;
            if failures >= lifecycle.config.failure_threshold
                && lifecycle.state() == LifecycleState::Healthy
            {
                *lifecycle.state.lock() = LifecycleState::Unhealthy;
                lifecycle.bus.emit(EngineEvent::HealthStatus {
                    healthy: false,
                    recovered: false,
                });
            }
        }
    }
}

/// Watch for unexpected exit and drive recovery.
async fn exit_watch(
    lifecycle: Arc<AgentLifecycle>,
    instance: Arc<dyn AgentInstance>,
    generation: u64,
) {
    let exit_code = instance.wait_exit().await;
    if !lifecycle.generation_current(generation) {
        return;
    }
    if lifecycle.state().is_stopping() {
        return;
    }

    warn!(?exit_code, "agent exited unexpectedly; entering recovery");
    instance.kill().await; // clear any residue
    lifecycle.instance.lock().take();
    *lifecycle.state.lock() = LifecycleState::Unhealthy;

    let delay = lifecycle.current_backoff();
    tokio::time::sleep(delay).await;
    {
        let mut backoff = lifecycle.backoff.lock();
        *backoff = (*backoff * 2).min(lifecycle.config.backoff_max);
    }

    if lifecycle.state().is_stopping() || !lifecycle.generation_current(generation) {
        return;
    }

    if let Err(e) = lifecycle.spawn(Vec::new()).await {
        warn!(error = %e, "recovery spawn failed");
        if lifecycle.current_backoff() >= lifecycle.config.backoff_max {
            lifecycle.bus.emit(EngineEvent::Escalate {
                reason: "agent recovery exhausted backoff".to_string(),
                context: format!("spawn failed at max backoff: {e}"),
            });
        }
    }
}

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
mod tests;
