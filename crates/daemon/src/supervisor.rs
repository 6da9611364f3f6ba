// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The supervisor: parent process keeping one bot child alive.
//!
//! Mediates planned restarts over IPC (checkpoint handshake), survives
//! crashes by synthesizing a crash checkpoint and respawning with
//! exponential backoff, and escalates to the operator once the backoff is
//! pinned at its ceiling. A clean child exit (code 0) ends supervision.

use crate::env::{
    CHECKPOINT_PATH_ENV, SUPERVISED_ENV, SUPERVISOR_PID_ENV, SUPERVISOR_SOCKET_ENV,
};
use crate::ipc::{self, ChildMessage, IpcError, SupervisorMessage};
use kbot_core::{Clock, RestartReason, SupervisorCheckpoint, SystemClock, WakeContext};
use kbot_storage::CheckpointStore;
use parking_lot::Mutex;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, Notify};
use tracing::{error, info, warn};

/// Supervisor configuration.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Child executable.
    pub child_program: PathBuf,
    /// Extra arguments passed to every child spawn.
    pub child_args: Vec<String>,
    /// Data directory (checkpoints, socket).
    pub data_dir: PathBuf,
    pub shutdown_timeout: Duration,
    pub min_backoff: Duration,
    pub max_backoff: Duration,
}

impl SupervisorConfig {
    pub fn new(child_program: impl Into<PathBuf>, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            child_program: child_program.into(),
            child_args: Vec::new(),
            data_dir: data_dir.into(),
            shutdown_timeout: Duration::from_secs(30),
            min_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
        }
    }

    pub fn socket_path(&self) -> PathBuf {
        self.data_dir.join("supervisor.sock")
    }
}

/// Supervisor state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Idle,
    Spawning,
    Running,
    Respawning,
    ShuttingDown,
    Terminated,
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SupervisorState::Idle => "idle",
            SupervisorState::Spawning => "spawning",
            SupervisorState::Running => "running",
            SupervisorState::Respawning => "respawning",
            SupervisorState::ShuttingDown => "shutting-down",
            SupervisorState::Terminated => "terminated",
        };
        write!(f, "{s}")
    }
}

/// Supervisor observations.
#[derive(Debug, Clone, PartialEq)]
pub enum SupervisorEvent {
    Spawn { pid: u32 },
    Exit { code: Option<i32> },
    Respawn { attempt: u32, delay_ms: u64 },
    EscalationLevel { failures: u32 },
    RestartAck { checkpoint: PathBuf },
    IpcError { message: String },
    StateChange {
        from: SupervisorState,
        to: SupervisorState,
    },
}

/// How supervision ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorOutcome {
    /// Child exited 0 on its own.
    CleanExit,
    /// `shutdown()` was requested.
    ShutDown,
}

/// Supervisor errors
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("failed to spawn child: {0}")]
    SpawnFailed(std::io::Error),

    #[error("failed to bind supervisor socket at {0}: {1}")]
    BindFailed(PathBuf, std::io::Error),

    #[error("storage error: {0}")]
    Storage(#[from] kbot_storage::StorageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Parent process managing one bot child.
pub struct Supervisor<C: Clock = SystemClock> {
    config: SupervisorConfig,
    checkpoints: CheckpointStore<C>,
    state: Mutex<SupervisorState>,
    pending_checkpoint: Mutex<Option<PathBuf>>,
    shutting_down: AtomicBool,
    child_pid: AtomicU32,
    child_exited: Notify,
    backoff: Mutex<Duration>,
    failures: AtomicU32,
    respawn_attempts: AtomicU32,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<SupervisorEvent>>>,
}

impl<C: Clock> Supervisor<C> {
    /// Create a supervisor; sweeps expired checkpoints immediately.
    pub fn new(
        config: SupervisorConfig,
        clock: C,
        initial_checkpoint: Option<PathBuf>,
    ) -> Result<Arc<Self>, SupervisorError> {
        std::fs::create_dir_all(&config.data_dir)?;
        let checkpoints = CheckpointStore::new(&config.data_dir, clock);
        let swept = checkpoints.sweep_expired()?;
        if swept > 0 {
            info!(swept, "removed expired checkpoints at startup");
        }

        let min_backoff = config.min_backoff;
        Ok(Arc::new(Self {
            checkpoints,
            state: Mutex::new(SupervisorState::Idle),
            pending_checkpoint: Mutex::new(initial_checkpoint),
            shutting_down: AtomicBool::new(false),
            child_pid: AtomicU32::new(0),
            child_exited: Notify::new(),
            backoff: Mutex::new(min_backoff),
            failures: AtomicU32::new(0),
            respawn_attempts: AtomicU32::new(0),
            subscribers: Mutex::new(Vec::new()),
            config,
        }))
    }

    pub fn state(&self) -> SupervisorState {
        *self.state.lock()
    }

    pub fn pending_checkpoint(&self) -> Option<PathBuf> {
        self.pending_checkpoint.lock().clone()
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<SupervisorEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(tx);
        rx
    }

    fn emit(&self, event: SupervisorEvent) {
        self.subscribers
            .lock()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn set_state(&self, to: SupervisorState) {
        let mut state = self.state.lock();
        let from = *state;
        if from == to {
            return;
        }
        *state = to;
        drop(state);
        self.emit(SupervisorEvent::StateChange { from, to });
    }

    /// Supervise until clean exit or shutdown.
    pub async fn run(self: Arc<Self>) -> Result<SupervisorOutcome, SupervisorError> {
        // The IPC socket outlives individual children
        let socket_path = self.config.socket_path();
        if socket_path.exists() {
            std::fs::remove_file(&socket_path)?;
        }
        let listener = UnixListener::bind(&socket_path)
            .map_err(|e| SupervisorError::BindFailed(socket_path.clone(), e))?;
        tokio::spawn(accept_ipc(Arc::clone(&self), listener));

        loop {
            if self.shutting_down.load(Ordering::SeqCst) {
                self.set_state(SupervisorState::Terminated);
                return Ok(SupervisorOutcome::ShutDown);
            }

            self.set_state(SupervisorState::Spawning);
            let mut child = match self.spawn_child() {
                Ok(child) => child,
                Err(e) => {
                    error!(error = %e, "child spawn failed");
                    self.schedule_respawn().await;
                    continue;
                }
            };
            let pid = child.id().unwrap_or_default();
            self.child_pid.store(pid, Ordering::SeqCst);
            self.set_state(SupervisorState::Running);
            self.emit(SupervisorEvent::Spawn { pid });

            let status = child.wait().await;
            let code = status.as_ref().ok().and_then(|s| s.code());
            self.child_pid.store(0, Ordering::SeqCst);
            self.emit(SupervisorEvent::Exit { code });
            self.child_exited.notify_waiters();

            if self.shutting_down.load(Ordering::SeqCst) {
                self.set_state(SupervisorState::Terminated);
                return Ok(SupervisorOutcome::ShutDown);
            }

            if code == Some(0) {
                // Clean stop: reset and end supervision
                info!("child exited cleanly");
                *self.backoff.lock() = self.config.min_backoff;
                self.failures.store(0, Ordering::SeqCst);

                if self.pending_checkpoint.lock().is_some() {
                    // Planned restart: the acked checkpoint seeds the next spawn
                    info!("planned restart: respawning with pending checkpoint");
                    continue;
                }
                self.set_state(SupervisorState::Terminated);
                return Ok(SupervisorOutcome::CleanExit);
            }

            // Crash path: make sure the next incarnation has wake context
            warn!(?code, "child crashed");
            if self.pending_checkpoint.lock().is_none() {
                match self.synthesize_crash_checkpoint() {
                    Ok(path) => {
                        *self.pending_checkpoint.lock() = Some(path);
                    }
                    Err(e) => warn!(error = %e, "failed to synthesize crash checkpoint"),
                }
            }
            self.schedule_respawn().await;
        }
    }

    /// Emit respawn/escalation events and sleep the current backoff.
    async fn schedule_respawn(&self) {
        self.set_state(SupervisorState::Respawning);
        let attempt = self.respawn_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        let failures = self.failures.fetch_add(1, Ordering::SeqCst) + 1;
        let delay = *self.backoff.lock();

        self.emit(SupervisorEvent::Respawn {
            attempt,
            delay_ms: delay.as_millis() as u64,
        });
        if delay >= self.config.max_backoff {
            self.emit(SupervisorEvent::EscalationLevel { failures });
        }

        tokio::time::sleep(delay).await;

        let mut backoff = self.backoff.lock();
        *backoff = (*backoff * 2).min(self.config.max_backoff);
    }

    /// Fork the child, consuming the pending checkpoint if one exists.
    fn spawn_child(&self) -> Result<tokio::process::Child, SupervisorError> {
        let checkpoint = self.pending_checkpoint.lock().take();

        let mut cmd = tokio::process::Command::new(&self.config.child_program);
        cmd.args(&self.config.child_args)
            .env(SUPERVISED_ENV, "1")
            .env(SUPERVISOR_PID_ENV, std::process::id().to_string())
            .env(
                SUPERVISOR_SOCKET_ENV,
                self.config.socket_path().display().to_string(),
            );
        if let Some(checkpoint) = &checkpoint {
            cmd.arg("--checkpoint").arg(checkpoint);
            cmd.env(CHECKPOINT_PATH_ENV, checkpoint.display().to_string());
        }

        cmd.spawn().map_err(SupervisorError::SpawnFailed)
    }

    /// Durable wake context for a child that died without warning.
    fn synthesize_crash_checkpoint(&self) -> Result<PathBuf, SupervisorError> {
        let checkpoint = SupervisorCheckpoint::new(
            "unknown",
            RestartReason::Crash,
            WakeContext {
                prompt: "The previous bot process crashed unexpectedly. Review recent \
                         conversation state and resume pending work."
                    .to_string(),
                pending_work: None,
                instructions: None,
            },
            chrono::Utc::now().to_rfc3339(),
        );
        Ok(self.checkpoints.write(&checkpoint)?)
    }

    /// Planned-restart handshake: validate the checkpoint, record it, ack.
    ///
    /// Returns the reply for the child. Unreadable checkpoints are rejected
    /// without recording anything.
    pub fn handle_child_message(&self, msg: ChildMessage) -> Option<SupervisorMessage> {
        match msg {
            ChildMessage::PlannedRestart { checkpoint } => {
                let path = PathBuf::from(&checkpoint);
                match std::fs::read_to_string(&path) {
                    Ok(_) => {
                        info!(checkpoint = %path.display(), "planned restart acknowledged");
                        *self.pending_checkpoint.lock() = Some(path.clone());
                        self.emit(SupervisorEvent::RestartAck { checkpoint: path });
                        Some(SupervisorMessage::RestartAck)
                    }
                    Err(e) => {
                        warn!(checkpoint = %path.display(), error = %e, "planned restart rejected");
                        Some(SupervisorMessage::Error {
                            message: format!("checkpoint not readable: {e}"),
                        })
                    }
                }
            }
            ChildMessage::Error { message } => {
                warn!(message, "child reported error");
                None
            }
            ChildMessage::Unknown => {
                warn!("dropping unknown IPC message from child");
                None
            }
        }
    }

    /// Terminate the child and end supervision. Idempotent.
    pub async fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.set_state(SupervisorState::ShuttingDown);

        let pid = self.child_pid.load(Ordering::SeqCst);
        if pid == 0 {
            self.set_state(SupervisorState::Terminated);
            return;
        }

        // Register interest before signaling so a fast exit cannot slip
        // between the SIGTERM and the wait.
        let notified = self.child_exited.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        send_signal(pid, nix::sys::signal::Signal::SIGTERM);
        let exited = tokio::time::timeout(self.config.shutdown_timeout, notified)
            .await
            .is_ok();
        if !exited {
            warn!(pid, "child ignored SIGTERM; sending SIGKILL");
            send_signal(pid, nix::sys::signal::Signal::SIGKILL);
            let _ = tokio::time::timeout(
                Duration::from_secs(5),
                self.child_exited.notified(),
            )
            .await;
        }
    }

    /// Backoff currently scheduled for the next respawn.
    pub fn current_backoff(&self) -> Duration {
        *self.backoff.lock()
    }

    pub fn checkpoint_store(&self) -> &CheckpointStore<C> {
        &self.checkpoints
    }

    /// Access for crash-checkpoint assertions in tests.
    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }
}

fn send_signal(pid: u32, signal: nix::sys::signal::Signal) {
    if let Err(e) = nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid as i32), signal) {
        warn!(pid, error = %e, "failed to signal child");
    }
}

/// Accept child IPC connections for the lifetime of the supervisor.
async fn accept_ipc<C: Clock>(supervisor: Arc<Supervisor<C>>, listener: UnixListener) {
    loop {
        match listener.accept().await {
            Ok((stream, _)) => {
                tokio::spawn(serve_child(Arc::clone(&supervisor), stream));
            }
            Err(e) => {
                supervisor.emit(SupervisorEvent::IpcError {
                    message: e.to_string(),
                });
                // Accept errors are transient; never fatal
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
}

/// Serve one child connection until it closes.
async fn serve_child<C: Clock>(supervisor: Arc<Supervisor<C>>, mut stream: UnixStream) {
    loop {
        let bytes = match ipc::read_message(&mut stream).await {
            Ok(bytes) => bytes,
            Err(IpcError::ConnectionClosed) => return,
            Err(e) => {
                supervisor.emit(SupervisorEvent::IpcError {
                    message: e.to_string(),
                });
                return;
            }
        };
        let msg: ChildMessage = match ipc::decode(&bytes) {
            Ok(msg) => msg,
            Err(e) => {
                supervisor.emit(SupervisorEvent::IpcError {
                    message: format!("malformed IPC payload: {e}"),
                });
                continue;
            }
        };

        if let Some(reply) = supervisor.handle_child_message(msg) {
            if let Err(e) = ipc::send(&mut stream, &reply).await {
                supervisor.emit(SupervisorEvent::IpcError {
                    message: format!("failed to reply to child: {e}"),
                });
                return;
            }
        }
    }
}

#[cfg(test)]
#[path = "supervisor_tests.rs"]
mod tests;
