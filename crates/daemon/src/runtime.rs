// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Child-side runtime wiring.
//!
//! Assembles the stores, shadow history, agent lifecycle, escalation,
//! autonomous loop, and Bot for one `kbotd` process: single-instance pid
//! lock, checkpoint consumption (with TTL/version rejection),
//! store-to-shadow event bridging, the lifecycle-escalate bridge, and the
//! planned-restart handshake back to the supervisor.

use crate::env;
use crate::ipc::{self, ChildMessage, IpcError, SupervisorMessage};
use crate::launcher::{AcpAgentLauncher, ClientSlot, SharedAcpClient};
use crate::tasks::QueueTaskSource;
use async_trait::async_trait;
use fs2::FileExt;
use kbot_adapters::{DesktopNotifyAdapter, NoOpChatAdapter};
use kbot_core::{
    CheckpointError, Clock, RestartReason, SupervisorCheckpoint, SystemClock, Turn, WakeContext,
};
use kbot_engine::{
    AgentLifecycle, AutonomousConfig, AutonomousLoop, Bot, BotConfig, BotDeps, ContextRestorer,
    ContextUsageTracker, EngineError, EngineEvent, EscalationConfig, EscalationHandler, EventBus,
    LifecycleConfig, RestorerConfig, SelectorConfig, SessionLifecycleConfig,
    SessionLifecycleManager, SummaryProvider, TaskSource, ToolSummarizer, TurnSelector,
    UsageConfig,
};
use kbot_shadow::{ShadowConfig, ShadowStore};
use kbot_storage::{
    CheckpointStore, ConversationStore, SessionStore, StorageError, StoreEvent, TurnReconstructor,
};
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::UnixStream;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Bot with the daemon's concrete adapter types.
pub type DaemonBot = Bot<SharedAcpClient, NoOpChatAdapter, SystemClock, ArchiveNoteSummary>;

/// Runtime configuration for the child process.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Data directory (default `.kbot/`, overridable via `KBOT_DATA_DIR`).
    pub data_dir: PathBuf,
    /// Path to the pid/lock file.
    pub lock_path: PathBuf,
    /// Path to the daemon log file.
    pub log_path: PathBuf,
    /// Agent subprocess command.
    pub agent_program: String,
    pub agent_args: Vec<String>,
    /// Whether to back memory with the git shadow store.
    pub shadow: bool,
    pub bot: BotConfig,
}

/// Optional `kbot.toml` overlay in the data directory.
#[derive(Debug, Default, serde::Deserialize)]
struct FileConfig {
    agent_program: Option<String>,
    agent_args: Option<Vec<String>>,
    shadow: Option<bool>,
    identity_prompt: Option<String>,
}

impl RuntimeConfig {
    /// Load configuration: defaults, then `kbot.toml`, then environment.
    pub fn load() -> Self {
        let data_dir = env::data_dir();
        let file = load_file_config(&data_dir.join("kbot.toml"));

        let mut bot = BotConfig::default();
        if let Some(identity) = file.identity_prompt {
            bot.identity_prompt = identity;
        }

        Self {
            lock_path: data_dir.join("kbotd.pid"),
            log_path: data_dir.join("kbotd.log"),
            agent_program: std::env::var("KBOT_AGENT_PROGRAM")
                .ok()
                .or(file.agent_program)
                .unwrap_or_else(|| "claude-agent".to_string()),
            agent_args: std::env::var("KBOT_AGENT_ARGS")
                .ok()
                .map(|raw| raw.split_whitespace().map(String::from).collect())
                .or(file.agent_args)
                .unwrap_or_default(),
            shadow: std::env::var("KBOT_SHADOW")
                .ok()
                .map(|v| v != "0")
                .or(file.shadow)
                .unwrap_or(true),
            bot,
            data_dir,
        }
    }
}

fn load_file_config(path: &std::path::Path) -> FileConfig {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(_) => return FileConfig::default(),
    };
    match toml::from_str(&raw) {
        Ok(config) => config,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "ignoring malformed kbot.toml");
            FileConfig::default()
        }
    }
}

/// Runtime errors
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("failed to acquire lock: kbotd already running?")]
    LockFailed(#[source] std::io::Error),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("shadow error: {0}")]
    Shadow(#[from] kbot_shadow::ShadowError),

    #[error("IPC error: {0}")]
    Ipc(#[from] IpcError),

    #[error("not running under a supervisor")]
    NotSupervised,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Deterministic archive summary: points at the on-disk history instead of
/// paraphrasing it. LLM summarization plugs in through the same seam.
pub struct ArchiveNoteSummary;

#[async_trait]
impl SummaryProvider for ArchiveNoteSummary {
    async fn summarize(&self, turns: &[Turn]) -> Result<String, String> {
        Ok(format!(
            "{} earlier turns are archived; consult the archived history file for the full record.",
            turns.len()
        ))
    }
}

/// One assembled child runtime.
pub struct BotRuntime {
    pub config: RuntimeConfig,
    // NOTE(lifetime): held to maintain the exclusive pid lock
    #[allow(dead_code)]
    lock_file: File,
    pub bus: EventBus,
    pub lifecycle: Arc<AgentLifecycle>,
    pub client: SharedAcpClient,
    pub sessions: Arc<SessionStore<SystemClock>>,
    pub conversations: Arc<ConversationStore<SystemClock>>,
    pub checkpoints: CheckpointStore<SystemClock>,
    pub shadow: Option<Arc<ShadowStore>>,
    pub bot: Arc<DaemonBot>,
    pub escalation: Arc<EscalationHandler<SystemClock>>,
    pub autonomous: Arc<AutonomousLoop<SystemClock>>,
    pub tasks: Arc<QueueTaskSource<Arc<DaemonBot>, SystemClock>>,
    /// Wake context consumed from the supervisor's checkpoint, if any.
    pub wake: Option<WakeContext>,
}

impl BotRuntime {
    /// Assemble the runtime: lock, stores, shadow, lifecycle, bot.
    pub async fn start(mut config: RuntimeConfig) -> Result<Self, RuntimeError> {
        std::fs::create_dir_all(&config.data_dir)?;

        // Single instance per data dir. Open without truncating so a losing
        // racer does not wipe the winner's pid.
        let lock_file = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&config.lock_path)?;
        lock_file
            .try_lock_exclusive()
            .map_err(RuntimeError::LockFailed)?;
        let mut lock_file = lock_file;
        lock_file.set_len(0)?;
        writeln!(lock_file, "{}", std::process::id())?;

        let clock = SystemClock;
        let bus = EventBus::new();
        let sessions = Arc::new(SessionStore::new(&config.data_dir, clock.clone()));
        let conversations = Arc::new(ConversationStore::open(&config.data_dir, clock.clone())?);
        let checkpoints = CheckpointStore::new(&config.data_dir, clock.clone());

        // Shadow history is best-effort: outside a git repository the
        // runtime stays up with plain files only.
        let shadow = if config.shadow {
            let worktree_dir = config
                .data_dir
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .unwrap_or_else(|| ".kbot".to_string());
            let shadow_config = ShadowConfig {
                worktree_dir,
                ..Default::default()
            };
            match ShadowStore::connect(&config.data_dir, shadow_config).await {
                Ok(store) => {
                    // The worktree must BE the data dir, or commits would
                    // shadow the wrong tree.
                    let aligned = std::path::absolute(store.worktree()).ok()
                        == std::path::absolute(&config.data_dir).ok();
                    if aligned {
                        let store = Arc::new(store);
                        store.initialize().await?;
                        ShadowStore::spawn_scheduler(Arc::clone(&store));
                        Some(store)
                    } else {
                        warn!(
                            data_dir = %config.data_dir.display(),
                            worktree = %store.worktree().display(),
                            "data dir is not directly under the repo root; shadow store disabled"
                        );
                        None
                    }
                }
                Err(kbot_shadow::ShadowError::NotARepo(_)) => {
                    info!("no git repository detected; shadow store disabled");
                    None
                }
                Err(e) => return Err(e.into()),
            }
        } else {
            None
        };

        // Every store mutation counts toward the shadow commit batch
        if let Some(shadow) = &shadow {
            let (event_tx, mut event_rx) = mpsc::unbounded_channel::<StoreEvent>();
            let session_tx = event_tx.clone();
            sessions.set_observer(Arc::new(move |event| {
                let _ = session_tx.send(event);
            }));
            conversations.set_observer(Arc::new(move |event| {
                let _ = event_tx.send(event);
            }));

            let shadow = Arc::clone(shadow);
            tokio::spawn(async move {
                while let Some(_event) = event_rx.recv().await {
                    if let Err(e) = shadow.record_event().await {
                        warn!(error = %e, "shadow record_event failed");
                    }
                }
            });
        }

        // Checkpoint consumption: expired/corrupt files warn and are skipped
        let wake = consume_checkpoint(&checkpoints);
        if let Some(wake_context) = &wake {
            // The wake prompt extends the identity prompt of the first session
            config.bot.identity_prompt = format!(
                "{}\n\n## Wake Context\n\n{}{}{}",
                config.bot.identity_prompt,
                wake_context.prompt,
                wake_context
                    .pending_work
                    .as_deref()
                    .map(|w| format!("\n\nPending work: {w}"))
                    .unwrap_or_default(),
                wake_context
                    .instructions
                    .as_deref()
                    .map(|i| format!("\n\nInstructions: {i}"))
                    .unwrap_or_default(),
            );
        }

        let slot = ClientSlot::new();
        let client = SharedAcpClient::new(slot.clone());
        let launcher = Arc::new(
            AcpAgentLauncher::new(config.agent_program.clone(), config.agent_args.clone())
                .with_client_slot(slot),
        );
        let lifecycle = AgentLifecycle::new(launcher, LifecycleConfig::default(), bus.clone());

        // Escalation: a lifecycle `escalate` becomes one record plus a ping
        // on every configured notification channel.
        let escalation = EscalationHandler::new(
            EscalationConfig::default(),
            bus.clone(),
            clock.clone(),
            vec![Arc::new(DesktopNotifyAdapter::new())],
        );
        {
            let mut escalate_rx = bus.subscribe();
            let escalation = Arc::clone(&escalation);
            let lifecycle = Arc::clone(&lifecycle);
            tokio::spawn(async move {
                while let Some(event) = escalate_rx.recv().await {
                    if let EngineEvent::Escalate { reason, context } = event {
                        let checkpoint = lifecycle.get_checkpoint();
                        escalation
                            .escalate(reason, context, Some(checkpoint))
                            .await;
                    }
                }
            });
        }

        // Autonomous loop, gated on agent health; started once the first
        // spawn succeeds (see `start_autonomous_loop`).
        let autonomous = {
            let lifecycle = Arc::clone(&lifecycle);
            AutonomousLoop::new(
                AutonomousConfig::default(),
                bus.clone(),
                clock.clone(),
                Arc::new(move || lifecycle.is_healthy()),
            )
        };

        let manager = Arc::new(SessionLifecycleManager::new(
            SessionLifecycleConfig::default(),
            bus.clone(),
            Arc::clone(&sessions),
        ));
        let usage = Arc::new(ContextUsageTracker::new(
            UsageConfig::default(),
            clock.clone(),
            bus.clone(),
        ));
        let restorer = ContextRestorer::new(
            RestorerConfig::new(&config.data_dir),
            TurnSelector::new(
                Arc::new(TurnReconstructor::new(Arc::clone(&sessions))),
                ToolSummarizer::new(),
                SelectorConfig::default(),
            ),
            ArchiveNoteSummary,
        );
        let bot = Arc::new(Bot::new(
            config.bot.clone(),
            BotDeps {
                acp: client.clone(),
                chat: NoOpChatAdapter::new(),
                clock: clock.clone(),
                bus: bus.clone(),
                sessions: Arc::clone(&sessions),
                conversations: Arc::clone(&conversations),
                manager,
                usage,
                restorer,
            },
        ));

        let tasks = Arc::new(QueueTaskSource::new(
            &config.data_dir,
            Arc::clone(&bot),
            clock,
        )?);

        info!(data_dir = %config.data_dir.display(), "bot runtime assembled");
        Ok(Self {
            lock_file,
            bus,
            lifecycle,
            client,
            sessions,
            conversations,
            checkpoints,
            shadow,
            bot,
            escalation,
            autonomous,
            tasks,
            wake,
            config,
        })
    }

    /// Start the autonomous loop over the on-disk task queue.
    ///
    /// The loop requires a healthy agent; call after the initial spawn
    /// succeeds.
    pub fn start_autonomous_loop(&self) -> Result<(), EngineError> {
        self.autonomous
            .start(Arc::clone(&self.tasks) as Arc<dyn TaskSource>)
    }

    /// Write a checkpoint and negotiate a planned restart with the
    /// supervisor. On ack the caller should exit 0.
    pub async fn request_planned_restart(
        &self,
        session_id: &str,
        wake: WakeContext,
    ) -> Result<PathBuf, RuntimeError> {
        let socket = env::supervisor_socket().ok_or(RuntimeError::NotSupervised)?;

        let checkpoint = SupervisorCheckpoint::new(
            session_id,
            RestartReason::Planned,
            wake,
            chrono::Utc::now().to_rfc3339(),
        );
        let path = self.checkpoints.write(&checkpoint)?;

        let mut stream = UnixStream::connect(&socket).await.map_err(IpcError::Io)?;
        let request = ChildMessage::PlannedRestart {
            checkpoint: path.display().to_string(),
        };

        // Bounded retries on the ack
        let mut last_error = None;
        for attempt in 0..3 {
            ipc::send(&mut stream, &request).await?;
            match ipc::recv::<_, SupervisorMessage>(&mut stream, ipc::DEFAULT_TIMEOUT).await {
                Ok(SupervisorMessage::RestartAck) => {
                    info!(checkpoint = %path.display(), "planned restart acknowledged");
                    return Ok(path);
                }
                Ok(SupervisorMessage::Error { message }) => {
                    return Err(RuntimeError::Ipc(IpcError::NotAcknowledged(message)));
                }
                Ok(SupervisorMessage::Unknown) => {
                    warn!("dropping unknown IPC reply from supervisor");
                }
                Err(e) => {
                    warn!(attempt, error = %e, "restart ack not received; retrying");
                    last_error = Some(e);
                }
            }
        }
        Err(RuntimeError::Ipc(last_error.unwrap_or(IpcError::Timeout)))
    }

    /// Graceful teardown: stop the loop and the agent, flush shadow history.
    pub async fn shutdown(&self) {
        self.autonomous.stop().await;
        if let Err(e) = self.lifecycle.stop().await {
            warn!(error = %e, "agent stop failed during shutdown");
        }
        if let Some(shadow) = &self.shadow {
            if let Err(e) = shadow.shutdown().await {
                warn!(error = %e, "shadow flush failed during shutdown");
            }
        }
    }
}

/// Read the supervisor-provided checkpoint, if any; expired or invalid
/// files are skipped with a warning (the session starts without wake
/// context).
fn consume_checkpoint<C: Clock>(store: &CheckpointStore<C>) -> Option<WakeContext> {
    let path = env::checkpoint_path()?;
    match store.read(&path) {
        Ok(checkpoint) => {
            info!(
                reason = %checkpoint.restart_reason,
                session_id = %checkpoint.session_id,
                "waking from checkpoint"
            );
            Some(checkpoint.wake_context)
        }
        Err(StorageError::Checkpoint(CheckpointError::Expired { age_ms })) => {
            warn!(age_ms, path = %path.display(), "ignoring expired checkpoint");
            None
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "ignoring unreadable checkpoint");
            None
        }
    }
}

#[cfg(test)]
#[path = "runtime_tests.rs"]
mod tests;
