// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The shadow store: orphan-branch worktree with batched commits.
//!
//! `record_event()` counts memory writes; a commit triggers when the count
//! reaches `max_events` or `max_interval` has elapsed since the last one.
//! Commits are serialized across processes by the on-disk lock; a lock file
//! found at startup means a previous run died mid-commit and its work is
//! recovered before the store becomes ready.

use crate::git::Git;
use crate::lock::CommitLock;
use crate::ShadowError;
use parking_lot::Mutex;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Shadow store configuration.
#[derive(Debug, Clone)]
pub struct ShadowConfig {
    /// Orphan branch holding memory history.
    pub branch: String,
    /// Worktree directory name under the repo root.
    pub worktree_dir: String,
    /// Commit after this many recorded events.
    pub max_events: u64,
    /// Commit after this long since the previous commit.
    pub max_interval: Duration,
    /// Locks older than this are considered abandoned.
    pub lock_stale_after: Duration,
    /// Scheduler tick resolution.
    pub tick_interval: Duration,
}

impl Default for ShadowConfig {
    fn default() -> Self {
        Self {
            branch: "kbot-memory".to_string(),
            worktree_dir: ".kbot".to_string(),
            max_events: 100,
            max_interval: Duration::from_secs(5 * 60),
            lock_stale_after: Duration::from_secs(5 * 60),
            tick_interval: Duration::from_secs(1),
        }
    }
}

/// Shadow store lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShadowState {
    Uninitialized,
    Initializing,
    Ready,
    Committing,
    Recovering,
    Error,
}

impl fmt::Display for ShadowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ShadowState::Uninitialized => "uninitialized",
            ShadowState::Initializing => "initializing",
            ShadowState::Ready => "ready",
            ShadowState::Committing => "committing",
            ShadowState::Recovering => "recovering",
            ShadowState::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// Observations emitted by the store.
#[derive(Debug, Clone, PartialEq)]
pub enum ShadowEvent {
    StateChange {
        from: ShadowState,
        to: ShadowState,
    },
    SyncStart {
        operation: &'static str,
    },
    SyncComplete {
        operation: &'static str,
        files_changed: usize,
    },
    SyncError {
        operation: &'static str,
        message: String,
    },
}

struct BatchState {
    events_since_commit: u64,
    last_commit: Instant,
}

/// Git-worktree-backed durability layer for the memory directory.
pub struct ShadowStore {
    git: Git,
    config: ShadowConfig,
    worktree: PathBuf,
    lock: CommitLock,
    state: Mutex<ShadowState>,
    batch: Mutex<BatchState>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<ShadowEvent>>>,
}

impl ShadowStore {
    /// Bind a store to the repository containing `dir`.
    ///
    /// The store starts `uninitialized`; call [`ShadowStore::initialize`]
    /// (after subscribing, if observation matters) to bring it `ready`.
    pub async fn connect(dir: &Path, config: ShadowConfig) -> Result<Self, ShadowError> {
        let git = Git::discover(dir).await?;
        let worktree = git.repo_root().join(&config.worktree_dir);
        let lock = CommitLock::new(&worktree);

        Ok(Self {
            git,
            worktree,
            lock,
            state: Mutex::new(ShadowState::Uninitialized),
            batch: Mutex::new(BatchState {
                events_since_commit: 0,
                last_commit: Instant::now(),
            }),
            subscribers: Mutex::new(Vec::new()),
            config,
        })
    }

    /// Initialize branch, worktree, and gitignore entry; recover any work a
    /// crashed run left behind.
    ///
    /// Idempotent: an existing branch/worktree is reused. Fails fast when
    /// `.gitignore` needs the worktree entry but has uncommitted edits.
    pub async fn initialize(&self) -> Result<(), ShadowError> {
        self.set_state(ShadowState::Initializing);
        match self.initialize_inner().await {
            Ok(()) => {
                // Interval batching is measured from readiness
                self.batch.lock().last_commit = Instant::now();
                self.set_state(ShadowState::Ready);
                Ok(())
            }
            Err(e) => {
                self.set_state(ShadowState::Error);
                Err(e)
            }
        }
    }

    async fn initialize_inner(&self) -> Result<(), ShadowError> {
        self.ensure_gitignored().await?;

        self.git.worktree_prune().await?;
        if !self.worktree.join(".git").exists() {
            // The memory directory may predate the worktree (pid files,
            // logs, event logs). `git worktree add` refuses a non-empty
            // path, so stash the contents and adopt them afterwards.
            let stash = self.stash_existing_contents()?;

            let created = if self.git.branch_exists(&self.config.branch).await? {
                self.git
                    .worktree_add(&self.worktree, &self.config.branch)
                    .await
            } else {
                match self
                    .git
                    .worktree_add_orphan(&self.config.branch, &self.worktree)
                    .await
                {
                    Ok(()) => {
                        self.git
                            .commit(&self.worktree, "Initialize shadow history", true)
                            .await?;
                        info!(branch = %self.config.branch, "created shadow branch");
                        Ok(())
                    }
                    Err(e) => Err(e),
                }
            };

            // Restore stashed files whether or not the worktree appeared;
            // losing memory files is worse than a failed initialization.
            if let Some(stash) = stash {
                restore_stashed_contents(&stash, &self.worktree)?;
            }
            created?;
        }

        let wrote_ignores = self.ensure_worktree_gitignore()?;
        if wrote_ignores && !self.lock.exists() {
            self.commit_worktree("Track shadow runtime ignores").await?;
        }

        // A leftover lock means a previous run died mid-commit.
        if self.lock.exists() {
            self.recover().await?;
        }

        Ok(())
    }

    /// Move pre-worktree contents aside; returns the stash dir if any.
    fn stash_existing_contents(&self) -> Result<Option<PathBuf>, ShadowError> {
        if !self.worktree.exists() {
            return Ok(None);
        }
        let has_entries = std::fs::read_dir(&self.worktree)?.next().is_some();
        if !has_entries {
            std::fs::remove_dir(&self.worktree)?;
            return Ok(None);
        }

        let stash = self.worktree.with_extension("init-stash");
        if stash.exists() {
            std::fs::remove_dir_all(&stash)?;
        }
        std::fs::rename(&self.worktree, &stash)?;
        Ok(Some(stash))
    }

    /// Runtime files never belong in shadow history. Returns whether the
    /// ignore file changed.
    fn ensure_worktree_gitignore(&self) -> Result<bool, ShadowError> {
        const IGNORED: [&str; 5] = [
            ".kbot-lock",
            "kbotd.pid",
            "supervisor.sock",
            "*.log",
            "*.log.*",
        ];
        let path = self.worktree.join(".gitignore");
        let existing = match std::fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(ShadowError::Io(e)),
        };
        let mut updated = existing.clone();
        for entry in IGNORED {
            if !updated.lines().any(|l| l.trim() == entry) {
                if !updated.is_empty() && !updated.ends_with('\n') {
                    updated.push('\n');
                }
                updated.push_str(entry);
                updated.push('\n');
            }
        }
        if updated == existing {
            return Ok(false);
        }
        std::fs::write(&path, updated)?;
        Ok(true)
    }

    /// Ensure the worktree directory is gitignored on the main branch.
    async fn ensure_gitignored(&self) -> Result<(), ShadowError> {
        let entry = format!("{}/", self.config.worktree_dir);
        let gitignore = self.git.repo_root().join(".gitignore");

        let existing = match std::fs::read_to_string(&gitignore) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(ShadowError::Io(e)),
        };
        if existing.lines().any(|l| l.trim() == entry) {
            return Ok(());
        }

        // We are about to edit .gitignore; refuse to mix with user edits.
        if self.git.path_is_dirty(".gitignore").await? {
            return Err(ShadowError::GitignoreDirty);
        }

        let mut updated = existing;
        if !updated.is_empty() && !updated.ends_with('\n') {
            updated.push('\n');
        }
        updated.push_str(&entry);
        updated.push('\n');
        std::fs::write(&gitignore, updated)?;
        info!(entry = %entry, "added shadow worktree to .gitignore");
        Ok(())
    }

    /// Commit outstanding work left behind by an interrupted run.
    async fn recover(&self) -> Result<(), ShadowError> {
        self.set_state(ShadowState::Recovering);
        self.emit(ShadowEvent::SyncStart {
            operation: "recover",
        });

        let result = self
            .commit_worktree("Recover from interrupted operation")
            .await;
        self.lock.remove_stale()?;

        match result {
            Ok(files_changed) => {
                self.emit(ShadowEvent::SyncComplete {
                    operation: "recover",
                    files_changed,
                });
                Ok(())
            }
            Err(e) => {
                self.emit(ShadowEvent::SyncError {
                    operation: "recover",
                    message: e.to_string(),
                });
                Err(e)
            }
        }
    }

    pub fn state(&self) -> ShadowState {
        *self.state.lock()
    }

    pub fn worktree(&self) -> &Path {
        &self.worktree
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<ShadowEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(tx);
        rx
    }

    fn emit(&self, event: ShadowEvent) {
        self.subscribers
            .lock()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn set_state(&self, to: ShadowState) {
        let mut state = self.state.lock();
        let from = *state;
        if from == to {
            return;
        }
        *state = to;
        drop(state);
        self.emit(ShadowEvent::StateChange { from, to });
    }

    /// Record one memory write; commits when the event batch is full.
    pub async fn record_event(&self) -> Result<(), ShadowError> {
        let due = {
            let mut batch = self.batch.lock();
            batch.events_since_commit += 1;
            batch.events_since_commit >= self.config.max_events
        };
        if due {
            self.commit_batch("batch").await?;
        }
        Ok(())
    }

    /// Scheduler tick: commit when the interval has elapsed with pending events.
    pub async fn tick(&self) -> Result<(), ShadowError> {
        let due = {
            let batch = self.batch.lock();
            batch.events_since_commit > 0
                && batch.last_commit.elapsed() >= self.config.max_interval
        };
        if due {
            self.commit_batch("interval").await?;
        }
        Ok(())
    }

    /// Commit synchronously; no-op when the worktree is clean.
    pub async fn force_commit(&self, message: Option<&str>) -> Result<usize, ShadowError> {
        self.commit_with_message(message.unwrap_or("Manual commit"))
            .await
    }

    /// Flush pending events before shutdown.
    pub async fn shutdown(&self) -> Result<(), ShadowError> {
        let pending = self.batch.lock().events_since_commit;
        if pending > 0 {
            self.commit_with_message(&format!("Flush {pending} events on shutdown"))
                .await?;
        }
        Ok(())
    }

    /// Spawn the batch scheduler; runs until the store is dropped.
    pub fn spawn_scheduler(store: std::sync::Arc<Self>) -> tokio::task::JoinHandle<()> {
        let tick = store.config.tick_interval;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            loop {
                interval.tick().await;
                match store.tick().await {
                    Ok(()) => {}
                    Err(ShadowError::CommitInProgress) => {
                        // Another process holds the lock; retry next tick
                    }
                    Err(e) => {
                        warn!(error = %e, "shadow scheduler commit failed");
                    }
                }
            }
        })
    }

    async fn commit_batch(&self, trigger: &str) -> Result<(), ShadowError> {
        let pending = self.batch.lock().events_since_commit;
        let message = format!("Batch commit ({pending} events, {trigger})");
        self.commit_with_message(&message).await?;
        Ok(())
    }

    /// Full commit path: lock, stage, commit, reset counters, unlock.
    async fn commit_with_message(&self, message: &str) -> Result<usize, ShadowError> {
        let guard = self.lock.acquire(self.config.lock_stale_after)?;
        self.set_state(ShadowState::Committing);
        self.emit(ShadowEvent::SyncStart {
            operation: "commit",
        });

        let result = self.commit_worktree(message).await;

        // The guard removes the lock file even when the commit failed.
        drop(guard);

        match result {
            Ok(files_changed) => {
                let mut batch = self.batch.lock();
                batch.events_since_commit = 0;
                batch.last_commit = Instant::now();
                drop(batch);

                self.set_state(ShadowState::Ready);
                self.emit(ShadowEvent::SyncComplete {
                    operation: "commit",
                    files_changed,
                });
                Ok(files_changed)
            }
            Err(e) => {
                self.set_state(ShadowState::Error);
                self.emit(ShadowEvent::SyncError {
                    operation: "commit",
                    message: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Stage everything and commit; returns the number of changed files.
    async fn commit_worktree(&self, message: &str) -> Result<usize, ShadowError> {
        let changed = self.git.status_porcelain(&self.worktree).await?;
        if changed.is_empty() {
            return Ok(0);
        }

        self.git.add_all(&self.worktree).await?;
        if !self.git.has_staged_changes(&self.worktree).await? {
            return Ok(0);
        }
        self.git.commit(&self.worktree, message, false).await?;
        Ok(changed.len())
    }
}

/// Move stashed entries into the (possibly fresh) worktree, then drop the
/// stash. Collisions keep the stashed copy.
fn restore_stashed_contents(stash: &Path, worktree: &Path) -> Result<(), ShadowError> {
    std::fs::create_dir_all(worktree)?;
    for entry in std::fs::read_dir(stash)? {
        let entry = entry?;
        let target = worktree.join(entry.file_name());
        if target.exists() {
            if target.is_dir() {
                std::fs::remove_dir_all(&target)?;
            } else {
                std::fs::remove_file(&target)?;
            }
        }
        std::fs::rename(entry.path(), &target)?;
    }
    std::fs::remove_dir_all(stash)?;
    Ok(())
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
