// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! File-backed autonomous task queue.
//!
//! Operators (or the agent itself) drop task files into
//! `<data>/tasks/pending/`. The autonomous loop drains them oldest-first
//! through the normal message pipeline on the `autonomous` channel and
//! archives finished tasks under `<data>/tasks/done/`. A failed task stays
//! in `pending/` so the next iteration retries it; repeated failures trip
//! the loop's circuit breaker.

use async_trait::async_trait;
use kbot_adapters::{AcpTransport, ChatAdapter};
use kbot_core::{Clock, MessageSender, NormalizedMessage, SystemClock};
use kbot_engine::{Bot, SummaryProvider, TaskSource};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Channel name autonomous work is routed on; all tasks share one
/// conversation under `agent:<agent>:autonomous:channel:autonomous`.
pub const TASK_CHANNEL: &str = "autonomous";

/// Consumer of dequeued tasks.
#[async_trait]
pub trait TaskHandler: Send + Sync + 'static {
    async fn handle(&self, msg: NormalizedMessage) -> Result<(), String>;
}

/// The bot itself is the production handler: tasks become ordinary
/// messages, so they hit the session, event-log, and turn machinery like
/// any platform traffic.
#[async_trait]
impl<A, Ch, C, P> TaskHandler for Arc<Bot<A, Ch, C, P>>
where
    A: AcpTransport,
    Ch: ChatAdapter,
    C: Clock,
    P: SummaryProvider,
{
    async fn handle(&self, msg: NormalizedMessage) -> Result<(), String> {
        self.handle_message(msg)
            .await
            .map(|_| ())
            .map_err(|e| e.to_string())
    }
}

/// On-disk task queue consumed by the autonomous loop.
pub struct QueueTaskSource<H: TaskHandler, C: Clock = SystemClock> {
    pending_dir: PathBuf,
    done_dir: PathBuf,
    handler: H,
    clock: C,
}

impl<H: TaskHandler, C: Clock> QueueTaskSource<H, C> {
    /// Create the queue under `<data_dir>/tasks/`.
    pub fn new(
        data_dir: impl Into<PathBuf>,
        handler: H,
        clock: C,
    ) -> std::io::Result<Self> {
        let tasks_dir = data_dir.into().join("tasks");
        let pending_dir = tasks_dir.join("pending");
        let done_dir = tasks_dir.join("done");
        std::fs::create_dir_all(&pending_dir)?;
        std::fs::create_dir_all(&done_dir)?;
        Ok(Self {
            pending_dir,
            done_dir,
            handler,
            clock,
        })
    }

    /// Enqueue a task; returns its queue name. ULID names keep the queue
    /// in submission order.
    pub fn enqueue(&self, text: &str) -> std::io::Result<String> {
        let name = format!("{}.task", ulid_name());
        std::fs::write(self.pending_dir.join(&name), text)?;
        Ok(name)
    }

    /// Number of tasks waiting.
    pub fn pending_count(&self) -> std::io::Result<usize> {
        Ok(self.pending_names()?.len())
    }

    fn pending_names(&self) -> std::io::Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.pending_dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                names.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        names.sort();
        Ok(names)
    }
}

fn ulid_name() -> String {
    use kbot_core::IdGen;
    kbot_core::UlidIdGen.next()
}

#[async_trait]
impl<H: TaskHandler, C: Clock> TaskSource for QueueTaskSource<H, C> {
    async fn next_task(&self) -> Result<Option<String>, String> {
        self.pending_names()
            .map(|names| names.into_iter().next())
            .map_err(|e| format!("task queue scan failed: {e}"))
    }

    async fn process(&self, task: &str) -> Result<(), String> {
        let path = self.pending_dir.join(task);
        let text = std::fs::read_to_string(&path)
            .map_err(|e| format!("task {task} unreadable: {e}"))?;

        let msg = NormalizedMessage {
            // The task name doubles as the message id, so a retried task
            // never duplicates its user turn.
            id: format!("task-{task}"),
            text,
            sender: MessageSender {
                id: "task-queue".to_string(),
                platform: TASK_CHANNEL.to_string(),
                display_name: "task queue".to_string(),
            },
            timestamp_ms: self.clock.epoch_ms(),
            channel: TASK_CHANNEL.to_string(),
            metadata: None,
        };
        self.handler.handle(msg).await?;

        std::fs::rename(&path, self.done_dir.join(task))
            .map_err(|e| format!("task {task} archive failed: {e}"))?;
        info!(task, "autonomous task completed");
        Ok(())
    }
}

#[cfg(test)]
#[path = "tasks_tests.rs"]
mod tests;
