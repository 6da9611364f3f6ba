// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fake ACP transport for tests.
//!
//! Records every prompt, hands out sequential session ids, and can be
//! scripted to stream updates, answer `/usage` probes on stderr, fail
//! prompts, or report unreachable.

use super::protocol::{PromptOutcome, SessionNotification, SessionUpdate};
use super::{AcpError, AcpTransport};
use async_trait::async_trait;
use kbot_core::PromptSource;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

/// One recorded prompt.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptRecord {
    pub session_id: String,
    pub source: PromptSource,
    pub text: String,
}

struct FakeAcpInner {
    prompts: Mutex<Vec<PromptRecord>>,
    sessions_created: AtomicU64,
    updates_tx: broadcast::Sender<SessionNotification>,
    stderr_tx: broadcast::Sender<String>,
    reachable: AtomicBool,
    fail_prompts: AtomicBool,
    /// Updates streamed during the next prompts (consumed per prompt).
    scripted_updates: Mutex<Vec<Vec<SessionUpdate>>>,
    /// Stderr lines emitted when a `/usage` prompt arrives.
    usage_stderr: Mutex<Option<Vec<String>>>,
}

/// Scriptable in-memory [`AcpTransport`].
#[derive(Clone)]
pub struct FakeAcp {
    inner: Arc<FakeAcpInner>,
}

impl Default for FakeAcp {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeAcp {
    pub fn new() -> Self {
        let (updates_tx, _) = broadcast::channel(1024);
        let (stderr_tx, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(FakeAcpInner {
                prompts: Mutex::new(Vec::new()),
                sessions_created: AtomicU64::new(0),
                updates_tx,
                stderr_tx,
                reachable: AtomicBool::new(true),
                fail_prompts: AtomicBool::new(false),
                scripted_updates: Mutex::new(Vec::new()),
                usage_stderr: Mutex::new(None),
            }),
        }
    }

    pub fn prompts(&self) -> Vec<PromptRecord> {
        self.inner.prompts.lock().clone()
    }

    pub fn new_session_count(&self) -> u64 {
        self.inner.sessions_created.load(Ordering::SeqCst)
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.inner.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn set_fail_prompts(&self, fail: bool) {
        self.inner.fail_prompts.store(fail, Ordering::SeqCst);
    }

    /// Queue updates to stream during the next prompt (FIFO per prompt).
    pub fn script_updates(&self, updates: Vec<SessionUpdate>) {
        self.inner.scripted_updates.lock().push(updates);
    }

    /// Script the stderr block emitted in response to a `/usage` prompt.
    pub fn set_usage_stderr(&self, lines: Vec<String>) {
        *self.inner.usage_stderr.lock() = Some(lines);
    }

    /// Emit a raw stderr line, as the agent side-channel would.
    pub fn emit_stderr(&self, line: impl Into<String>) {
        let _ = self.inner.stderr_tx.send(line.into());
    }
}

#[async_trait]
impl AcpTransport for FakeAcp {
    async fn new_session(&self) -> Result<String, AcpError> {
        let n = self.inner.sessions_created.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("fake-sess-{n}"))
    }

    async fn prompt(
        &self,
        session_id: &str,
        source: PromptSource,
        text: &str,
    ) -> Result<PromptOutcome, AcpError> {
        self.inner.prompts.lock().push(PromptRecord {
            session_id: session_id.to_string(),
            source,
            text: text.to_string(),
        });

        if self.inner.fail_prompts.load(Ordering::SeqCst) {
            return Err(AcpError::Process("scripted prompt failure".to_string()));
        }

        if text.trim() == "/usage" {
            let lines = self.inner.usage_stderr.lock().clone();
            if let Some(lines) = lines {
                for line in lines {
                    let _ = self.inner.stderr_tx.send(line);
                }
            }
            return Ok(PromptOutcome {
                stop_reason: Some("end_turn".to_string()),
            });
        }

        // Scripted updates answer user prompts; system prompts (identity,
        // restoration) complete silently.
        if source == PromptSource::System {
            return Ok(PromptOutcome {
                stop_reason: Some("end_turn".to_string()),
            });
        }

        let updates = {
            let mut scripted = self.inner.scripted_updates.lock();
            if scripted.is_empty() {
                Vec::new()
            } else {
                scripted.remove(0)
            }
        };
        for update in updates {
            let _ = self.inner.updates_tx.send(SessionNotification {
                session_id: session_id.to_string(),
                update,
            });
        }

        Ok(PromptOutcome {
            stop_reason: Some("end_turn".to_string()),
        })
    }

    fn subscribe_updates(&self) -> broadcast::Receiver<SessionNotification> {
        self.inner.updates_tx.subscribe()
    }

    fn subscribe_stderr(&self) -> broadcast::Receiver<String> {
        self.inner.stderr_tx.subscribe()
    }

    async fn is_reachable(&self) -> bool {
        self.inner.reachable.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
#[path = "fake_tests.rs"]
mod tests;
