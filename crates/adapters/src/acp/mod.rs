// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! ACP: the streaming JSON-RPC protocol spoken by the agent subprocess.
//!
//! The protocol is opaque to the rest of the runtime beyond a small
//! capability set: create a session, send a `user`/`system` prompt, receive
//! streamed `session/update` notifications, and observe stderr (the
//! `/usage` side-channel). The [`AcpTransport`] trait is the seam the
//! engine programs against; [`AcpClient`] is the real implementation over
//! child-process stdio.

mod client;
mod process;
mod protocol;

pub use client::AcpClient;
pub use process::{AgentProcess, AgentProcessConfig};
pub use protocol::{PromptOutcome, SessionNotification, SessionUpdate};

// Test support - only compiled for tests or when explicitly requested
#[cfg(any(test, feature = "test-support"))]
mod fake;
#[cfg(any(test, feature = "test-support"))]
pub use fake::{FakeAcp, PromptRecord};

use async_trait::async_trait;
use kbot_core::PromptSource;
use thiserror::Error;
use tokio::sync::broadcast;

/// Errors from ACP operations
#[derive(Debug, Clone, Error)]
pub enum AcpError {
    #[error("agent process error: {0}")]
    Process(String),
    #[error("transport closed")]
    Closed,
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("agent error {code}: {message}")]
    Agent { code: i64, message: String },
}

/// Capability seam for talking to the agent.
#[async_trait]
pub trait AcpTransport: Clone + Send + Sync + 'static {
    /// Create a fresh agent session; returns the agent-assigned session id.
    async fn new_session(&self) -> Result<String, AcpError>;

    /// Send a prompt and wait for the turn to complete.
    ///
    /// Streamed output arrives on [`AcpTransport::subscribe_updates`] while
    /// this future is pending.
    async fn prompt(
        &self,
        session_id: &str,
        source: PromptSource,
        text: &str,
    ) -> Result<PromptOutcome, AcpError>;

    /// Subscribe to streamed session updates.
    fn subscribe_updates(&self) -> broadcast::Receiver<SessionNotification>;

    /// Subscribe to agent stderr lines (the `/usage` side-channel).
    fn subscribe_stderr(&self) -> broadcast::Receiver<String>;

    /// Cheap liveness probe; used by health monitoring.
    async fn is_reachable(&self) -> bool;
}
