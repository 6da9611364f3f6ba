// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The production agent launcher: subprocess + ACP client.
//!
//! Bridges the engine's lifecycle seam onto a real spawned agent: the
//! process handle answers liveness, the ACP client answers reachability,
//! and soft termination is stdin EOF via the client.

use async_trait::async_trait;
use kbot_adapters::{AcpClient, AcpTransport, AgentProcess, AgentProcessConfig};
use kbot_engine::{AgentInstance, AgentLauncher, EngineError};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;

/// Shared slot holding the current agent's ACP client.
///
/// Respawns replace the client; holders of a [`SharedAcpClient`] always talk
/// to the live agent without re-wiring.
#[derive(Clone, Default)]
pub struct ClientSlot {
    inner: Arc<parking_lot::Mutex<Option<AcpClient>>>,
}

impl ClientSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<AcpClient> {
        self.inner.lock().clone()
    }

    fn install(&self, client: AcpClient) {
        *self.inner.lock() = Some(client);
    }
}

/// [`AcpTransport`] over whatever agent currently occupies the slot.
#[derive(Clone)]
pub struct SharedAcpClient {
    slot: ClientSlot,
}

impl SharedAcpClient {
    pub fn new(slot: ClientSlot) -> Self {
        Self { slot }
    }

    fn client(&self) -> Result<AcpClient, kbot_adapters::AcpError> {
        self.slot.current().ok_or(kbot_adapters::AcpError::Closed)
    }
}

#[async_trait]
impl AcpTransport for SharedAcpClient {
    async fn new_session(&self) -> Result<String, kbot_adapters::AcpError> {
        self.client()?.new_session().await
    }

    async fn prompt(
        &self,
        session_id: &str,
        source: kbot_core::PromptSource,
        text: &str,
    ) -> Result<kbot_adapters::PromptOutcome, kbot_adapters::AcpError> {
        self.client()?.prompt(session_id, source, text).await
    }

    fn subscribe_updates(
        &self,
    ) -> tokio::sync::broadcast::Receiver<kbot_adapters::SessionNotification> {
        match self.slot.current() {
            Some(client) => client.subscribe_updates(),
            // No agent: an empty, already-closed stream
            None => tokio::sync::broadcast::channel(1).1,
        }
    }

    fn subscribe_stderr(&self) -> tokio::sync::broadcast::Receiver<String> {
        match self.slot.current() {
            Some(client) => client.subscribe_stderr(),
            None => tokio::sync::broadcast::channel(1).1,
        }
    }

    async fn is_reachable(&self) -> bool {
        match self.slot.current() {
            Some(client) => client.is_reachable().await,
            None => false,
        }
    }
}

/// Launches the coding agent configured for this deployment.
#[derive(Clone)]
pub struct AcpAgentLauncher {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    slot: Option<ClientSlot>,
}

impl AcpAgentLauncher {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            cwd: None,
            slot: None,
        }
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Publish each launched agent's client into `slot`.
    pub fn with_client_slot(mut self, slot: ClientSlot) -> Self {
        self.slot = Some(slot);
        self
    }
}

#[async_trait]
impl AgentLauncher for AcpAgentLauncher {
    async fn launch(
        &self,
        env: Vec<(String, String)>,
    ) -> Result<Arc<dyn AgentInstance>, EngineError> {
        let process = AgentProcess::spawn(&AgentProcessConfig {
            program: self.program.clone(),
            args: self.args.clone(),
            cwd: self.cwd.clone(),
            env,
        })
        .map_err(|e| EngineError::SpawnFailed(e.to_string()))?;

        let (stdin, stdout) = process
            .take_stdio()
            .ok_or_else(|| EngineError::SpawnFailed("agent stdio unavailable".to_string()))?;
        let client = AcpClient::start(stdout, stdin, process.stderr_sender());

        if let Err(e) = client.initialize().await {
            warn!(error = %e, "ACP initialize failed; continuing with an uninitialized agent");
        }

        if let Some(slot) = &self.slot {
            slot.install(client.clone());
        }

        Ok(Arc::new(AcpAgentInstance { process, client }))
    }
}

/// A spawned agent: process handle plus its ACP client.
pub struct AcpAgentInstance {
    process: AgentProcess,
    client: AcpClient,
}

impl AcpAgentInstance {
    /// The ACP transport for this instance.
    pub fn client(&self) -> AcpClient {
        self.client.clone()
    }
}

#[async_trait]
impl AgentInstance for AcpAgentInstance {
    fn is_running(&self) -> bool {
        self.process.is_running()
    }

    async fn is_reachable(&self) -> bool {
        self.client.is_reachable().await
    }

    async fn soft_stop(&self) {
        self.client.close().await;
    }

    async fn kill(&self) {
        self.process.kill().await;
    }

    async fn wait_exit(&self) -> Option<i32> {
        self.process.wait_exit().await
    }
}

#[cfg(test)]
#[path = "launcher_tests.rs"]
mod tests;
