// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The agent subprocess.
//!
//! Spawns the coding agent with piped stdio. Stdout carries the JSON-RPC
//! stream (owned by [`super::AcpClient`]); stderr lines are fanned out on a
//! broadcast channel for the `/usage` side-channel. Exit is observed by a
//! dedicated wait task so `is_running` never blocks.

use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, warn};

/// Capacity of the stderr line fan-out.
const STDERR_CHANNEL_CAPACITY: usize = 256;

/// Configuration for spawning the agent subprocess.
#[derive(Debug, Clone)]
pub struct AgentProcessConfig {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    /// Environment appended to the inherited environment.
    pub env: Vec<(String, String)>,
}

/// Handle to a spawned agent subprocess.
pub struct AgentProcess {
    pid: Option<u32>,
    kill_tx: mpsc::Sender<()>,
    /// `None` while running, `Some(exit_code)` after exit.
    exit_rx: watch::Receiver<Option<Option<i32>>>,
    stderr_tx: broadcast::Sender<String>,
    stdio: parking_lot::Mutex<Option<(ChildStdin, ChildStdout)>>,
}

impl AgentProcess {
    /// Spawn the agent with piped stdio.
    pub fn spawn(config: &AgentProcessConfig) -> std::io::Result<Self> {
        let mut cmd = Command::new(&config.program);
        cmd.args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(cwd) = &config.cwd {
            cmd.current_dir(cwd);
        }
        for (key, value) in &config.env {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn()?;
        let pid = child.id();
        debug!(program = %config.program, pid, "agent subprocess spawned");

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let (stderr_tx, _) = broadcast::channel(STDERR_CHANNEL_CAPACITY);
        if let Some(stderr) = stderr {
            let tx = stderr_tx.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    // No receivers is fine; the tap is opt-in.
                    let _ = tx.send(line);
                }
            });
        }

        let (kill_tx, kill_rx) = mpsc::channel(1);
        let (exit_tx, exit_rx) = watch::channel(None);
        tokio::spawn(watch_exit(child, kill_rx, exit_tx));

        let stdio = match (stdin, stdout) {
            (Some(stdin), Some(stdout)) => Some((stdin, stdout)),
            _ => None,
        };

        Ok(Self {
            pid,
            kill_tx,
            exit_rx,
            stderr_tx,
            stdio: parking_lot::Mutex::new(stdio),
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Take the stdio pair for the ACP client. Yields once.
    pub fn take_stdio(&self) -> Option<(ChildStdin, ChildStdout)> {
        self.stdio.lock().take()
    }

    pub fn subscribe_stderr(&self) -> broadcast::Receiver<String> {
        self.stderr_tx.subscribe()
    }

    /// Handle for wiring the stderr tap into the ACP client.
    pub fn stderr_sender(&self) -> broadcast::Sender<String> {
        self.stderr_tx.clone()
    }

    pub fn is_running(&self) -> bool {
        self.exit_rx.borrow().is_none()
    }

    /// Exit code once the process has exited (`None` while running).
    pub fn exit_code(&self) -> Option<Option<i32>> {
        *self.exit_rx.borrow()
    }

    /// Wait for the process to exit; returns its exit code if known.
    pub async fn wait_exit(&self) -> Option<i32> {
        let mut rx = self.exit_rx.clone();
        loop {
            if let Some(code) = *rx.borrow() {
                return code;
            }
            if rx.changed().await.is_err() {
                return None;
            }
        }
    }

    /// Hard-kill the subprocess. Idempotent; exit is reported via the
    /// wait task like any other exit.
    pub async fn kill(&self) {
        let _ = self.kill_tx.send(()).await;
    }
}

/// Own the child: forward kill requests and publish the exit code.
async fn watch_exit(
    mut child: Child,
    mut kill_rx: mpsc::Receiver<()>,
    exit_tx: watch::Sender<Option<Option<i32>>>,
) {
    loop {
        tokio::select! {
            status = child.wait() => {
                let code = match status {
                    Ok(status) => status.code(),
                    Err(e) => {
                        warn!(error = %e, "failed waiting on agent subprocess");
                        None
                    }
                };
                let _ = exit_tx.send(Some(code));
                return;
            }
            Some(()) = kill_rx.recv() => {
                if let Err(e) = child.start_kill() {
                    warn!(error = %e, "failed to kill agent subprocess");
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "process_tests.rs"]
mod tests;
