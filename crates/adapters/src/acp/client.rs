// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! JSON-RPC 2.0 client over the agent's stdio.
//!
//! One line of JSON per message. Outgoing requests get monotonically
//! increasing ids and park a oneshot in the pending map; the background read
//! task routes responses back and fans `session/update` notifications out on
//! a broadcast channel. Agent-initiated permission requests are auto-allowed
//! (the runtime is unattended).

use super::protocol::{initialize_params, prompt_params, PromptOutcome, SessionNotification, SessionUpdate};
use super::{AcpError, AcpTransport};
use crate::subprocess::{ACP_PING_TIMEOUT, ACP_REQUEST_TIMEOUT};
use async_trait::async_trait;
use kbot_core::PromptSource;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{broadcast, oneshot, Mutex};
use tracing::{debug, warn};

/// Prompt turns can run tools for minutes; bounded but generous.
const PROMPT_TIMEOUT: Duration = Duration::from_secs(600);

/// Capacity of the session-update fan-out.
const UPDATE_CHANNEL_CAPACITY: usize = 1024;

type Writer = Box<dyn AsyncWrite + Send + Unpin>;
type Pending = parking_lot::Mutex<HashMap<u64, oneshot::Sender<Result<Value, AcpError>>>>;

struct ClientInner {
    writer: Mutex<Option<Writer>>,
    pending: Pending,
    next_id: AtomicU64,
    updates_tx: broadcast::Sender<SessionNotification>,
    stderr_tx: broadcast::Sender<String>,
}

/// Streaming ACP client. Cheap to clone; all clones share one transport.
#[derive(Clone)]
pub struct AcpClient {
    inner: Arc<ClientInner>,
}

impl AcpClient {
    /// Start a client over a reader/writer pair.
    ///
    /// `stderr_tx` is the agent process's stderr tap, re-exposed here so the
    /// transport seam carries the whole capability set.
    pub fn start<R, W>(reader: R, writer: W, stderr_tx: broadcast::Sender<String>) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (updates_tx, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        let inner = Arc::new(ClientInner {
            writer: Mutex::new(Some(Box::new(writer) as Writer)),
            pending: parking_lot::Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            updates_tx,
            stderr_tx,
        });

        tokio::spawn(read_loop(BufReader::new(reader), Arc::clone(&inner)));

        Self { inner }
    }

    /// Perform the `initialize` handshake.
    pub async fn initialize(&self) -> Result<(), AcpError> {
        self.request("initialize", initialize_params(), ACP_REQUEST_TIMEOUT)
            .await?;
        Ok(())
    }

    /// Close the agent's stdin. The conventional soft-termination signal
    /// for stdio agents; the process exits when it notices EOF.
    pub async fn close(&self) {
        let mut writer = self.inner.writer.lock().await;
        if let Some(mut w) = writer.take() {
            let _ = w.shutdown().await;
        }
    }

    async fn request(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, AcpError> {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.inner.pending.lock().insert(id, tx);

        let message = serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        if let Err(e) = self.write_line(&message).await {
            self.inner.pending.lock().remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(AcpError::Closed),
            Err(_) => {
                self.inner.pending.lock().remove(&id);
                Err(AcpError::Timeout(method.to_string()))
            }
        }
    }

    async fn write_line(&self, message: &Value) -> Result<(), AcpError> {
        let mut line = serde_json::to_vec(message)
            .map_err(|e| AcpError::Protocol(e.to_string()))?;
        line.push(b'\n');

        let mut writer = self.inner.writer.lock().await;
        let Some(w) = writer.as_mut() else {
            return Err(AcpError::Closed);
        };
        w.write_all(&line)
            .await
            .map_err(|e| AcpError::Process(e.to_string()))?;
        w.flush()
            .await
            .map_err(|e| AcpError::Process(e.to_string()))
    }
}

#[async_trait]
impl AcpTransport for AcpClient {
    async fn new_session(&self) -> Result<String, AcpError> {
        let result = self
            .request(
                "session/new",
                serde_json::json!({ "cwd": std::env::current_dir().ok() }),
                ACP_REQUEST_TIMEOUT,
            )
            .await?;
        result
            .get("sessionId")
            .and_then(Value::as_str)
            .map(String::from)
            .ok_or_else(|| AcpError::Protocol("session/new response missing sessionId".into()))
    }

    async fn prompt(
        &self,
        session_id: &str,
        source: PromptSource,
        text: &str,
    ) -> Result<PromptOutcome, AcpError> {
        let role = match source {
            PromptSource::User => "user",
            PromptSource::System => "system",
        };
        let result = self
            .request(
                "session/prompt",
                prompt_params(session_id, role, text),
                PROMPT_TIMEOUT,
            )
            .await?;
        Ok(PromptOutcome {
            stop_reason: result
                .get("stopReason")
                .and_then(Value::as_str)
                .map(String::from),
        })
    }

    fn subscribe_updates(&self) -> broadcast::Receiver<SessionNotification> {
        self.inner.updates_tx.subscribe()
    }

    fn subscribe_stderr(&self) -> broadcast::Receiver<String> {
        self.inner.stderr_tx.subscribe()
    }

    async fn is_reachable(&self) -> bool {
        // Any response proves the agent is processing the stream; an error
        // reply (unknown method) counts as reachable.
        match self
            .request("ping", serde_json::json!({}), ACP_PING_TIMEOUT)
            .await
        {
            Ok(_) | Err(AcpError::Agent { .. }) => true,
            Err(_) => false,
        }
    }
}

async fn read_loop<R>(reader: BufReader<R>, inner: Arc<ClientInner>)
where
    R: AsyncRead + Send + Unpin + 'static,
{
    let mut lines = reader.lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "ACP read error");
                break;
            }
        };
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let message: Value = match serde_json::from_str(trimmed) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "dropping malformed ACP line");
                continue;
            }
        };
        route_message(&inner, message).await;
    }

    // Stream ended: fail everything still waiting.
    let mut pending = inner.pending.lock();
    for (_, tx) in pending.drain() {
        let _ = tx.send(Err(AcpError::Closed));
    }
}

async fn route_message(inner: &Arc<ClientInner>, message: Value) {
    let id = message.get("id").and_then(Value::as_u64);
    let method = message.get("method").and_then(Value::as_str);

    match (id, method) {
        // Response to one of our requests
        (Some(id), None) => {
            let waiter = inner.pending.lock().remove(&id);
            let Some(waiter) = waiter else {
                debug!(id, "dropping response with no pending request");
                return;
            };
            let outcome = if let Some(error) = message.get("error") {
                Err(AcpError::Agent {
                    code: error.get("code").and_then(Value::as_i64).unwrap_or(0),
                    message: error
                        .get("message")
                        .and_then(Value::as_str)
                        .unwrap_or("unknown")
                        .to_string(),
                })
            } else {
                Ok(message.get("result").cloned().unwrap_or(Value::Null))
            };
            let _ = waiter.send(outcome);
        }

        // Notification from the agent
        (None, Some("session/update")) => {
            let params = message.get("params").cloned().unwrap_or(Value::Null);
            let session_id = params
                .get("sessionId")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let update = params
                .get("update")
                .map(SessionUpdate::from_params)
                .unwrap_or(SessionUpdate::Other {
                    update_type: "missing".to_string(),
                });
            let _ = inner.updates_tx.send(SessionNotification { session_id, update });
        }

        // Agent-initiated request
        (Some(id), Some("session/request_permission")) => {
            let option_id = message
                .pointer("/params/options/0/optionId")
                .and_then(Value::as_str)
                .unwrap_or("allow");
            let response = serde_json::json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": { "outcome": { "outcome": "selected", "optionId": option_id } },
            });
            send_raw(inner, response).await;
        }

        (Some(id), Some(method)) => {
            debug!(method, "replying method-not-found to agent request");
            let response = serde_json::json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": { "code": -32601, "message": format!("method not found: {method}") },
            });
            send_raw(inner, response).await;
        }

        (None, Some(method)) => {
            debug!(method, "ignoring unknown ACP notification");
        }

        (None, None) => {
            warn!("dropping ACP message with neither id nor method");
        }
    }
}

async fn send_raw(inner: &Arc<ClientInner>, message: Value) {
    let Ok(mut line) = serde_json::to_vec(&message) else {
        return;
    };
    line.push(b'\n');
    let mut writer = inner.writer.lock().await;
    if let Some(w) = writer.as_mut() {
        if let Err(e) = w.write_all(&line).await {
            warn!(error = %e, "failed writing ACP response");
        }
        let _ = w.flush().await;
    }
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
