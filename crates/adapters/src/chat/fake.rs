// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Recording chat adapter for tests.

use super::{ChatAdapter, ChatError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// One recorded adapter call.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatCall {
    Send { channel: String, content: String },
    Edit {
        channel: String,
        message_id: String,
        content: String,
    },
    StartTyping { channel: String },
    StopTyping { channel: String },
    Stop,
}

/// Records every call; scripted to fail sends on demand.
#[derive(Clone, Default)]
pub struct FakeChatAdapter {
    calls: Arc<Mutex<Vec<ChatCall>>>,
    counter: Arc<AtomicU64>,
    fail_sends: Arc<AtomicBool>,
}

impl FakeChatAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<ChatCall> {
        self.calls.lock().clone()
    }

    /// Messages sent, in order.
    pub fn sent(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                ChatCall::Send { content, .. } => Some(content.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn set_fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl ChatAdapter for FakeChatAdapter {
    async fn send_message(&self, channel: &str, content: &str) -> Result<String, ChatError> {
        self.calls.lock().push(ChatCall::Send {
            channel: channel.to_string(),
            content: content.to_string(),
        });
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(ChatError::SendFailed("scripted send failure".to_string()));
        }
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        Ok(format!("fake-msg-{n}"))
    }

    async fn edit_message(
        &self,
        channel: &str,
        message_id: &str,
        content: &str,
    ) -> Result<(), ChatError> {
        self.calls.lock().push(ChatCall::Edit {
            channel: channel.to_string(),
            message_id: message_id.to_string(),
            content: content.to_string(),
        });
        Ok(())
    }

    async fn start_typing(&self, channel: &str) {
        self.calls.lock().push(ChatCall::StartTyping {
            channel: channel.to_string(),
        });
    }

    async fn stop_typing(&self, channel: &str) {
        self.calls.lock().push(ChatCall::StopTyping {
            channel: channel.to_string(),
        });
    }

    async fn stop(&self) {
        self.calls.lock().push(ChatCall::Stop);
    }
}

#[cfg(test)]
#[path = "fake_tests.rs"]
mod tests;
