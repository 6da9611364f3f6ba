// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! No-op chat adapter (headless / autonomous runs).

use super::{ChatAdapter, ChatError};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Discards output; message ids are locally generated.
#[derive(Clone, Default)]
pub struct NoOpChatAdapter {
    counter: Arc<AtomicU64>,
}

impl NoOpChatAdapter {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChatAdapter for NoOpChatAdapter {
    async fn send_message(&self, _channel: &str, _content: &str) -> Result<String, ChatError> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        Ok(format!("noop-{n}"))
    }

    async fn edit_message(
        &self,
        _channel: &str,
        _message_id: &str,
        _content: &str,
    ) -> Result<(), ChatError> {
        Ok(())
    }

    async fn start_typing(&self, _channel: &str) {}

    async fn stop_typing(&self, _channel: &str) {}

    async fn stop(&self) {}
}

#[cfg(test)]
#[path = "noop_tests.rs"]
mod tests;
