// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Chat-platform adapters.
//!
//! Concrete platform integrations live outside this repo; the runtime
//! consumes the capability set below. Inbound messages arrive as
//! `kbot_core::NormalizedMessage` via whatever transport the adapter uses.

mod noop;

pub use noop::NoOpChatAdapter;

// Test support - only compiled for tests or when explicitly requested
#[cfg(any(test, feature = "test-support"))]
mod fake;
#[cfg(any(test, feature = "test-support"))]
pub use fake::{ChatCall, FakeChatAdapter};

use async_trait::async_trait;
use thiserror::Error;

/// Errors from chat operations
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("send failed: {0}")]
    SendFailed(String),
    #[error("edit failed: {0}")]
    EditFailed(String),
}

/// Adapter for sending to a chat platform
#[async_trait]
pub trait ChatAdapter: Clone + Send + Sync + 'static {
    /// Send a message; returns the platform-assigned message id.
    async fn send_message(&self, channel: &str, content: &str) -> Result<String, ChatError>;

    /// Edit a previously sent message in place.
    async fn edit_message(
        &self,
        channel: &str,
        message_id: &str,
        content: &str,
    ) -> Result<(), ChatError>;

    /// Begin a typing indicator loop for the channel.
    async fn start_typing(&self, channel: &str);

    /// Stop the typing indicator loop for the channel.
    async fn stop_typing(&self, channel: &str);

    /// Tear down the adapter (flush, disconnect).
    async fn stop(&self);
}
