// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Adapters for kbot's external collaborators.
//!
//! - `acp`: the coding-agent subprocess and its streaming JSON-RPC client
//! - `chat`: platform adapter capability set (send/edit/typing)
//! - `notify`: escalation notification channels
//! - `subprocess`: timed subprocess execution helpers

pub mod acp;
pub mod chat;
pub mod notify;
pub mod subprocess;

pub use acp::{
    AcpClient, AcpError, AcpTransport, AgentProcess, AgentProcessConfig, PromptOutcome,
    SessionNotification, SessionUpdate,
};
pub use chat::{ChatAdapter, ChatError, NoOpChatAdapter};
pub use notify::{DesktopNotifyAdapter, NoOpNotifyAdapter, NotifyAdapter, NotifyError};

#[cfg(any(test, feature = "test-support"))]
pub use acp::FakeAcp;
#[cfg(any(test, feature = "test-support"))]
pub use chat::{ChatCall, FakeChatAdapter};
#[cfg(any(test, feature = "test-support"))]
pub use notify::{FakeNotifyAdapter, NotifyCall};
