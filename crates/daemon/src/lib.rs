// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! kbot-daemon: the two processes of the supervision tree.
//!
//! `kbot-supervisor` keeps exactly one `kbotd` child alive across planned
//! restarts and crashes, passing checkpoints between incarnations. `kbotd`
//! is the bot runtime itself: stores, shadow history, agent lifecycle,
//! escalation, the autonomous task loop, and message orchestration.

pub mod env;
pub mod ipc;
pub mod launcher;
pub mod runtime;
pub mod supervisor;
pub mod tasks;

pub use ipc::{ChildMessage, IpcError, SupervisorMessage};
pub use launcher::{AcpAgentInstance, AcpAgentLauncher, ClientSlot, SharedAcpClient};
pub use runtime::{BotRuntime, RuntimeConfig, RuntimeError};
pub use tasks::{QueueTaskSource, TaskHandler, TASK_CHANNEL};
pub use supervisor::{
    Supervisor, SupervisorConfig, SupervisorError, SupervisorEvent, SupervisorOutcome,
    SupervisorState,
};
