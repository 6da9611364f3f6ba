// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! kbot-core: Shared types for the kbot chat-bot runtime

pub mod agent;
pub mod checkpoint;
pub mod clock;
pub mod conversation;
pub mod event;
pub mod id;
pub mod message;
pub mod session;
pub mod session_key;
pub mod turn;
pub mod usage;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use agent::{AgentCheckpoint, AutonomousCheckpoint, CircuitState, LifecycleState, LoopState};
pub use checkpoint::{
    CheckpointError, CheckpointId, RestartReason, SupervisorCheckpoint, WakeContext,
    CHECKPOINT_TTL_MS,
};
pub use clock::{Clock, FakeClock, SystemClock};
pub use conversation::{Conversation, ConversationId, ConversationStatus};
pub use event::{
    EventBody, EventKind, MessageChunkData, NoteData, PromptSentData, PromptSource,
    SessionEndData, SessionEvent, SessionStartData, SessionUpdateData, ToolCallData,
    ToolResultData, UpdateContent, UpdatePayload,
};
pub use id::{new_trace_id, IdGen, SequentialIdGen, ShortId, UlidIdGen};
pub use message::{session_key_for, MessageSender, NormalizedMessage};
pub use session::{AgentSession, SessionId, SessionStatus};
pub use session_key::{PeerKind, SessionKey, SessionKeyError};
pub use turn::{EventRange, EventRangeError, Turn, TurnRole};
pub use usage::{ContextUsageUpdate, UsageCategory};
