// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Message orchestration.
//!
//! For each inbound message: resolve its session key, serialize on the
//! per-key lock, obtain (or rotate) the agent session, inject a system
//! prompt into fresh sessions (identity or restoration), forward the text
//! as a user prompt, stream updates into the session store, reply on the
//! platform, and append the user/assistant turn pair. A failed message is
//! never dropped silently: it produces a `MessageFailed` event and a
//! best-effort error reply.

use crate::bus::{EngineEvent, EventBus};
use crate::error::EngineError;
use crate::restore::{ContextRestorer, SummaryProvider};
use crate::session_lifecycle::{ResolutionOutcome, SessionLifecycleManager};
use crate::usage::ContextUsageTracker;
use kbot_adapters::{AcpTransport, ChatAdapter, SessionUpdate};
use kbot_core::{
    new_trace_id, session_key_for, Clock, EventBody, EventRange, MessageChunkData,
    NormalizedMessage, PromptSentData, PromptSource, SessionId, SessionKey, SessionStartData,
    SessionUpdateData, ToolCallData, ToolResultData, TurnRole, UpdateContent, UpdatePayload,
};
use kbot_storage::{AppendEvent, ConversationStore, CreateSession, SessionStore, TurnInput};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Bot configuration.
#[derive(Debug, Clone)]
pub struct BotConfig {
    /// Agent segment of the session key.
    pub agent: String,
    /// Agent type recorded on sessions.
    pub agent_type: String,
    /// System prompt for brand-new conversations.
    pub identity_prompt: String,
    /// Reply sent when message handling fails.
    pub error_reply: String,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            agent: "kbot".to_string(),
            agent_type: "coder".to_string(),
            identity_prompt: "You are kbot, a coding assistant bridged into this chat. \
                              Answer concisely and use your tools when needed."
                .to_string(),
            error_reply: "Something went wrong handling that message; it has been logged."
                .to_string(),
        }
    }
}

/// Everything the bot orchestrates over.
pub struct BotDeps<A, Ch, C, P>
where
    A: AcpTransport,
    Ch: ChatAdapter,
    C: Clock,
    P: SummaryProvider,
{
    pub acp: A,
    pub chat: Ch,
    pub clock: C,
    pub bus: EventBus,
    pub sessions: Arc<SessionStore<C>>,
    pub conversations: Arc<ConversationStore<C>>,
    pub manager: Arc<SessionLifecycleManager<C>>,
    pub usage: Arc<ContextUsageTracker<C>>,
    pub restorer: ContextRestorer<C, P>,
}

/// Outcome of one handled message.
#[derive(Debug, Clone, PartialEq)]
pub struct HandledMessage {
    pub reply: String,
    pub reply_message_id: String,
    pub session_id: SessionId,
    pub rotated: bool,
}

/// Glue between the platform, the managers, and the agent.
pub struct Bot<A, Ch, C, P>
where
    A: AcpTransport,
    Ch: ChatAdapter,
    C: Clock,
    P: SummaryProvider,
{
    config: BotConfig,
    deps: BotDeps<A, Ch, C, P>,
    key_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl<A, Ch, C, P> Bot<A, Ch, C, P>
where
    A: AcpTransport,
    Ch: ChatAdapter,
    C: Clock,
    P: SummaryProvider,
{
    pub fn new(config: BotConfig, deps: BotDeps<A, Ch, C, P>) -> Self {
        Self {
            config,
            deps,
            key_locks: Mutex::new(HashMap::new()),
        }
    }

    fn key_lock(&self, key: &SessionKey) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.key_locks.lock();
        Arc::clone(
            locks
                .entry(key.build())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
        )
    }

    /// Handle one normalized inbound message end to end.
    pub async fn handle_message(
        &self,
        msg: NormalizedMessage,
    ) -> Result<HandledMessage, EngineError> {
        let key = session_key_for(&self.config.agent, &msg)?;
        let lock = self.key_lock(&key);
        let _guard = lock.lock().await;

        match self.handle_locked(&key, &msg).await {
            Ok(handled) => Ok(handled),
            Err(e) => {
                warn!(message_id = %msg.id, error = %e, "message handling failed");
                self.deps.bus.emit(EngineEvent::MessageFailed {
                    message_id: msg.id.clone(),
                    context: format!("key={} code={} error={e}", key.build(), e.code()),
                });
                if let Err(send_err) = self
                    .deps
                    .chat
                    .send_message(&msg.channel, &self.config.error_reply)
                    .await
                {
                    warn!(error = %send_err, "error reply delivery failed");
                }
                Err(e)
            }
        }
    }

    async fn handle_locked(
        &self,
        key: &SessionKey,
        msg: &NormalizedMessage,
    ) -> Result<HandledMessage, EngineError> {
        let conv = self.deps.conversations.get_or_create_conversation(key)?;

        // Resolve (or rotate) the agent session for this key
        let acp = self.deps.acp.clone();
        let sessions = Arc::clone(&self.deps.sessions);
        let conv_id = conv.id.clone();
        let agent_type = self.config.agent_type.clone();
        let serialized_key = key.build();
        let resolution = self
            .deps
            .manager
            .get_or_create_session(key, move || async move {
                let acp_session = acp.new_session().await?;
                let session = sessions.create_session(CreateSession {
                    id: Some(SessionId::new(acp_session)),
                    conversation_id: Some(conv_id),
                    agent_type: agent_type.clone(),
                    session_key: Some(serialized_key.clone()),
                })?;
                sessions.append_event(AppendEvent {
                    session_id: session.id.clone(),
                    body: EventBody::SessionStart(SessionStartData {
                        agent_type,
                        session_key: Some(serialized_key),
                    }),
                    trace_id: None,
                    ts: None,
                })?;
                Ok(session.id)
            })
            .await?;
        let session_id = resolution.session_id.clone();
        let rotated = matches!(resolution.outcome, ResolutionOutcome::Rotated { .. });

        // Fresh sessions get a system prompt before the first user message:
        // a context restoration when history exists, the identity prompt
        // otherwise.
        if resolution.outcome != ResolutionOutcome::Existing {
            let turns = self.deps.conversations.read_turns(&conv.id)?;
            let restoration = self.deps.restorer.build(&conv, &turns.turns).await?;
            let system_prompt = if restoration.skipped {
                self.config.identity_prompt.clone()
            } else {
                restoration.prompt
            };
            self.deps.sessions.append_event(AppendEvent {
                session_id: session_id.clone(),
                body: EventBody::PromptSent(PromptSentData {
                    content: system_prompt.clone(),
                    source: PromptSource::System,
                }),
                trace_id: None,
                ts: None,
            })?;
            self.deps
                .acp
                .prompt(session_id.as_str(), PromptSource::System, &system_prompt)
                .await?;
            info!(session_id = %session_id, restored = !restoration.skipped, "system prompt injected");
        }

        // Forward the user message and stream the turn back into the log
        let user_appended = self.deps.sessions.append_event(AppendEvent {
            session_id: session_id.clone(),
            body: EventBody::PromptSent(PromptSentData {
                content: msg.text.clone(),
                source: PromptSource::User,
            }),
            trace_id: None,
            ts: None,
        })?;

        let mut updates = self.deps.acp.subscribe_updates();
        self.deps.chat.start_typing(&msg.channel).await;
        let prompt_result = self
            .deps
            .acp
            .prompt(session_id.as_str(), PromptSource::User, &msg.text)
            .await;
        self.deps.chat.stop_typing(&msg.channel).await;
        prompt_result?;

        let mut reply = String::new();
        let mut first_assistant_seq: Option<u64> = None;
        let mut last_seq = user_appended.seq;
        let mut call_traces: HashMap<String, String> = HashMap::new();

        while let Ok(notification) = updates.try_recv() {
            if notification.session_id != session_id.as_str() {
                continue;
            }
            let (body, trace_id) = match notification.update {
                SessionUpdate::AgentMessageChunk { text } => {
                    reply.push_str(&text);
                    (
                        EventBody::MessageChunk(MessageChunkData { content: text }),
                        None,
                    )
                }
                SessionUpdate::ToolCall {
                    call_id,
                    name,
                    input,
                } => {
                    let trace = new_trace_id();
                    call_traces.insert(call_id.clone(), trace.clone());
                    (
                        EventBody::ToolCall(ToolCallData {
                            name,
                            input,
                            call_id: Some(call_id),
                        }),
                        Some(trace),
                    )
                }
                SessionUpdate::ToolCallUpdate {
                    call_id,
                    status,
                    output,
                } => {
                    if status != "completed" && status != "failed" {
                        continue;
                    }
                    let trace = call_traces.get(&call_id).cloned();
                    (
                        EventBody::ToolResult(ToolResultData {
                            call_id: Some(call_id),
                            output,
                            is_error: status == "failed",
                        }),
                        trace,
                    )
                }
                SessionUpdate::Other { update_type } => (
                    EventBody::SessionUpdate(SessionUpdateData {
                        update_type,
                        payload: UpdatePayload {
                            content: Some(UpdateContent::default()),
                        },
                    }),
                    None,
                ),
            };
            let appended = self.deps.sessions.append_event(AppendEvent {
                session_id: session_id.clone(),
                body,
                trace_id,
                ts: None,
            })?;
            first_assistant_seq.get_or_insert(appended.seq);
            last_seq = appended.seq;
        }

        let reply_text = if reply.trim().is_empty() {
            "(no response)".to_string()
        } else {
            reply
        };
        let reply_id = self
            .deps
            .chat
            .send_message(&msg.channel, &reply_text)
            .await?;

        // Two turns per interaction, both pointing into this event window
        self.deps.conversations.append_turn(
            &conv.id,
            TurnInput {
                role: TurnRole::User,
                session_id: session_id.clone(),
                event_range: EventRange {
                    start_seq: user_appended.seq,
                    end_seq: user_appended.seq,
                },
                message_id: Some(msg.id.clone()),
                metadata: None,
                ts: Some(msg.timestamp_ms),
            },
        )?;
        self.deps.conversations.append_turn(
            &conv.id,
            TurnInput {
                role: TurnRole::Assistant,
                session_id: session_id.clone(),
                event_range: EventRange {
                    start_seq: first_assistant_seq.unwrap_or(user_appended.seq),
                    end_seq: last_seq,
                },
                message_id: Some(reply_id.clone()),
                metadata: None,
                ts: None,
            },
        )?;

        // Opportunistic usage refresh; debounced and never fatal
        if let Some(update) = self
            .deps
            .usage
            .check_usage(&session_id, &self.deps.acp)
            .await
        {
            self.deps.manager.update_context_usage(key, update).await;
        }

        Ok(HandledMessage {
            reply: reply_text,
            reply_message_id: reply_id,
            session_id,
            rotated,
        })
    }
}

#[cfg(test)]
#[path = "bot_tests.rs"]
mod tests;
