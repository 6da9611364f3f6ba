// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Restoration prompt assembly.
//!
//! Composes the system prompt a fresh agent session receives when it picks
//! up an existing conversation: an optional summary of the archived prefix,
//! the recent turns verbatim (tool calls compacted), and a pointer to the
//! full on-disk history.

use super::selector::{SelectedTurn, SelectionStats, TurnSelector};
use crate::error::EngineError;
use async_trait::async_trait;
use kbot_core::{Clock, Conversation, Turn, TurnRole};
use std::fmt::Write as _;
use std::path::PathBuf;
use tracing::warn;

/// Restorer configuration.
#[derive(Debug, Clone)]
pub struct RestorerConfig {
    /// Data directory holding `conversations/<id>/turns.jsonl`.
    pub base_dir: PathBuf,
    /// Hard cap on any single replayed turn.
    pub max_turn_chars: usize,
}

impl RestorerConfig {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            max_turn_chars: 40_000,
        }
    }
}

/// Summarizes the archived turn prefix (usually an LLM call).
#[async_trait]
pub trait SummaryProvider: Send + Sync + 'static {
    async fn summarize(&self, turns: &[Turn]) -> Result<String, String>;
}

/// The assembled restoration prompt plus bookkeeping.
#[derive(Debug, Clone, PartialEq)]
pub struct Restoration {
    pub prompt: String,
    /// True when the conversation had no prior turns.
    pub skipped: bool,
    /// True when the summary provider failed and only recent turns are
    /// carried.
    pub summary_failed: bool,
    pub stats: Option<SelectionStats>,
}

/// Builds restoration prompts for fresh agent sessions.
pub struct ContextRestorer<C: Clock, P: SummaryProvider> {
    config: RestorerConfig,
    selector: TurnSelector<C>,
    summary_provider: P,
}

impl<C: Clock, P: SummaryProvider> ContextRestorer<C, P> {
    pub fn new(config: RestorerConfig, selector: TurnSelector<C>, summary_provider: P) -> Self {
        Self {
            config,
            selector,
            summary_provider,
        }
    }

    /// Build the restoration prompt for a conversation.
    pub async fn build(
        &self,
        conversation: &Conversation,
        turns: &[Turn],
    ) -> Result<Restoration, EngineError> {
        if turns.is_empty() {
            return Ok(Restoration {
                prompt: String::new(),
                skipped: true,
                summary_failed: false,
                stats: None,
            });
        }

        let selection = self.selector.select(turns)?;

        // Archive summary is best-effort: on failure continue with the
        // recent turns only.
        let mut summary_failed = false;
        let summary = if selection.archived.is_empty() {
            None
        } else {
            match self.summary_provider.summarize(&selection.archived).await {
                Ok(summary) if !summary.trim().is_empty() => Some(summary),
                Ok(_) => None,
                Err(e) => {
                    warn!(error = %e, "archive summary failed; continuing with recent turns only");
                    summary_failed = true;
                    None
                }
            }
        };

        let mut prompt = String::from("## Session Context\n\n");
        let _ = write!(
            prompt,
            "You are resuming an ongoing conversation ({} prior turns).\n\n",
            turns.len()
        );

        if let Some(summary) = summary {
            prompt.push_str("### Summary of Earlier Conversation\n\n");
            prompt.push_str(summary.trim());
            prompt.push_str("\n\n");
        }

        prompt.push_str("### Recent Conversation History\n\n---\n");
        for selected in &selection.recent {
            prompt.push_str(&self.format_turn(selected));
            prompt.push('\n');
        }
        prompt.push_str("---\n\n");

        prompt.push_str("### Archived History\n\n");
        let _ = write!(
            prompt,
            "Full history: {}/conversations/{}/turns.jsonl\n\n",
            self.config.base_dir.display(),
            conversation.id
        );

        prompt.push_str("Continue the conversation naturally from this context.\n");

        Ok(Restoration {
            prompt,
            skipped: false,
            summary_failed,
            stats: Some(selection.stats),
        })
    }

    fn format_turn(&self, selected: &SelectedTurn) -> String {
        let role = match selected.turn.role {
            TurnRole::User => "user",
            TurnRole::Assistant => "assistant",
            TurnRole::System => "system",
        };
        let content = &selected.content;
        if content.chars().count() > self.config.max_turn_chars {
            let head: String = content.chars().take(self.config.max_turn_chars).collect();
            format!("[{role}] {head}[truncated]")
        } else {
            format!("[{role}] {content}")
        }
    }
}

#[cfg(test)]
#[path = "restorer_tests.rs"]
mod tests;
