// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Token-budget turn selection.
//!
//! Walks turns newest to oldest, accumulating estimated token cost until
//! the budget (plus a small overflow margin) is exhausted. Tool-call turns
//! are budgeted at their summarized size since that is what the restoration
//! prompt will carry. Everything older becomes the archive.

use super::summarizer::ToolSummarizer;
use crate::error::EngineError;
use kbot_core::{Clock, Turn};
use kbot_storage::{ReconstructOptions, TurnReconstructor};
use std::sync::Arc;

/// Selector configuration.
#[derive(Debug, Clone)]
pub struct SelectorConfig {
    pub max_context_tokens: u64,
    /// Fraction of the context window spent on replayed history.
    pub budget_fraction: f64,
    /// Allowed overflow past the budget.
    pub margin_fraction: f64,
    /// Characters per token for the estimate.
    pub chars_per_token: u64,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            max_context_tokens: 200_000,
            budget_fraction: 0.30,
            margin_fraction: 0.05,
            chars_per_token: 4,
        }
    }
}

impl SelectorConfig {
    pub fn budget_tokens(&self) -> u64 {
        (self.max_context_tokens as f64 * self.budget_fraction) as u64
    }

    pub fn margin_tokens(&self) -> u64 {
        (self.budget_tokens() as f64 * self.margin_fraction) as u64
    }
}

/// A turn with its display content, ready for prompt assembly.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectedTurn {
    pub turn: Turn,
    pub content: String,
    pub tokens: u64,
}

/// Selection statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectionStats {
    pub total_tokens: u64,
    pub excluded_count: usize,
    pub within_budget: bool,
}

/// Result of selection: recent turns (chronological) plus the archive.
#[derive(Debug, Clone)]
pub struct TurnSelection {
    pub recent: Vec<SelectedTurn>,
    pub archived: Vec<Turn>,
    pub stats: SelectionStats,
}

/// Selects the most recent turns that fit the token budget.
pub struct TurnSelector<C: Clock> {
    reconstructor: Arc<TurnReconstructor<C>>,
    summarizer: ToolSummarizer,
    config: SelectorConfig,
}

impl<C: Clock> TurnSelector<C> {
    pub fn new(
        reconstructor: Arc<TurnReconstructor<C>>,
        summarizer: ToolSummarizer,
        config: SelectorConfig,
    ) -> Self {
        Self {
            reconstructor,
            summarizer,
            config,
        }
    }

    /// Estimated token cost of a string: `ceil(len / chars_per_token)`.
    fn estimate_tokens(&self, text: &str) -> u64 {
        let chars = text.chars().count() as u64;
        chars.div_ceil(self.config.chars_per_token)
    }

    /// Select turns newest→oldest within budget; returns them in
    /// chronological order plus the unselected older prefix.
    pub fn select(&self, turns: &[Turn]) -> Result<TurnSelection, EngineError> {
        let budget = self.config.budget_tokens();
        let limit = budget + self.config.margin_tokens();

        let mut picked: Vec<SelectedTurn> = Vec::new();
        let mut total = 0u64;
        let mut cutoff = turns.len();

        for (index, turn) in turns.iter().enumerate().rev() {
            let content = self
                .reconstructor
                .reconstruct(
                    &turn.session_id,
                    turn.event_range.start_seq,
                    turn.event_range.end_seq,
                    ReconstructOptions::default(),
                )?
                .content;
            let content = if self.summarizer.is_tool_call(&content) {
                self.summarizer.summarize(&content)
            } else {
                content
            };

            let tokens = self.estimate_tokens(&content);
            if total + tokens > limit {
                break;
            }
            total += tokens;
            cutoff = index;
            picked.push(SelectedTurn {
                turn: turn.clone(),
                content,
                tokens,
            });
        }

        picked.reverse();
        let archived = turns[..cutoff].to_vec();
        let stats = SelectionStats {
            total_tokens: total,
            excluded_count: archived.len(),
            within_budget: total <= budget,
        };

        Ok(TurnSelection {
            recent: picked,
            archived,
            stats,
        })
    }
}

#[cfg(test)]
#[path = "selector_tests.rs"]
mod tests;
