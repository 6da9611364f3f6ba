// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Context-window usage reported by the agent.

use serde::{Deserialize, Serialize};

/// One row of the per-category usage breakdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageCategory {
    pub name: String,
    pub tokens: u64,
}

/// Most recent context consumption observed for one agent session.
///
/// `percentage` is a fraction in `[0, 1]`; rotation triggers when it crosses
/// the session-lifecycle threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextUsageUpdate {
    pub model: String,
    pub used_tokens: u64,
    pub max_tokens: u64,
    pub percentage: f64,
    #[serde(default)]
    pub categories: Vec<UsageCategory>,
    /// Epoch ms when the reading was captured (drives debounce).
    pub captured_at_ms: u64,
}

impl ContextUsageUpdate {
    /// Derive the fraction from raw token counts.
    pub fn fraction(used: u64, max: u64) -> f64 {
        if max == 0 {
            0.0
        } else {
            used as f64 / max as f64
        }
    }
}

#[cfg(test)]
#[path = "usage_tests.rs"]
mod tests;
