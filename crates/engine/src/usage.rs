// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Context usage tracking via the agent's stderr side-channel.
//!
//! A `/usage` system prompt makes the agent print a
//! `<local-command-stdout>…</local-command-stdout>` block on stderr with the
//! model, `current/max (pct)` counters, and per-category rows. The tracker
//! parses that block, caches per-session readings, and debounces probes.
//! Every failure path returns the last-known reading (possibly none) so the
//! message pipeline proceeds on stale data instead of stalling.

use crate::bus::{EngineEvent, EventBus};
use kbot_adapters::AcpTransport;
use kbot_core::{Clock, ContextUsageUpdate, PromptSource, SessionId, SystemClock, UsageCategory};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Opening delimiter of the usage block on stderr.
const BLOCK_OPEN: &str = "<local-command-stdout>";
/// Closing delimiter of the usage block on stderr.
const BLOCK_CLOSE: &str = "</local-command-stdout>";

/// Usage tracker configuration.
#[derive(Debug, Clone)]
pub struct UsageConfig {
    /// How long to wait for the stderr block.
    pub timeout: Duration,
    /// Repeat probes inside this window return the cached reading.
    pub debounce_interval: Duration,
}

impl Default for UsageConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            debounce_interval: Duration::from_secs(30),
        }
    }
}

/// Observes agent context consumption without blocking the main path.
pub struct ContextUsageTracker<C: Clock = SystemClock> {
    config: UsageConfig,
    clock: C,
    bus: EventBus,
    cache: Mutex<HashMap<String, ContextUsageUpdate>>,
    last_probe: Mutex<HashMap<String, Instant>>,
}

impl<C: Clock> ContextUsageTracker<C> {
    pub fn new(config: UsageConfig, clock: C, bus: EventBus) -> Self {
        Self {
            config,
            clock,
            bus,
            cache: Mutex::new(HashMap::new()),
            last_probe: Mutex::new(HashMap::new()),
        }
    }

    /// Last cached reading for a session.
    pub fn cached(&self, session_id: &SessionId) -> Option<ContextUsageUpdate> {
        self.cache.lock().get(session_id.as_str()).cloned()
    }

    /// Probe current usage. Never fails: parse errors and timeouts emit an
    /// event and fall back to the last-known reading.
    pub async fn check_usage<A: AcpTransport>(
        &self,
        session_id: &SessionId,
        client: &A,
    ) -> Option<ContextUsageUpdate> {
        // Debounce: recent probe -> cached value, no agent contact
        {
            let last = self.last_probe.lock().get(session_id.as_str()).copied();
            if let Some(last) = last {
                if last.elapsed() < self.config.debounce_interval {
                    debug!(session_id = %session_id, "usage probe debounced");
                    return self.cached(session_id);
                }
            }
        }
        self.last_probe
            .lock()
            .insert(session_id.as_str().to_string(), Instant::now());

        // Subscribe before prompting so the block cannot race past us
        let stderr = client.subscribe_stderr();

        let prompt_client = client.clone();
        let prompt_session = session_id.as_str().to_string();
        let prompt = tokio::spawn(async move {
            prompt_client
                .prompt(&prompt_session, PromptSource::System, "/usage")
                .await
        });

        let block = tokio::time::timeout(self.config.timeout, collect_block(stderr)).await;
        prompt.abort();

        match block {
            Ok(Some(block)) => match parse_usage_block(&block, self.clock.epoch_ms()) {
                Some(update) => {
                    self.cache
                        .lock()
                        .insert(session_id.as_str().to_string(), update.clone());
                    self.bus.emit(EngineEvent::UsageUpdate {
                        session_id: session_id.clone(),
                        update: update.clone(),
                    });
                    Some(update)
                }
                None => {
                    warn!(session_id = %session_id, "unparseable usage block");
                    self.bus.emit(EngineEvent::UsageError {
                        session_id: session_id.clone(),
                        message: "unparseable usage block".to_string(),
                    });
                    self.cached(session_id)
                }
            },
            Ok(None) => {
                self.bus.emit(EngineEvent::UsageError {
                    session_id: session_id.clone(),
                    message: "stderr channel closed".to_string(),
                });
                self.cached(session_id)
            }
            Err(_) => {
                warn!(session_id = %session_id, "usage probe timed out");
                self.bus.emit(EngineEvent::UsageTimeout {
                    session_id: session_id.clone(),
                });
                self.cached(session_id)
            }
        }
    }
}

/// Accumulate stderr lines between the block delimiters.
async fn collect_block(mut stderr: broadcast::Receiver<String>) -> Option<String> {
    let mut inside = false;
    let mut block = String::new();
    loop {
        match stderr.recv().await {
            Ok(line) => {
                if line.contains(BLOCK_OPEN) {
                    inside = true;
                    continue;
                }
                if line.contains(BLOCK_CLOSE) {
                    return Some(block);
                }
                if inside {
                    block.push_str(&line);
                    block.push('\n');
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "usage stderr receiver lagged");
            }
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}

/// Parse the markdown-ish usage block.
///
/// Expected shape (whitespace-tolerant):
/// ```text
/// Model: claude-opus-4
/// Tokens: 140,000 / 200,000 (70%)
/// - messages: 90,000
/// - tools: 30.5k
/// ```
fn parse_usage_block(block: &str, now_ms: u64) -> Option<ContextUsageUpdate> {
    let mut model = None;
    let mut counts: Option<(u64, u64, Option<f64>)> = None;
    let mut categories = Vec::new();

    for line in block.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("Model:") {
            model = Some(rest.trim().to_string());
            continue;
        }
        if counts.is_none() && line.contains('/') {
            if let Some(parsed) = parse_counts_line(line) {
                counts = Some(parsed);
                continue;
            }
        }
        if let Some(rest) = line.strip_prefix("- ") {
            if let Some((name, tokens)) = rest.split_once(':') {
                if let Some(tokens) = parse_token_count(tokens.trim()) {
                    categories.push(UsageCategory {
                        name: name.trim().to_string(),
                        tokens,
                    });
                }
            }
        }
    }

    let (used, max, pct) = counts?;
    let percentage = pct.unwrap_or_else(|| ContextUsageUpdate::fraction(used, max));
    Some(ContextUsageUpdate {
        model: model.unwrap_or_else(|| "unknown".to_string()),
        used_tokens: used,
        max_tokens: max,
        percentage,
        categories,
        captured_at_ms: now_ms,
    })
}

/// Parse `… 140,000 / 200,000 (70%) …` into `(used, max, pct)`.
fn parse_counts_line(line: &str) -> Option<(u64, u64, Option<f64>)> {
    let (before, after) = line.split_once('/')?;
    let used = parse_token_count(last_number_token(before)?)?;

    let after = after.trim();
    let (max_part, pct_part) = match after.split_once('(') {
        Some((max_part, pct_part)) => (max_part, Some(pct_part)),
        None => (after, None),
    };
    let max = parse_token_count(max_part.trim().trim_end_matches(|c: char| {
        !c.is_ascii_digit() && c != 'k' && c != 'm' && c != 'K' && c != 'M'
    }))?;

    let pct = pct_part.and_then(|p| {
        let digits: String = p
            .chars()
            .take_while(|c| c.is_ascii_digit() || *c == '.')
            .collect();
        digits.parse::<f64>().ok().map(|v| v / 100.0)
    });

    Some((used, max, pct))
}

fn last_number_token(text: &str) -> Option<&str> {
    text.split_whitespace()
        .rev()
        .find(|token| token.chars().next().is_some_and(|c| c.is_ascii_digit()))
}

/// Parse `140,000`, `30.5k`, or `1.2m` into a token count.
fn parse_token_count(text: &str) -> Option<u64> {
    let cleaned = text.trim().replace(',', "");
    if cleaned.is_empty() {
        return None;
    }
    let lower = cleaned.to_ascii_lowercase();
    let (digits, multiplier) = if let Some(stripped) = lower.strip_suffix('k') {
        (stripped.to_string(), 1_000.0)
    } else if let Some(stripped) = lower.strip_suffix('m') {
        (stripped.to_string(), 1_000_000.0)
    } else {
        (lower, 1.0)
    };
    let value: f64 = digits.parse().ok()?;
    if value < 0.0 {
        return None;
    }
    Some((value * multiplier).round() as u64)
}

#[cfg(test)]
#[path = "usage_tests.rs"]
mod tests;
