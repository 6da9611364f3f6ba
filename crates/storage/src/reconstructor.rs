// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Turn content reconstruction from event ranges.
//!
//! Content is strictly derived: a turn points at `[start_seq, end_seq]` and
//! this module materializes the text on demand. Missing events render as one
//! `[gap: events X-Y missing]` marker per maximal missing run, so dangling
//! turn references degrade visibly instead of failing.

use crate::{SessionStore, StorageError, StoreEvent, StoreObserver};
use kbot_core::{Clock, EventBody, EventRange, SessionEvent, SessionId, ToolResultData};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use std::fmt::Write as _;
use std::sync::Arc;

/// Maximum characters of tool input carried into the inline summary.
const TOOL_INPUT_MAX: usize = 100;

/// Maximum characters of tool outcome carried into the inline summary.
const TOOL_OUTCOME_MAX: usize = 80;

/// Options for reconstruction.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReconstructOptions {
    /// Render `tool.call`/`tool.result` pairs as one-line summaries.
    pub summarize_tools: bool,
}

/// Materialized turn content plus read statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct Reconstruction {
    pub content: String,
    pub has_gaps: bool,
    pub events_read: usize,
    pub events_missing: u64,
}

/// Reconstructs turn content by reading event ranges from a session store.
pub struct TurnReconstructor<C: Clock> {
    store: Arc<SessionStore<C>>,
    observer: Mutex<Option<StoreObserver>>,
}

impl<C: Clock> TurnReconstructor<C> {
    pub fn new(store: Arc<SessionStore<C>>) -> Self {
        Self {
            store,
            observer: Mutex::new(None),
        }
    }

    pub fn set_observer(&self, observer: StoreObserver) {
        *self.observer.lock() = Some(observer);
    }

    /// Reconstruct the content of `[start_seq, end_seq]` inclusive.
    pub fn reconstruct(
        &self,
        session_id: &SessionId,
        start_seq: u64,
        end_seq: u64,
        opts: ReconstructOptions,
    ) -> Result<Reconstruction, StorageError> {
        if session_id.as_str().is_empty() {
            return Err(StorageError::validation("session_id", "must not be empty"));
        }
        if start_seq > end_seq {
            return Err(StorageError::validation(
                "event_range",
                format!("start_seq {start_seq} must not exceed end_seq {end_seq}"),
            ));
        }

        // The range is pre-validated, so construction cannot fail.
        let range = EventRange::new(start_seq, end_seq)
            .map_err(|e| StorageError::validation("event_range", e.to_string()))?;
        let read = self.store.read_events(session_id, Some(range))?;

        let by_seq: BTreeMap<u64, &SessionEvent> =
            read.events.iter().map(|e| (e.seq, e)).collect();

        let mut content = String::new();
        let mut consumed_results: HashSet<u64> = HashSet::new();
        let mut gap_start: Option<u64> = None;
        let mut events_missing = 0u64;

        for seq in start_seq..=end_seq {
            match by_seq.get(&seq) {
                Some(event) => {
                    if let Some(start) = gap_start.take() {
                        push_gap(&mut content, start, seq - 1);
                    }
                    if consumed_results.contains(&seq) {
                        continue;
                    }
                    match (&event.body, opts.summarize_tools) {
                        (EventBody::ToolCall(call), true) => {
                            let paired = find_result(event, &by_seq, seq, end_seq);
                            if let Some((result_seq, _)) = paired {
                                consumed_results.insert(result_seq);
                            }
                            content.push_str(&format_tool_line(
                                &call.name,
                                &call.input,
                                paired.map(|(_, r)| r),
                            ));
                        }
                        _ => content.push_str(event.content_text()),
                    }
                }
                None => {
                    events_missing += 1;
                    if gap_start.is_none() {
                        gap_start = Some(seq);
                    }
                }
            }
        }
        if let Some(start) = gap_start.take() {
            push_gap(&mut content, start, end_seq);
        }

        let reconstruction = Reconstruction {
            content,
            has_gaps: events_missing > 0,
            events_read: by_seq.len(),
            events_missing,
        };

        if let Some(observer) = self.observer.lock().clone() {
            observer(StoreEvent::ReconstructionCompleted {
                session_id: session_id.clone(),
                events_read: reconstruction.events_read,
                events_missing: reconstruction.events_missing,
                has_gaps: reconstruction.has_gaps,
            });
        }

        Ok(reconstruction)
    }
}

fn push_gap(content: &mut String, start: u64, end: u64) {
    // Infallible on String; ignore the fmt::Result.
    let _ = write!(content, "[gap: events {start}-{end} missing]");
}

/// Find the `tool.result` paired with a call, by call_id then trace_id.
fn find_result<'a>(
    call_event: &SessionEvent,
    by_seq: &BTreeMap<u64, &'a SessionEvent>,
    call_seq: u64,
    end_seq: u64,
) -> Option<(u64, &'a ToolResultData)> {
    let call_id = match &call_event.body {
        EventBody::ToolCall(c) => c.call_id.as_deref(),
        _ => None,
    };

    for seq in (call_seq + 1)..=end_seq {
        let Some(event) = by_seq.get(&seq) else {
            continue;
        };
        let EventBody::ToolResult(result) = &event.body else {
            continue;
        };
        let by_call_id = call_id.is_some() && result.call_id.as_deref() == call_id;
        let by_trace = call_event.trace_id.is_some() && event.trace_id == call_event.trace_id;
        if by_call_id || by_trace {
            return Some((seq, result));
        }
    }
    None
}

fn format_tool_line(name: &str, input: &str, result: Option<&ToolResultData>) -> String {
    let input = truncate_input(input);
    match result {
        Some(result) => {
            let status = if result.is_error { "failure" } else { "success" };
            let outcome = first_line_truncated(&result.output, TOOL_OUTCOME_MAX);
            format!("[tool: {name} | {input} | {status} | {outcome}]")
        }
        None => format!("[tool: {name} | {input} | pending]"),
    }
}

/// Truncate tool input to [`TOOL_INPUT_MAX`] characters.
///
/// Path-like inputs keep their tail (the filename is the informative part);
/// everything else keeps its head.
fn truncate_input(input: &str) -> String {
    let count = input.chars().count();
    if count <= TOOL_INPUT_MAX {
        return input.to_string();
    }
    let keep = TOOL_INPUT_MAX - 3;
    if input.contains('/') {
        let tail: String = input
            .chars()
            .skip(count - keep)
            .collect();
        format!("...{tail}")
    } else {
        let head: String = input.chars().take(keep).collect();
        format!("{head}...")
    }
}

fn first_line_truncated(text: &str, max: usize) -> String {
    let line = text.lines().next().unwrap_or("");
    if line.chars().count() <= max {
        line.to_string()
    } else {
        let head: String = line.chars().take(max - 3).collect();
        format!("{head}...")
    }
}

#[cfg(test)]
#[path = "reconstructor_tests.rs"]
mod tests;
