// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tool-call detection and compaction.
//!
//! Reconstructed turns sometimes carry raw tool transcripts: XML invoke
//! blocks, result dumps, numbered file listings. For context restoration
//! those are compacted to `[Tool: <name>] <action>` plus an optional
//! one-line `Result:` so the semantic step survives without the bulk.

/// Longest action fragment carried into a summary.
const ACTION_MAX: usize = 80;

/// Minimum run of numbered lines that counts as a file dump.
const NUMBERED_RUN_MIN: usize = 5;

/// Detects and compacts tool-call transcripts.
#[derive(Debug, Clone, Copy, Default)]
pub struct ToolSummarizer;

impl ToolSummarizer {
    pub fn new() -> Self {
        Self
    }

    /// Whether this text is a tool transcript worth compacting.
    pub fn is_tool_call(&self, text: &str) -> bool {
        if text.contains("<invoke") || text.contains("<function_results>") {
            return true;
        }
        if text.lines().any(is_found_files_line) {
            return true;
        }
        numbered_run_len(text) >= NUMBERED_RUN_MIN
    }

    /// Compact a tool transcript; non-tool text passes through unchanged.
    pub fn summarize(&self, text: &str) -> String {
        if !self.is_tool_call(text) {
            return text.to_string();
        }

        if text.contains("<invoke") {
            let name = invoke_name(text).unwrap_or("unknown");
            let action = invoke_action(text);
            let mut summary = format!("[Tool: {name}] {action}");
            if let Some(brief) = result_brief(text) {
                summary.push_str(&format!("\nResult: {brief}"));
            }
            return summary;
        }

        if text.contains("<function_results>") {
            let brief = result_brief(text).unwrap_or_else(|| "output elided".to_string());
            return format!("[Tool: result]\nResult: {brief}");
        }

        if let Some(found) = text.lines().find(|l| is_found_files_line(l)) {
            return format!("[Tool: search] {}", found.trim());
        }

        // Numbered file dump
        let lines = text.lines().count();
        format!("[Tool: file] {lines} lines elided")
    }
}

fn is_found_files_line(line: &str) -> bool {
    let line = line.trim();
    let Some(rest) = line.strip_prefix("Found ") else {
        return false;
    };
    let mut parts = rest.split_whitespace();
    let count_ok = parts
        .next()
        .is_some_and(|n| n.chars().all(|c| c.is_ascii_digit()));
    let noun_ok = parts
        .next()
        .is_some_and(|n| n.starts_with("file") || n.starts_with("match"));
    count_ok && noun_ok
}

/// Length of the longest run of `N:` / `N.` / `N\t` prefixed lines.
fn numbered_run_len(text: &str) -> usize {
    let mut best = 0;
    let mut run = 0;
    for line in text.lines() {
        let trimmed = line.trim_start();
        let digits: String = trimmed.chars().take_while(|c| c.is_ascii_digit()).collect();
        let after = &trimmed[digits.len()..];
        let numbered = !digits.is_empty()
            && (after.starts_with(':') || after.starts_with('.') || after.starts_with('\t')
                || after.starts_with("→"));
        if numbered {
            run += 1;
            best = best.max(run);
        } else {
            run = 0;
        }
    }
    best
}

fn invoke_name(text: &str) -> Option<&str> {
    let start = text.find("<invoke")?;
    let rest = &text[start..];
    let name_start = rest.find("name=\"")? + "name=\"".len();
    let rest = &rest[name_start..];
    let name_end = rest.find('"')?;
    Some(&rest[..name_end])
}

/// First parameter value, truncated, as the "action" fragment.
fn invoke_action(text: &str) -> String {
    let param = text
        .find("<parameter")
        .and_then(|start| {
            let rest = &text[start..];
            let value_start = rest.find('>')? + 1;
            let rest = &rest[value_start..];
            let value_end = rest.find("</parameter>")?;
            Some(rest[..value_end].trim())
        })
        .unwrap_or("");
    truncate_chars(param, ACTION_MAX)
}

/// One-line brief of a result block: match counts, exit codes, sizes, or
/// the first error line.
fn result_brief(text: &str) -> Option<String> {
    let start = text.find("<function_results>")? + "<function_results>".len();
    let end = text.find("</function_results>").unwrap_or(text.len());
    let body = text[start..end].trim();
    if body.is_empty() {
        return Some("empty".to_string());
    }

    for line in body.lines() {
        let line = line.trim();
        if is_found_files_line(line)
            || line.to_ascii_lowercase().contains("exit code")
            || line.to_ascii_lowercase().starts_with("error")
        {
            return Some(truncate_chars(line, ACTION_MAX));
        }
    }

    let line_count = body.lines().count();
    if line_count > 3 {
        return Some(format!("{line_count} lines"));
    }
    Some(truncate_chars(body.lines().next().unwrap_or(""), ACTION_MAX))
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let head: String = text.chars().take(max.saturating_sub(3)).collect();
        format!("{head}...")
    }
}

#[cfg(test)]
#[path = "summarizer_tests.rs"]
mod tests;
