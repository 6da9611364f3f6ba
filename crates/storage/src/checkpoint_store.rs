// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Supervisor checkpoint files.
//!
//! One YAML file per checkpoint under `<data>/checkpoints/<ulid>.yaml`,
//! written atomically (tmp + rename). Checkpoints expire 24h after
//! `created_at`; expired files are rejected on read and swept at startup.

use crate::session_store::write_yaml_atomic;
use crate::StorageError;
use kbot_core::{CheckpointError, CheckpointId, Clock, SupervisorCheckpoint, SystemClock};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Store for supervisor restart checkpoints.
pub struct CheckpointStore<C: Clock = SystemClock> {
    dir: PathBuf,
    clock: C,
}

impl<C: Clock> CheckpointStore<C> {
    /// Create a store rooted at `<data_dir>/checkpoints`.
    pub fn new(data_dir: impl Into<PathBuf>, clock: C) -> Self {
        Self {
            dir: data_dir.into().join("checkpoints"),
            clock,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write a checkpoint to a fresh ULID-named file; returns its path.
    pub fn write(&self, checkpoint: &SupervisorCheckpoint) -> Result<PathBuf, StorageError> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self
            .dir
            .join(format!("{}.yaml", CheckpointId::generate()));
        write_yaml_atomic(&path, checkpoint)?;
        Ok(path)
    }

    /// Read and validate a checkpoint file.
    ///
    /// Corrupt or wrong-version files error; files past the 24h TTL error
    /// with `Checkpoint(Expired)` so callers can warn and skip.
    pub fn read(&self, path: &Path) -> Result<SupervisorCheckpoint, StorageError> {
        let raw = std::fs::read_to_string(path)?;
        let checkpoint: SupervisorCheckpoint = serde_yaml_ng::from_str(&raw)?;
        let created = created_at_ms(&checkpoint.created_at)?;
        checkpoint.validate(self.clock.epoch_ms(), created)?;
        Ok(checkpoint)
    }

    /// Delete checkpoint files older than the TTL. Returns the count removed.
    ///
    /// Files whose `created_at` cannot be parsed fall back to file mtime;
    /// unreadable files are left in place (read() will reject them).
    pub fn sweep_expired(&self) -> Result<usize, StorageError> {
        if !self.dir.exists() {
            return Ok(0);
        }
        let now_ms = self.clock.epoch_ms();
        let mut removed = 0usize;

        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().map(|e| e != "yaml").unwrap_or(true) {
                continue;
            }

            let created = std::fs::read_to_string(&path)
                .ok()
                .and_then(|raw| serde_yaml_ng::from_str::<SupervisorCheckpoint>(&raw).ok())
                .and_then(|cp| created_at_ms(&cp.created_at).ok())
                .or_else(|| mtime_ms(&path));

            let Some(created) = created else {
                warn!(path = %path.display(), "leaving unreadable checkpoint in place");
                continue;
            };

            if now_ms.saturating_sub(created) >= kbot_core::CHECKPOINT_TTL_MS {
                match std::fs::remove_file(&path) {
                    Ok(()) => {
                        warn!(path = %path.display(), "removed expired checkpoint");
                        removed += 1;
                    }
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "failed to remove expired checkpoint");
                    }
                }
            }
        }
        Ok(removed)
    }
}

/// Parse an RFC3339 `created_at` into epoch milliseconds.
pub fn created_at_ms(created_at: &str) -> Result<u64, StorageError> {
    let parsed = chrono::DateTime::parse_from_rfc3339(created_at).map_err(|e| {
        StorageError::Checkpoint(CheckpointError::BadTimestamp(format!("{created_at}: {e}")))
    })?;
    let ms = parsed.timestamp_millis();
    if ms < 0 {
        return Err(StorageError::Checkpoint(CheckpointError::BadTimestamp(
            created_at.to_string(),
        )));
    }
    Ok(ms as u64)
}

fn mtime_ms(path: &Path) -> Option<u64> {
    let modified = std::fs::metadata(path).ok()?.modified().ok()?;
    let age = modified.duration_since(std::time::UNIX_EPOCH).ok()?;
    Some(age.as_millis() as u64)
}

#[cfg(test)]
#[path = "checkpoint_store_tests.rs"]
mod tests;
