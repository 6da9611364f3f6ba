// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! On-disk commit lock.
//!
//! One lock file per worktree, created atomically with create-if-absent.
//! A holder that crashed leaves the file behind; locks older than the
//! staleness window are treated as abandoned and reclaimed.

use crate::ShadowError;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// Lock file name inside the worktree.
pub const LOCK_FILE_NAME: &str = ".kbot-lock";

/// Exclusive commit lock backed by a lock file.
#[derive(Debug, Clone)]
pub struct CommitLock {
    path: PathBuf,
}

/// Held lock; the file is removed on drop even when the commit fails.
pub struct LockGuard {
    path: PathBuf,
    released: bool,
}

impl CommitLock {
    pub fn new(worktree: &Path) -> Self {
        Self {
            path: worktree.join(LOCK_FILE_NAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Acquire the lock, reclaiming a stale one.
    ///
    /// Returns `CommitInProgress` when another live holder has it; callers
    /// retry at the next scheduler tick.
    pub fn acquire(&self, stale_after: Duration) -> Result<LockGuard, ShadowError> {
        match self.try_create() {
            Ok(guard) => Ok(guard),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                if self.is_stale(stale_after) {
                    warn!(path = %self.path.display(), "removing stale commit lock");
                    let _ = std::fs::remove_file(&self.path);
                    self.try_create().map_err(|e| {
                        if e.kind() == std::io::ErrorKind::AlreadyExists {
                            ShadowError::CommitInProgress
                        } else {
                            ShadowError::Io(e)
                        }
                    })
                } else {
                    Err(ShadowError::CommitInProgress)
                }
            }
            Err(e) => Err(ShadowError::Io(e)),
        }
    }

    /// Remove a leftover lock file (crash recovery).
    pub fn remove_stale(&self) -> Result<(), ShadowError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ShadowError::Io(e)),
        }
    }

    fn try_create(&self) -> std::io::Result<LockGuard> {
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)?;
        // Holder pid, for operators inspecting a wedged lock
        let _ = writeln!(file, "{}", std::process::id());
        Ok(LockGuard {
            path: self.path.clone(),
            released: false,
        })
    }

    fn is_stale(&self, stale_after: Duration) -> bool {
        let age = std::fs::metadata(&self.path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|mtime| mtime.elapsed().ok());
        match age {
            Some(age) => age >= stale_after,
            // Vanished or unreadable: let the create-if-absent race decide
            None => false,
        }
    }
}

impl LockGuard {
    /// Release explicitly (also happens on drop).
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if !self.released {
            self.released = true;
            if let Err(e) = std::fs::remove_file(&self.path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %self.path.display(), error = %e, "failed to remove commit lock");
                }
            }
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.release_inner();
    }
}

#[cfg(test)]
#[path = "lock_tests.rs"]
mod tests;
