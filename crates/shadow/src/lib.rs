// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Shadow store: git-worktree durability for kbot's memory files.
//!
//! The on-disk event logs live inside a worktree of an orphan branch
//! (default `kbot-memory`) checked out at `<repoRoot>/.kbot/`. History
//! survives the process, can be diffed/branched/pushed, and never touches
//! the mainline branch. Commits are batched and serialized by an on-disk
//! lock so concurrent processes cannot interleave.

mod git;
mod lock;
mod store;

pub use git::Git;
pub use lock::{CommitLock, LockGuard};
pub use store::{ShadowConfig, ShadowEvent, ShadowState, ShadowStore};

use thiserror::Error;

/// Errors from shadow-store operations
#[derive(Debug, Error)]
pub enum ShadowError {
    #[error("not a git repository: {0}")]
    NotARepo(String),

    #[error(".gitignore has uncommitted edits; commit or stash them before enabling the shadow store")]
    GitignoreDirty,

    #[error("commit in progress")]
    CommitInProgress,

    #[error("git {command} failed: {message}")]
    Git { command: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
