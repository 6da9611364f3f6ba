// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Git CLI wrapper for the shadow store.
//!
//! Thin, command-per-method wrapper over the standard git CLI. All commands
//! run with `GIT_DIR`/`GIT_WORK_TREE` scrubbed so an inherited environment
//! cannot redirect them at the wrong repository. No network operations.

use crate::ShadowError;
use kbot_adapters::subprocess::{run_with_timeout, GIT_TIMEOUT};
use std::path::{Path, PathBuf};
use tokio::process::Command;

/// Environment flag marking shadow-branch commits.
pub const SHADOW_COMMIT_ENV: &str = "KBOT_SHADOW_COMMIT";

/// Git operations scoped to one repository.
#[derive(Debug, Clone)]
pub struct Git {
    repo_root: PathBuf,
}

impl Git {
    /// Discover the repository containing `dir`.
    pub async fn discover(dir: &Path) -> Result<Self, ShadowError> {
        let output = run(dir, &["rev-parse", "--show-toplevel"]).await?;
        if !output.status.success() {
            return Err(ShadowError::NotARepo(dir.display().to_string()));
        }
        let root = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok(Self {
            repo_root: PathBuf::from(root),
        })
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    pub async fn branch_exists(&self, branch: &str) -> Result<bool, ShadowError> {
        let output = run(
            &self.repo_root,
            &[
                "show-ref",
                "--verify",
                "--quiet",
                &format!("refs/heads/{branch}"),
            ],
        )
        .await?;
        Ok(output.status.success())
    }

    pub async fn worktree_prune(&self) -> Result<(), ShadowError> {
        self.check(&self.repo_root, &["worktree", "prune"]).await
    }

    /// Check out an existing branch as a worktree.
    pub async fn worktree_add(&self, path: &Path, branch: &str) -> Result<(), ShadowError> {
        let path_str = path.display().to_string();
        self.check(&self.repo_root, &["worktree", "add", &path_str, branch])
            .await
    }

    /// Create a fresh orphan branch checked out as a worktree.
    ///
    /// Prefers `worktree add --orphan` (git ≥ 2.42); falls back to a
    /// detached worktree plus `checkout --orphan` on older installations.
    pub async fn worktree_add_orphan(&self, branch: &str, path: &Path) -> Result<(), ShadowError> {
        let path_str = path.display().to_string();
        let modern = self
            .check(
                &self.repo_root,
                &["worktree", "add", "--orphan", "-b", branch, &path_str],
            )
            .await;
        if modern.is_ok() {
            return Ok(());
        }

        self.check(&self.repo_root, &["worktree", "add", "--detach", &path_str])
            .await?;
        self.check(path, &["checkout", "--orphan", branch]).await?;
        // The orphan checkout keeps HEAD's files staged and on disk; start empty.
        let _ = self.check(path, &["rm", "-rf", "--cached", "."]).await;
        clear_worktree_files(path)?;
        Ok(())
    }

    /// Lines of `status --porcelain` (staged, modified, untracked).
    pub async fn status_porcelain(&self, worktree: &Path) -> Result<Vec<String>, ShadowError> {
        let output = run(worktree, &["status", "--porcelain"]).await?;
        if !output.status.success() {
            return Err(git_error("status", &output));
        }
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(String::from)
            .collect())
    }

    /// `status --porcelain` restricted to one path, relative to the repo root.
    pub async fn path_is_dirty(&self, rel_path: &str) -> Result<bool, ShadowError> {
        let output = run(
            &self.repo_root,
            &["status", "--porcelain", "--", rel_path],
        )
        .await?;
        if !output.status.success() {
            return Err(git_error("status", &output));
        }
        Ok(!output.stdout.is_empty())
    }

    pub async fn add_all(&self, worktree: &Path) -> Result<(), ShadowError> {
        self.check(worktree, &["add", "-A"]).await
    }

    /// True when the index has staged changes (`diff --cached --quiet` exits 1).
    pub async fn has_staged_changes(&self, worktree: &Path) -> Result<bool, ShadowError> {
        let output = run(worktree, &["diff", "--cached", "--quiet"]).await?;
        Ok(!output.status.success())
    }

    pub async fn commit(
        &self,
        worktree: &Path,
        message: &str,
        allow_empty: bool,
    ) -> Result<(), ShadowError> {
        let mut args = vec![
            "-c",
            "user.name=kbot",
            "-c",
            "user.email=kbot@localhost",
            "commit",
            "-m",
            message,
        ];
        if allow_empty {
            args.push("--allow-empty");
        }

        let mut cmd = Command::new("git");
        cmd.args(&args)
            .current_dir(worktree)
            .env_remove("GIT_DIR")
            .env_remove("GIT_WORK_TREE")
            .env(SHADOW_COMMIT_ENV, "1");
        let output = run_with_timeout(cmd, GIT_TIMEOUT, "git commit")
            .await
            .map_err(|message| ShadowError::Git {
                command: "commit".to_string(),
                message,
            })?;
        if !output.status.success() {
            return Err(git_error("commit", &output));
        }
        Ok(())
    }

    /// Subject line of the worktree's HEAD commit.
    pub async fn head_subject(&self, worktree: &Path) -> Result<String, ShadowError> {
        let output = run(worktree, &["log", "-1", "--format=%s"]).await?;
        if !output.status.success() {
            return Err(git_error("log", &output));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Number of commits on a branch.
    pub async fn commit_count(&self, branch: &str) -> Result<u64, ShadowError> {
        let output = run(&self.repo_root, &["rev-list", "--count", branch]).await?;
        if !output.status.success() {
            return Err(git_error("rev-list", &output));
        }
        Ok(String::from_utf8_lossy(&output.stdout)
            .trim()
            .parse()
            .unwrap_or(0))
    }

    async fn check(&self, dir: &Path, args: &[&str]) -> Result<(), ShadowError> {
        let output = run(dir, args).await?;
        if !output.status.success() {
            return Err(git_error(args.first().copied().unwrap_or("git"), &output));
        }
        Ok(())
    }
}

async fn run(dir: &Path, args: &[&str]) -> Result<std::process::Output, ShadowError> {
    let mut cmd = Command::new("git");
    cmd.args(args)
        .current_dir(dir)
        .env_remove("GIT_DIR")
        .env_remove("GIT_WORK_TREE");
    run_with_timeout(cmd, GIT_TIMEOUT, &format!("git {}", args.join(" ")))
        .await
        .map_err(|message| ShadowError::Git {
            command: args.first().copied().unwrap_or("git").to_string(),
            message,
        })
}

fn git_error(command: &str, output: &std::process::Output) -> ShadowError {
    ShadowError::Git {
        command: command.to_string(),
        message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    }
}

/// Remove everything but `.git` from a worktree directory.
fn clear_worktree_files(worktree: &Path) -> Result<(), ShadowError> {
    for entry in std::fs::read_dir(worktree)? {
        let entry = entry?;
        if entry.file_name() == ".git" {
            continue;
        }
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            std::fs::remove_dir_all(&path)?;
        } else {
            std::fs::remove_file(&path)?;
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "git_tests.rs"]
mod tests;
