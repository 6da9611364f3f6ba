// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use tempfile::tempdir;

async fn init_repo(dir: &Path) {
    for args in [
        vec!["init", "-q"],
        vec!["-c", "user.name=t", "-c", "user.email=t@t", "commit", "--allow-empty", "-q", "-m", "init"],
    ] {
        let output = Command::new("git")
            .args(&args)
            .current_dir(dir)
            .output()
            .await
            .unwrap();
        assert!(output.status.success(), "git {args:?} failed");
    }
}

#[tokio::test]
async fn discover_finds_repo_root() {
    let dir = tempdir().unwrap();
    init_repo(dir.path()).await;
    let nested = dir.path().join("a/b");
    std::fs::create_dir_all(&nested).unwrap();

    let git = Git::discover(&nested).await.unwrap();
    assert_eq!(
        git.repo_root().canonicalize().unwrap(),
        dir.path().canonicalize().unwrap()
    );
}

#[tokio::test]
async fn discover_rejects_non_repo() {
    let dir = tempdir().unwrap();
    assert!(matches!(
        Git::discover(dir.path()).await,
        Err(ShadowError::NotARepo(_))
    ));
}

#[tokio::test]
async fn orphan_worktree_has_independent_history() {
    let dir = tempdir().unwrap();
    init_repo(dir.path()).await;
    let git = Git::discover(dir.path()).await.unwrap();
    let worktree = dir.path().join(".kbot");

    assert!(!git.branch_exists("kbot-memory").await.unwrap());
    git.worktree_add_orphan("kbot-memory", &worktree)
        .await
        .unwrap();
    git.commit(&worktree, "Initialize shadow history", true)
        .await
        .unwrap();

    assert!(git.branch_exists("kbot-memory").await.unwrap());
    assert_eq!(git.commit_count("kbot-memory").await.unwrap(), 1);
    // Mainline history untouched
    assert_eq!(git.commit_count("HEAD").await.unwrap(), 1);
}

#[tokio::test]
async fn status_add_commit_cycle() {
    let dir = tempdir().unwrap();
    init_repo(dir.path()).await;
    let git = Git::discover(dir.path()).await.unwrap();
    let worktree = dir.path().join(".kbot");
    git.worktree_add_orphan("kbot-memory", &worktree)
        .await
        .unwrap();
    git.commit(&worktree, "init shadow", true).await.unwrap();

    std::fs::write(worktree.join("events.jsonl"), "{}\n").unwrap();
    assert_eq!(git.status_porcelain(&worktree).await.unwrap().len(), 1);

    git.add_all(&worktree).await.unwrap();
    assert!(git.has_staged_changes(&worktree).await.unwrap());

    git.commit(&worktree, "Batch commit", false).await.unwrap();
    assert!(!git.has_staged_changes(&worktree).await.unwrap());
    assert_eq!(git.head_subject(&worktree).await.unwrap(), "Batch commit");
}

#[tokio::test]
async fn path_is_dirty_detects_gitignore_edits() {
    let dir = tempdir().unwrap();
    init_repo(dir.path()).await;
    let git = Git::discover(dir.path()).await.unwrap();

    assert!(!git.path_is_dirty(".gitignore").await.unwrap());
    std::fs::write(dir.path().join(".gitignore"), "target/\n").unwrap();
    assert!(git.path_is_dirty(".gitignore").await.unwrap());
}
