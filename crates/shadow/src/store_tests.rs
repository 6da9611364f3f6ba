// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use tempfile::tempdir;
use tokio::process::Command;

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

fn fast_config() -> ShadowConfig {
    ShadowConfig {
        max_events: 3,
        max_interval: Duration::from_millis(100),
        tick_interval: Duration::from_millis(10),
        ..Default::default()
    }
}

async fn ready_store(dir: &Path) -> ShadowStore {
    let store = ShadowStore::connect(dir, fast_config()).await.unwrap();
    store.initialize().await.unwrap();
    store
}

fn drain(rx: &mut tokio::sync::mpsc::UnboundedReceiver<ShadowEvent>) -> Vec<ShadowEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn initialize_creates_branch_worktree_and_gitignore_entry() {
    let dir = tempdir().unwrap();
    init_repo(dir.path()).await;

    let store = ready_store(dir.path()).await;
    assert_eq!(store.state(), ShadowState::Ready);
    assert!(store.worktree().join(".git").exists());

    let gitignore = std::fs::read_to_string(dir.path().join(".gitignore")).unwrap();
    assert!(gitignore.lines().any(|l| l == ".kbot/"));

    // Branch exists and mainline is untouched
    let git = Git::discover(dir.path()).await.unwrap();
    assert!(git.branch_exists("kbot-memory").await.unwrap());
    assert_eq!(git.commit_count("HEAD").await.unwrap(), 1);
}

#[tokio::test]
async fn initialize_is_idempotent() {
    let dir = tempdir().unwrap();
    init_repo(dir.path()).await;

    let first = ready_store(dir.path()).await;
    drop(first);
    let second = ready_store(dir.path()).await;
    assert_eq!(second.state(), ShadowState::Ready);

    let gitignore = std::fs::read_to_string(dir.path().join(".gitignore")).unwrap();
    assert_eq!(
        gitignore.lines().filter(|l| *l == ".kbot/").count(),
        1,
        "gitignore entry must not be duplicated"
    );
}

#[tokio::test]
async fn initialize_adopts_a_preexisting_memory_directory() {
    // Memory files (and runtime files) often exist before the first init
    let dir = tempdir().unwrap();
    init_repo(dir.path()).await;
    let memory_dir = dir.path().join(".kbot");
    std::fs::create_dir_all(memory_dir.join("agent-sessions")).unwrap();
    std::fs::write(memory_dir.join("agent-sessions/early.jsonl"), "{}\n").unwrap();
    std::fs::write(memory_dir.join("kbotd.pid"), "123\n").unwrap();

    let store = ready_store(dir.path()).await;
    assert_eq!(store.state(), ShadowState::Ready);
    assert!(store.worktree().join(".git").exists());
    assert!(
        store.worktree().join("agent-sessions/early.jsonl").exists(),
        "pre-existing memory files survive worktree adoption"
    );

    // Runtime files stay out of shadow history
    store.force_commit(Some("adopt")).await.unwrap();
    let git = Git::discover(dir.path()).await.unwrap();
    let status = git.status_porcelain(store.worktree()).await.unwrap();
    assert!(status.is_empty(), "everything trackable is committed: {status:?}");
    let gitignore = std::fs::read_to_string(store.worktree().join(".gitignore")).unwrap();
    assert!(gitignore.contains("kbotd.pid"));
    assert!(gitignore.contains(".kbot-lock"));
}

#[tokio::test]
async fn initialize_fails_fast_on_dirty_gitignore() {
    let dir = tempdir().unwrap();
    init_repo(dir.path()).await;
    // Uncommitted .gitignore edit without the shadow entry
    std::fs::write(dir.path().join(".gitignore"), "target/\n").unwrap();

    let store = ShadowStore::connect(dir.path(), fast_config())
        .await
        .unwrap();
    match store.initialize().await {
        Err(ShadowError::GitignoreDirty) => {}
        other => panic!("expected GitignoreDirty, got {other:?}"),
    }
    assert_eq!(store.state(), ShadowState::Error);
}

#[tokio::test]
async fn force_commit_is_noop_when_clean() {
    let dir = tempdir().unwrap();
    init_repo(dir.path()).await;
    let store = ready_store(dir.path()).await;

    let files = store.force_commit(Some("nothing to do")).await.unwrap();
    assert_eq!(files, 0);
}

#[tokio::test]
async fn force_commit_commits_dirty_worktree() {
    let dir = tempdir().unwrap();
    init_repo(dir.path()).await;
    let store = ready_store(dir.path()).await;

    std::fs::write(store.worktree().join("events.jsonl"), "{}\n").unwrap();
    let files = store.force_commit(Some("memory snapshot")).await.unwrap();
    assert_eq!(files, 1);

    let git = Git::discover(dir.path()).await.unwrap();
    assert_eq!(
        git.head_subject(store.worktree()).await.unwrap(),
        "memory snapshot"
    );
}

#[tokio::test]
async fn record_event_commits_when_batch_full() {
    let dir = tempdir().unwrap();
    init_repo(dir.path()).await;
    let store = ready_store(dir.path()).await;
    let git = Git::discover(dir.path()).await.unwrap();
    let base = git.commit_count("kbot-memory").await.unwrap();

    std::fs::write(store.worktree().join("events.jsonl"), "one\n").unwrap();
    store.record_event().await.unwrap();
    store.record_event().await.unwrap();
    assert_eq!(git.commit_count("kbot-memory").await.unwrap(), base);

    // Third event reaches max_events = 3
    store.record_event().await.unwrap();
    assert_eq!(git.commit_count("kbot-memory").await.unwrap(), base + 1);
}

#[tokio::test]
async fn tick_commits_after_interval() {
    let dir = tempdir().unwrap();
    init_repo(dir.path()).await;
    let store = ready_store(dir.path()).await;
    let git = Git::discover(dir.path()).await.unwrap();
    let base = git.commit_count("kbot-memory").await.unwrap();

    std::fs::write(store.worktree().join("events.jsonl"), "one\n").unwrap();
    store.record_event().await.unwrap();

    // Interval not yet elapsed
    store.tick().await.unwrap();
    assert_eq!(git.commit_count("kbot-memory").await.unwrap(), base);

    tokio::time::sleep(Duration::from_millis(150)).await;
    store.tick().await.unwrap();
    assert_eq!(git.commit_count("kbot-memory").await.unwrap(), base + 1);
}

#[tokio::test]
async fn shutdown_flushes_pending_events() {
    let dir = tempdir().unwrap();
    init_repo(dir.path()).await;
    let store = ready_store(dir.path()).await;
    let git = Git::discover(dir.path()).await.unwrap();
    let base = git.commit_count("kbot-memory").await.unwrap();

    std::fs::write(store.worktree().join("turns.jsonl"), "t\n").unwrap();
    store.record_event().await.unwrap();
    store.shutdown().await.unwrap();

    assert_eq!(git.commit_count("kbot-memory").await.unwrap(), base + 1);
}

#[tokio::test]
async fn crash_recovery_commits_leftover_work_and_clears_lock() {
    // Scenario: lock file + untracked file left by a crashed run
    let dir = tempdir().unwrap();
    init_repo(dir.path()).await;

    // First run creates the branch + worktree
    let first = ready_store(dir.path()).await;
    let worktree = first.worktree().to_path_buf();
    drop(first);

    // Simulate the crash
    std::fs::write(worktree.join("orphaned.jsonl"), "lost work\n").unwrap();
    std::fs::write(worktree.join(crate::lock::LOCK_FILE_NAME), "dead-pid").unwrap();

    let store = ShadowStore::connect(dir.path(), fast_config())
        .await
        .unwrap();
    let mut events = store.subscribe();
    store.initialize().await.unwrap();

    let seen = drain(&mut events);
    let sync_events: Vec<_> = seen
        .iter()
        .filter(|e| !matches!(e, ShadowEvent::StateChange { .. }))
        .cloned()
        .collect();
    assert_eq!(
        sync_events,
        vec![
            ShadowEvent::SyncStart {
                operation: "recover"
            },
            ShadowEvent::SyncComplete {
                operation: "recover",
                files_changed: 1
            },
        ]
    );

    assert!(!worktree.join(crate::lock::LOCK_FILE_NAME).exists());
    let git = Git::discover(dir.path()).await.unwrap();
    assert_eq!(
        git.head_subject(&worktree).await.unwrap(),
        "Recover from interrupted operation"
    );
    assert_eq!(store.state(), ShadowState::Ready);
}

#[tokio::test]
async fn commit_emits_sync_events_and_state_transitions() {
    let dir = tempdir().unwrap();
    init_repo(dir.path()).await;
    let store = ready_store(dir.path()).await;
    let mut events = store.subscribe();

    std::fs::write(store.worktree().join("events.jsonl"), "x\n").unwrap();
    store.force_commit(None).await.unwrap();

    let seen = drain(&mut events);
    assert!(seen.contains(&ShadowEvent::SyncStart {
        operation: "commit"
    }));
    assert!(seen.contains(&ShadowEvent::SyncComplete {
        operation: "commit",
        files_changed: 1
    }));
    assert!(seen.contains(&ShadowEvent::StateChange {
        from: ShadowState::Ready,
        to: ShadowState::Committing
    }));
    assert_eq!(store.state(), ShadowState::Ready);
}

#[tokio::test]
async fn held_lock_yields_commit_in_progress() {
    let dir = tempdir().unwrap();
    init_repo(dir.path()).await;
    let store = ready_store(dir.path()).await;

    // Fresh foreign lock (not stale)
    std::fs::write(store.worktree().join(crate::lock::LOCK_FILE_NAME), "peer").unwrap();
    std::fs::write(store.worktree().join("events.jsonl"), "x\n").unwrap();

    match store.force_commit(None).await {
        Err(ShadowError::CommitInProgress) => {}
        other => panic!("expected CommitInProgress, got {other:?}"),
    }
}
