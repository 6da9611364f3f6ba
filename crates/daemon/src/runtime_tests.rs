// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use kbot_core::FakeClock;
use kbot_core::{LoopState, CHECKPOINT_TTL_MS};
use serial_test::serial;
use std::time::Duration;
use tempfile::tempdir;
use tokio::net::UnixListener;

fn test_config(dir: &std::path::Path) -> RuntimeConfig {
    RuntimeConfig {
        data_dir: dir.to_path_buf(),
        lock_path: dir.join("kbotd.pid"),
        log_path: dir.join("kbotd.log"),
        agent_program: "cat".to_string(),
        agent_args: Vec::new(),
        shadow: false,
        bot: BotConfig::default(),
    }
}

fn fresh_checkpoint(prompt: &str) -> SupervisorCheckpoint {
    SupervisorCheckpoint::new(
        "sess-1",
        RestartReason::Planned,
        WakeContext {
            prompt: prompt.to_string(),
            pending_work: Some("finish the rollout".to_string()),
            instructions: None,
        },
        chrono::Utc::now().to_rfc3339(),
    )
}

#[tokio::test]
#[serial]
async fn kbot_toml_overlay_feeds_the_config() {
    let dir = tempdir().unwrap();
    std::fs::write(
        dir.path().join("kbot.toml"),
        "agent_program = \"my-agent\"\nagent_args = [\"--acp\"]\nshadow = false\nidentity_prompt = \"You are deploy-bot.\"\n",
    )
    .unwrap();
    std::env::set_var("KBOT_DATA_DIR", dir.path());
    std::env::remove_var("KBOT_AGENT_PROGRAM");
    std::env::remove_var("KBOT_AGENT_ARGS");
    std::env::remove_var("KBOT_SHADOW");

    let config = RuntimeConfig::load();
    std::env::remove_var("KBOT_DATA_DIR");

    assert_eq!(config.agent_program, "my-agent");
    assert_eq!(config.agent_args, vec!["--acp".to_string()]);
    assert!(!config.shadow);
    assert_eq!(config.bot.identity_prompt, "You are deploy-bot.");
}

#[tokio::test]
#[serial]
async fn environment_overrides_the_config_file() {
    let dir = tempdir().unwrap();
    std::fs::write(
        dir.path().join("kbot.toml"),
        "agent_program = \"file-agent\"\n",
    )
    .unwrap();
    std::env::set_var("KBOT_DATA_DIR", dir.path());
    std::env::set_var("KBOT_AGENT_PROGRAM", "env-agent");

    let config = RuntimeConfig::load();
    std::env::remove_var("KBOT_DATA_DIR");
    std::env::remove_var("KBOT_AGENT_PROGRAM");

    assert_eq!(config.agent_program, "env-agent");
}

#[tokio::test]
#[serial]
async fn start_acquires_exclusive_lock() {
    let dir = tempdir().unwrap();
    std::env::remove_var("CHECKPOINT_PATH");

    let runtime = BotRuntime::start(test_config(dir.path())).await.unwrap();
    assert!(runtime.wake.is_none());

    match BotRuntime::start(test_config(dir.path())).await {
        Err(RuntimeError::LockFailed(_)) => {}
        other => panic!("expected LockFailed, got {:?}", other.err()),
    }
}

#[tokio::test]
#[serial]
async fn fresh_checkpoint_extends_the_identity_prompt() {
    let dir = tempdir().unwrap();
    let store = CheckpointStore::new(dir.path(), SystemClock);
    let path = store.write(&fresh_checkpoint("resume the deploy")).unwrap();
    std::env::set_var("CHECKPOINT_PATH", &path);

    let runtime = BotRuntime::start(test_config(dir.path())).await.unwrap();
    std::env::remove_var("CHECKPOINT_PATH");

    let wake = runtime.wake.clone().expect("wake context consumed");
    assert_eq!(wake.prompt, "resume the deploy");
    assert!(runtime.config.bot.identity_prompt.contains("## Wake Context"));
    assert!(runtime.config.bot.identity_prompt.contains("resume the deploy"));
    assert!(runtime
        .config
        .bot
        .identity_prompt
        .contains("finish the rollout"));
}

#[tokio::test]
#[serial]
async fn expired_checkpoint_is_skipped_with_no_wake_context() {
    let dir = tempdir().unwrap();

    // Write a checkpoint from "the distant past"
    let old_clock = FakeClock::new();
    old_clock.set_epoch_ms(1_000);
    let store = CheckpointStore::new(dir.path(), old_clock);
    let mut old = fresh_checkpoint("stale");
    old.created_at = "2020-01-01T00:00:00Z".to_string();
    let path = store.write(&old).unwrap();
    assert!(CHECKPOINT_TTL_MS > 0);
    std::env::set_var("CHECKPOINT_PATH", &path);

    let runtime = BotRuntime::start(test_config(dir.path())).await.unwrap();
    std::env::remove_var("CHECKPOINT_PATH");

    assert!(runtime.wake.is_none(), "expired checkpoint must be skipped");
    assert!(!runtime.config.bot.identity_prompt.contains("stale"));
}

#[tokio::test]
#[serial]
async fn lifecycle_escalate_becomes_a_record() {
    let dir = tempdir().unwrap();
    std::env::remove_var("CHECKPOINT_PATH");

    let runtime = BotRuntime::start(test_config(dir.path())).await.unwrap();
    let mut events = runtime.bus.subscribe();

    runtime.bus.emit(EngineEvent::Escalate {
        reason: "agent recovery exhausted backoff".to_string(),
        context: "spawn failed at max backoff".to_string(),
    });
    // Give the bridge task a beat to consume the event
    tokio::time::sleep(Duration::from_millis(100)).await;

    let pending = runtime.escalation.pending();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].reason, "agent recovery exhausted backoff");
    assert!(pending[0].checkpoint.is_some(), "handoff carries the lifecycle checkpoint");

    let seen: Vec<_> = std::iter::from_fn(|| events.try_recv().ok()).collect();
    assert!(seen
        .iter()
        .any(|e| matches!(e, EngineEvent::EscalationCreated { .. })));
}

#[tokio::test]
#[serial]
async fn autonomous_loop_requires_a_healthy_agent() {
    let dir = tempdir().unwrap();
    std::env::remove_var("CHECKPOINT_PATH");

    let runtime = BotRuntime::start(test_config(dir.path())).await.unwrap();
    match runtime.start_autonomous_loop() {
        Err(EngineError::NotHealthy) => {}
        other => panic!("expected NotHealthy, got {other:?}"),
    }
}

#[tokio::test]
#[serial]
async fn autonomous_loop_runs_once_the_agent_is_up() {
    let dir = tempdir().unwrap();
    std::env::remove_var("CHECKPOINT_PATH");

    let runtime = BotRuntime::start(test_config(dir.path())).await.unwrap();
    // `cat` stands in for the agent: process-alive, echoes the stream
    runtime.lifecycle.spawn(Vec::new()).await.unwrap();

    runtime.start_autonomous_loop().unwrap();
    assert_eq!(runtime.autonomous.state(), LoopState::Running);
    assert_eq!(runtime.tasks.pending_count().unwrap(), 0);

    runtime.shutdown().await;
    assert_eq!(runtime.autonomous.state(), LoopState::Idle);
}

#[tokio::test]
#[serial]
async fn planned_restart_round_trips_with_a_fake_supervisor() {
    let dir = tempdir().unwrap();
    std::env::remove_var("CHECKPOINT_PATH");

    // Fake supervisor socket that acks the first planned restart
    let socket_path = dir.path().join("supervisor.sock");
    let listener = UnixListener::bind(&socket_path).unwrap();
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let msg: ChildMessage = ipc::recv(&mut stream, ipc::DEFAULT_TIMEOUT).await.unwrap();
        assert!(matches!(msg, ChildMessage::PlannedRestart { .. }));
        ipc::send(&mut stream, &SupervisorMessage::RestartAck)
            .await
            .unwrap();
    });
    std::env::set_var(crate::env::SUPERVISOR_SOCKET_ENV, &socket_path);

    let runtime = BotRuntime::start(test_config(dir.path())).await.unwrap();
    let path = runtime
        .request_planned_restart(
            "sess-9",
            WakeContext {
                prompt: "pick up where we left off".to_string(),
                pending_work: None,
                instructions: None,
            },
        )
        .await
        .unwrap();
    std::env::remove_var(crate::env::SUPERVISOR_SOCKET_ENV);

    // The checkpoint is durable and valid
    let checkpoint = runtime.checkpoints.read(&path).unwrap();
    assert_eq!(checkpoint.restart_reason, RestartReason::Planned);
    assert_eq!(checkpoint.session_id, "sess-9");
}

#[tokio::test]
#[serial]
async fn planned_restart_without_supervisor_is_rejected() {
    let dir = tempdir().unwrap();
    std::env::remove_var("CHECKPOINT_PATH");
    std::env::remove_var(crate::env::SUPERVISOR_SOCKET_ENV);

    let runtime = BotRuntime::start(test_config(dir.path())).await.unwrap();
    match runtime
        .request_planned_restart(
            "sess-1",
            WakeContext {
                prompt: "x".to_string(),
                pending_work: None,
                instructions: None,
            },
        )
        .await
    {
        Err(RuntimeError::NotSupervised) => {}
        other => panic!("expected NotSupervised, got {:?}", other.err()),
    }
}
