// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use kbot_core::CHECKPOINT_TTL_MS;
use tempfile::tempdir;

fn config(dir: &Path, child: &str, args: &[&str]) -> SupervisorConfig {
    SupervisorConfig {
        child_program: PathBuf::from(child),
        child_args: args.iter().map(|s| s.to_string()).collect(),
        data_dir: dir.to_path_buf(),
        shutdown_timeout: Duration::from_millis(500),
        min_backoff: Duration::from_millis(10),
        max_backoff: Duration::from_millis(40),
    }
}

fn supervisor(dir: &Path) -> Arc<Supervisor> {
    Supervisor::new(config(dir, "true", &[]), SystemClock, None).unwrap()
}

fn drain(
    rx: &mut mpsc::UnboundedReceiver<SupervisorEvent>,
) -> Vec<SupervisorEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

async fn wait_for<F>(rx: &mut mpsc::UnboundedReceiver<SupervisorEvent>, mut pred: F) -> SupervisorEvent
where
    F: FnMut(&SupervisorEvent) -> bool,
{
    loop {
        let event = tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("timed out waiting for supervisor event")
            .expect("event channel closed");
        if pred(&event) {
            return event;
        }
    }
}

// ── Planned-restart handshake ────────────────────────────────────────────────

#[tokio::test]
async fn readable_checkpoint_is_acked_and_recorded() {
    let dir = tempdir().unwrap();
    let sup = supervisor(dir.path());
    let mut events = sup.subscribe();

    let cp_path = dir.path().join("cp.yaml");
    std::fs::write(&cp_path, "version: 1\n").unwrap();

    let reply = sup.handle_child_message(ChildMessage::PlannedRestart {
        checkpoint: cp_path.display().to_string(),
    });

    assert_eq!(reply, Some(SupervisorMessage::RestartAck));
    assert_eq!(sup.pending_checkpoint(), Some(cp_path.clone()));
    assert!(drain(&mut events)
        .iter()
        .any(|e| matches!(e, SupervisorEvent::RestartAck { checkpoint } if *checkpoint == cp_path)));
}

#[tokio::test]
async fn unreadable_checkpoint_is_rejected_without_ack() {
    let dir = tempdir().unwrap();
    let sup = supervisor(dir.path());

    let reply = sup.handle_child_message(ChildMessage::PlannedRestart {
        checkpoint: dir.path().join("missing.yaml").display().to_string(),
    });

    assert!(matches!(reply, Some(SupervisorMessage::Error { .. })));
    assert_eq!(sup.pending_checkpoint(), None);
}

#[tokio::test]
async fn unknown_and_error_messages_are_dropped() {
    let dir = tempdir().unwrap();
    let sup = supervisor(dir.path());

    assert_eq!(sup.handle_child_message(ChildMessage::Unknown), None);
    assert_eq!(
        sup.handle_child_message(ChildMessage::Error {
            message: "child-side problem".to_string()
        }),
        None
    );
}

// ── Crash checkpoint synthesis ───────────────────────────────────────────────

#[tokio::test]
async fn crash_checkpoint_has_reason_and_wake_prompt() {
    let dir = tempdir().unwrap();
    let sup = supervisor(dir.path());

    let path = sup.synthesize_crash_checkpoint().unwrap();
    let checkpoint = sup.checkpoint_store().read(&path).unwrap();

    assert_eq!(checkpoint.version, 1);
    assert_eq!(checkpoint.restart_reason, RestartReason::Crash);
    assert!(checkpoint.wake_context.prompt.contains("crashed"));
}

#[tokio::test]
async fn startup_sweeps_expired_checkpoints() {
    let dir = tempdir().unwrap();
    // Write one expired checkpoint by hand
    let clock = kbot_core::FakeClock::new();
    clock.set_epoch_ms(CHECKPOINT_TTL_MS * 2);
    let store = CheckpointStore::new(dir.path(), clock.clone());
    let old = SupervisorCheckpoint::new(
        "s",
        RestartReason::Planned,
        WakeContext {
            prompt: "old".to_string(),
            pending_work: None,
            instructions: None,
        },
        "2020-01-01T00:00:00Z",
    );
    let old_path = store.write(&old).unwrap();

    let _sup = supervisor(dir.path());
    assert!(!old_path.exists(), "expired checkpoint must be swept at startup");
}

// ── Backoff schedule ─────────────────────────────────────────────────────────

#[tokio::test]
async fn respawn_delays_double_to_the_ceiling_and_escalate_there() {
    // min=10ms max=40ms: delays 10, 20, 40, 40 with escalation at the cap
    let dir = tempdir().unwrap();
    let sup = supervisor(dir.path());
    let mut events = sup.subscribe();

    for _ in 0..4 {
        sup.schedule_respawn().await;
    }

    let seen = drain(&mut events);
    let delays: Vec<u64> = seen
        .iter()
        .filter_map(|e| match e {
            SupervisorEvent::Respawn { delay_ms, .. } => Some(*delay_ms),
            _ => None,
        })
        .collect();
    assert_eq!(delays, vec![10, 20, 40, 40]);

    let escalations: Vec<u32> = seen
        .iter()
        .filter_map(|e| match e {
            SupervisorEvent::EscalationLevel { failures } => Some(*failures),
            _ => None,
        })
        .collect();
    assert_eq!(escalations, vec![3, 4], "escalation fires once the delay is pinned");
}

// ── Process integration ──────────────────────────────────────────────────────

#[tokio::test]
async fn clean_child_exit_ends_supervision() {
    let dir = tempdir().unwrap();
    let sup = Supervisor::new(
        config(dir.path(), "sh", &["-c", "exit 0"]),
        SystemClock,
        None,
    )
    .unwrap();
    let mut events = sup.subscribe();

    let outcome = Arc::clone(&sup).run().await.unwrap();
    assert_eq!(outcome, SupervisorOutcome::CleanExit);
    assert_eq!(sup.state(), SupervisorState::Terminated);

    let seen = drain(&mut events);
    assert!(seen.iter().any(|e| matches!(e, SupervisorEvent::Spawn { .. })));
    assert!(seen
        .iter()
        .any(|e| matches!(e, SupervisorEvent::Exit { code: Some(0) })));
}

#[tokio::test]
async fn pending_checkpoint_reaches_the_next_child() {
    // The next spawn passes --checkpoint and CHECKPOINT_PATH
    let dir = tempdir().unwrap();
    let cp_path = dir.path().join("cp.yaml");
    std::fs::write(&cp_path, "version: 1\n").unwrap();
    let out_path = dir.path().join("child-env.txt");

    let script = format!(
        "echo \"$CHECKPOINT_PATH $*\" > {}; exit 0",
        out_path.display()
    );
    let sup = Supervisor::new(
        config(dir.path(), "sh", &["-c", &script, "kbotd-stub"]),
        SystemClock,
        Some(cp_path.clone()),
    )
    .unwrap();

    let outcome = Arc::clone(&sup).run().await.unwrap();
    assert_eq!(outcome, SupervisorOutcome::CleanExit);

    let seen = std::fs::read_to_string(&out_path).unwrap();
    assert!(seen.contains(&cp_path.display().to_string()));
    assert!(seen.contains("--checkpoint"));
    // Consumed: a later spawn would not re-deliver it
    assert_eq!(sup.pending_checkpoint(), None);
}

#[tokio::test]
async fn crashing_child_respawns_with_synthesized_checkpoint() {
    let dir = tempdir().unwrap();
    let sup = Supervisor::new(
        config(dir.path(), "sh", &["-c", "exit 1"]),
        SystemClock,
        None,
    )
    .unwrap();
    let mut events = sup.subscribe();

    let runner = tokio::spawn(Arc::clone(&sup).run());

    // Observe a few crash/respawn rounds with doubling delays
    wait_for(&mut events, |e| {
        matches!(e, SupervisorEvent::Respawn { attempt: 3, .. })
    })
    .await;

    sup.shutdown().await;
    let outcome = runner.await.unwrap().unwrap();
    assert_eq!(outcome, SupervisorOutcome::ShutDown);

    // A crash checkpoint was synthesized for the next incarnation
    let checkpoints: Vec<_> = std::fs::read_dir(dir.path().join("checkpoints"))
        .unwrap()
        .collect();
    assert!(!checkpoints.is_empty());
}

#[tokio::test]
async fn shutdown_terminates_a_running_child() {
    let dir = tempdir().unwrap();
    let sup = Supervisor::new(
        config(dir.path(), "sleep", &["30"]),
        SystemClock,
        None,
    )
    .unwrap();
    let mut events = sup.subscribe();

    let runner = tokio::spawn(Arc::clone(&sup).run());
    wait_for(&mut events, |e| matches!(e, SupervisorEvent::Spawn { .. })).await;

    sup.shutdown().await;
    let outcome = runner.await.unwrap().unwrap();
    assert_eq!(outcome, SupervisorOutcome::ShutDown);
    assert_eq!(sup.state(), SupervisorState::Terminated);
}

#[tokio::test]
async fn ipc_connection_round_trips_the_handshake() {
    // A fake "child" speaks the wire protocol against the live socket
    let dir = tempdir().unwrap();
    let sup = Supervisor::new(
        config(dir.path(), "sleep", &["30"]),
        SystemClock,
        None,
    )
    .unwrap();
    let mut events = sup.subscribe();
    let runner = tokio::spawn(Arc::clone(&sup).run());
    wait_for(&mut events, |e| matches!(e, SupervisorEvent::Spawn { .. })).await;

    let cp_path = dir.path().join("cp.yaml");
    std::fs::write(&cp_path, "version: 1\n").unwrap();

    let mut stream = UnixStream::connect(sup.config.socket_path()).await.unwrap();
    ipc::send(
        &mut stream,
        &ChildMessage::PlannedRestart {
            checkpoint: cp_path.display().to_string(),
        },
    )
    .await
    .unwrap();
    let reply: SupervisorMessage = ipc::recv(&mut stream, Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(reply, SupervisorMessage::RestartAck);
    assert_eq!(sup.pending_checkpoint(), Some(cp_path));

    sup.shutdown().await;
    runner.await.unwrap().unwrap();
}
