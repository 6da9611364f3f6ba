// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[tokio::test]
async fn launch_failure_for_missing_binary_is_typed() {
    let launcher = AcpAgentLauncher::new("definitely-not-a-real-agent-kbot", vec![]);
    match launcher.launch(Vec::new()).await {
        Err(EngineError::SpawnFailed(_)) => {}
        Err(other) => panic!("expected SpawnFailed, got {other:?}"),
        Ok(_) => panic!("expected SpawnFailed, got a live instance"),
    }
}

#[tokio::test]
async fn cat_stub_agent_is_running_until_soft_stop() {
    // `cat` echoes our JSON-RPC lines back; responses never match pending
    // ids, but the process-level lifecycle works end to end.
    let launcher = AcpAgentLauncher::new("cat", vec![]);
    let instance = launcher.launch(Vec::new()).await.unwrap();

    assert!(instance.is_running());

    // stdin EOF is the soft-termination signal; cat exits on it
    instance.soft_stop().await;
    let code = tokio::time::timeout(std::time::Duration::from_secs(5), instance.wait_exit())
        .await
        .unwrap();
    assert_eq!(code, Some(0));
    assert!(!instance.is_running());
}

#[tokio::test]
async fn kill_is_unconditional() {
    let launcher = AcpAgentLauncher::new("sleep", vec!["30".to_string()]);
    let instance = launcher.launch(Vec::new()).await.unwrap();
    assert!(instance.is_running());

    instance.kill().await;
    tokio::time::timeout(std::time::Duration::from_secs(5), instance.wait_exit())
        .await
        .unwrap();
    assert!(!instance.is_running());
}
