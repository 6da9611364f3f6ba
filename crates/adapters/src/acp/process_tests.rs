// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn config(program: &str, args: &[&str]) -> AgentProcessConfig {
    AgentProcessConfig {
        program: program.to_string(),
        args: args.iter().map(|s| s.to_string()).collect(),
        cwd: None,
        env: vec![("KYNETIC_TEST_MARKER".to_string(), "1".to_string())],
    }
}

#[tokio::test]
async fn spawn_reports_running_then_exit_code() {
    let process = AgentProcess::spawn(&config("sh", &["-c", "exit 3"])).unwrap();
    let code = process.wait_exit().await;
    assert_eq!(code, Some(3));
    assert!(!process.is_running());
    assert_eq!(process.exit_code(), Some(Some(3)));
}

#[tokio::test]
async fn kill_terminates_long_running_child() {
    let process = AgentProcess::spawn(&config("sleep", &["30"])).unwrap();
    assert!(process.is_running());
    process.kill().await;
    let code = process.wait_exit().await;
    // Killed by signal: no exit code on unix
    assert_eq!(code, None);
}

#[tokio::test]
async fn stderr_lines_are_broadcast() {
    // Delay output so the subscription below is in place first
    let process =
        AgentProcess::spawn(&config("sh", &["-c", "sleep 0.2; echo side-channel >&2"])).unwrap();
    let mut stderr = process.subscribe_stderr();
    let line = tokio::time::timeout(std::time::Duration::from_secs(5), stderr.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(line, "side-channel");
}

#[tokio::test]
async fn stdio_is_taken_once() {
    let process = AgentProcess::spawn(&config("cat", &[])).unwrap();
    assert!(process.take_stdio().is_some());
    assert!(process.take_stdio().is_none());
    process.kill().await;
    process.wait_exit().await;
}

#[tokio::test]
async fn env_is_injected() {
    let process = AgentProcess::spawn(&config(
        "sh",
        &["-c", "test \"$KYNETIC_TEST_MARKER\" = 1"],
    ))
    .unwrap();
    assert_eq!(process.wait_exit().await, Some(0));
}
