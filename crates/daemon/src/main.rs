// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! kbotd - the supervised bot child process.
//!
//! Owns the agent subprocess and the event-sourced memory. Typically
//! spawned by `kbot-supervisor`; running it directly works but loses
//! crash-respawn and checkpoint handoff.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

use kbot_daemon::{BotRuntime, RuntimeConfig};
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    if let Some(arg) = std::env::args().nth(1) {
        match arg.as_str() {
            "--version" | "-V" | "-v" => {
                println!("kbotd {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            "--help" | "-h" | "help" => {
                println!("kbotd {}", env!("CARGO_PKG_VERSION"));
                println!("kbot bot runtime - supervised chat-bot child process");
                println!();
                println!("USAGE:");
                println!("    kbotd [--checkpoint <path>]");
                println!();
                println!("Typically spawned by `kbot-supervisor`. Configuration comes");
                println!("from the environment: KBOT_DATA_DIR, KBOT_AGENT_PROGRAM,");
                println!("KBOT_AGENT_ARGS, KBOT_SHADOW, CHECKPOINT_PATH.");
                return Ok(());
            }
            "--checkpoint" => {
                // The supervisor passes the path both as an argument and in
                // CHECKPOINT_PATH; normalize onto the env var.
                if let Some(path) = std::env::args().nth(2) {
                    std::env::set_var("CHECKPOINT_PATH", path);
                }
            }
            other => {
                eprintln!("error: unexpected argument '{other}'");
                eprintln!("Usage: kbotd [--checkpoint <path>]");
                std::process::exit(1);
            }
        }
    }

    let config = RuntimeConfig::load();
    rotate_log_if_needed(&config.log_path);
    let _log_guard = setup_logging(&config)?;

    info!(supervised = kbot_daemon::env::is_supervised(), "starting kbotd");

    let runtime = match BotRuntime::start(config).await {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("failed to start kbotd: {e}");
            eprintln!("kbotd failed to start: {e}");
            std::process::exit(1);
        }
    };

    // Bring the agent up; failures here feed the lifecycle's own recovery
    if let Err(e) = runtime.lifecycle.spawn(Vec::new()).await {
        error!("initial agent spawn failed: {e}");
    } else if let Err(e) = runtime.start_autonomous_loop() {
        warn!("autonomous loop not started: {e}");
    }

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    info!("kbotd ready");
    println!("READY");

    tokio::select! {
        _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
        _ = sigint.recv() => info!("received SIGINT, shutting down"),
    }

    runtime.shutdown().await;
    info!("kbotd stopped");
    Ok(())
}

/// Maximum log file size before rotation (10 MB).
const MAX_LOG_SIZE: u64 = 10 * 1024 * 1024;

/// Number of rotated log files to keep.
const MAX_ROTATED_LOGS: u32 = 3;

/// Rotate the log file if it exceeds [`MAX_LOG_SIZE`].
///
/// Shifts `kbotd.log` → `kbotd.log.1` → `.2` → `.3`, deleting the oldest.
/// Best-effort: rotation failures must not prevent startup.
fn rotate_log_if_needed(log_path: &std::path::Path) {
    let size = match std::fs::metadata(log_path) {
        Ok(m) => m.len(),
        Err(_) => return,
    };
    if size < MAX_LOG_SIZE {
        return;
    }

    let log_str = log_path.display().to_string();
    for i in (1..MAX_ROTATED_LOGS).rev() {
        let from = format!("{log_str}.{i}");
        let to = format!("{log_str}.{}", i + 1);
        let _ = std::fs::rename(&from, &to);
    }
    let _ = std::fs::rename(log_path, format!("{log_str}.1"));
}

fn setup_logging(
    config: &RuntimeConfig,
) -> Result<tracing_appender::non_blocking::WorkerGuard, Box<dyn std::error::Error>> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    if let Some(parent) = config.log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let dir = config
        .log_path
        .parent()
        .ok_or("log path has no parent directory")?;
    let file_name = config
        .log_path
        .file_name()
        .ok_or("log path has no file name")?;
    let file_appender = tracing_appender::rolling::never(dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(non_blocking))
        .init();

    Ok(guard)
}
