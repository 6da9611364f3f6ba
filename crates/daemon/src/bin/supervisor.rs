// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! kbot-supervisor - parent process of the supervision tree.
//!
//! Keeps exactly one `kbotd` child alive: planned-restart handshake over
//! the IPC socket, crash respawn with exponential backoff, checkpoint
//! handoff between incarnations.

use kbot_core::SystemClock;
use kbot_daemon::{Supervisor, SupervisorConfig, SupervisorOutcome};
use std::path::PathBuf;
use tracing::info;

#[tokio::main]
async fn main() {
    let mut child: Option<PathBuf> = None;
    let mut checkpoint: Option<PathBuf> = None;
    let mut data_dir: Option<PathBuf> = None;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--child" => child = args.next().map(PathBuf::from),
            "--checkpoint" => checkpoint = args.next().map(PathBuf::from),
            "--data-dir" => data_dir = args.next().map(PathBuf::from),
            "--version" | "-V" | "-v" => {
                println!("kbot-supervisor {}", env!("CARGO_PKG_VERSION"));
                return;
            }
            "--help" | "-h" | "help" => {
                print_help();
                return;
            }
            other => {
                eprintln!("error: unexpected argument '{other}'");
                print_help();
                std::process::exit(1);
            }
        }
    }

    let Some(child) = child else {
        eprintln!("error: --child <path> is required");
        print_help();
        std::process::exit(1);
    };
    let data_dir = data_dir.unwrap_or_else(kbot_daemon::env::data_dir);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = SupervisorConfig::new(child, data_dir);
    let supervisor = match Supervisor::new(config, SystemClock, checkpoint) {
        Ok(supervisor) => supervisor,
        Err(e) => {
            eprintln!("kbot-supervisor failed to start: {e}");
            std::process::exit(1);
        }
    };

    // Forward termination signals into a graceful child shutdown
    {
        let supervisor = std::sync::Arc::clone(&supervisor);
        tokio::spawn(async move {
            let mut sigterm = match tokio::signal::unix::signal(
                tokio::signal::unix::SignalKind::terminate(),
            ) {
                Ok(sig) => sig,
                Err(_) => return,
            };
            let mut sigint =
                match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt()) {
                    Ok(sig) => sig,
                    Err(_) => return,
                };
            tokio::select! {
                _ = sigterm.recv() => {}
                _ = sigint.recv() => {}
            }
            info!("termination signal received; shutting down child");
            supervisor.shutdown().await;
        });
    }

    match supervisor.run().await {
        Ok(SupervisorOutcome::CleanExit) | Ok(SupervisorOutcome::ShutDown) => {
            info!("supervision ended");
        }
        Err(e) => {
            eprintln!("kbot-supervisor failed: {e}");
            std::process::exit(1);
        }
    }
}

fn print_help() {
    println!("kbot-supervisor {}", env!("CARGO_PKG_VERSION"));
    println!("Keeps one kbotd child alive across restarts and crashes");
    println!();
    println!("USAGE:");
    println!("    kbot-supervisor --child <path> [--checkpoint <path>] [--data-dir <path>]");
    println!();
    println!("OPTIONS:");
    println!("    --child <path>       Child executable (required)");
    println!("    --checkpoint <path>  Checkpoint for the first spawn");
    println!("    --data-dir <path>    Data directory (default .kbot/)");
    println!("    -h, --help           Print help information");
    println!("    -v, --version        Print version information");
}
