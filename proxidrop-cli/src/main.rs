mod command;
mod event;
mod ui;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::io::BufReader;
use tokio::sync::mpsc;
use tracing_subscriber::{EnvFilter, fmt};

use proxidrop_engine::manager::{ManagerCmd, ManagerConfig, ShareManager};
use proxidrop_engine::tcp::TcpListenerFactory;

use crate::command::handle_pending_consent;
use crate::event::{PendingConsent, TerminalDelegate, spawn_event_printer};
use crate::ui::{print_banner, print_help, print_prompt, read_line};

/// proxidrop — proximity share receiver.
///
/// Starts a share manager that accepts incoming transfers from nearby
/// senders.  An interactive prompt lets you toggle visibility and
/// accept or decline incoming transfers after comparing the PIN shown
/// on both screens.
#[derive(Parser, Debug)]
#[command(name = "proxidrop", version, about)]
struct Args {
    /// Address to listen on for incoming connections.
    #[arg(short, long, default_value = "0.0.0.0:4242")]
    listen: String,

    /// Human-readable name for this device.
    #[arg(short, long, default_value = "proxidrop-cli")]
    name: String,

    /// Directory where received files are stored.
    #[arg(short, long, default_value = "/tmp/proxidrop")]
    receive_dir: PathBuf,

    /// Seconds to wait for a consent answer before declining.
    #[arg(long, default_value_t = 60)]
    consent_timeout: u64,

    /// Device name to accept from without prompting.  Repeatable.
    #[arg(long)]
    remember: Vec<String>,

    /// Accept text-only transfers without prompting.
    #[arg(long)]
    auto_copy_text: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Tracing goes to stderr so it doesn't mix with the interactive
    // prompt on stdout.  Default to "warn" for library crates so
    // only the CLI's own output is visible.
    fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("proxidrop_cli=info,warn")),
        )
        .init();

    if let Err(e) = std::fs::create_dir_all(&args.receive_dir) {
        eprintln!(
            "Failed to create receive directory {}: {e}",
            args.receive_dir.display()
        );
        std::process::exit(1);
    }

    let config = ManagerConfig {
        device_name: args.name.clone(),
        receive_dir: args.receive_dir.clone(),
        consent_timeout: Duration::from_secs(args.consent_timeout),
    };

    // Channel for consent requests that need user input.
    let (pending_tx, mut pending_rx) = mpsc::unbounded_channel::<PendingConsent>();

    let delegate = Arc::new(TerminalDelegate::new(
        pending_tx,
        args.remember.clone(),
        args.auto_copy_text,
    ));

    let manager = ShareManager;
    let handle = manager.start(TcpListenerFactory, config, delegate);

    // Subscribe to manager events.
    spawn_event_printer(handle.events_tx.subscribe());

    let cmd_tx = handle.cmd_tx.clone();

    if let Err(e) = cmd_tx
        .send(ManagerCmd::SetVisible {
            addr: args.listen.clone(),
        })
        .await
    {
        eprintln!("Failed to start listener: {e}");
        std::process::exit(1);
    }

    // Small delay so the "Visible on ..." event prints before
    // the banner.
    tokio::time::sleep(Duration::from_millis(100)).await;

    // ── Banner ──────────────────────────────────────────────────
    print_banner(&args.listen, &args.name, &args.receive_dir);
    print_help();
    print_prompt();

    // ── Interactive prompt loop ─────────────────────────────────
    let mut stdin = BufReader::new(tokio::io::stdin());

    loop {
        tokio::select! {
            biased;

            // Check for consent requests that need a response.
            Some(consent) = pending_rx.recv() => {
                handle_pending_consent(&consent, &cmd_tx, &mut stdin).await;
                print_prompt();
            }

            // Read user input.
            line = read_line(&mut stdin) => {
                let Some(line) = line else {
                    // EOF — shut down.
                    break;
                };

                if line.is_empty() {
                    print_prompt();
                    continue;
                }

                match line.as_str() {
                    "visible" => {
                        let _ = cmd_tx
                            .send(ManagerCmd::SetVisible {
                                addr: args.listen.clone(),
                            })
                            .await;
                    }
                    "invisible" => {
                        let _ = cmd_tx.send(ManagerCmd::SetInvisible).await;
                    }
                    "accept" | "always" | "decline" => {
                        println!("  ℹ No pending transfer right now.  Wait for an incoming request.");
                    }
                    "help" | "?" => {
                        print_help();
                    }
                    "quit" | "exit" | "q" => {
                        break;
                    }
                    other => {
                        println!("  ❓ Unknown command: \"{other}\".  Type 'help' for usage.");
                    }
                }

                print_prompt();
            }
        }
    }

    println!("\n  Shutting down...");
    let _ = cmd_tx.send(ManagerCmd::ShutDown).await;
    // Give sessions a moment to clean up.
    tokio::time::sleep(Duration::from_millis(200)).await;
    println!("  Bye! 👋");
}
