//! Hostbridge CLI - serves the configured transport for a host project.
//!
//! This is the binary entry point. See the `hostbridge` library for the
//! transport layer itself.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use hostbridge::{constants::VERSION, Bridge, Config, NullDispatcher, Session, StateStore};

#[derive(Parser)]
#[command(name = "hostbridge", version, about = "Transport bridge for tool-driven hosts")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the configured transport until interrupted (default).
    Serve,
    /// Start the configured transport, run its liveness check, and exit.
    Verify,
    /// Print the configured mode and current transport state.
    Status,
    /// Forget the persisted session id.
    ResetSession,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let config = Config::load()?;
    let store = StateStore::open_default()?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config, store).await,
        Command::Verify => verify(config, store).await,
        Command::Status => status(config, store).await,
        Command::ResetSession => {
            Session::reset(&store)?;
            println!("Session cleared; a new id will be created on next start.");
            Ok(())
        }
    }
}

async fn serve(config: Config, store: StateStore) -> Result<()> {
    let bridge = Bridge::new(config, store, Arc::new(NullDispatcher))?;

    let shutdown_flag = Arc::new(AtomicBool::new(false));
    {
        let flag = Arc::clone(&shutdown_flag);
        ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst))?;
    }

    let mode = bridge.config().mode;
    if bridge.start().await {
        log::info!("hostbridge v{VERSION} serving {mode} transport");
    } else {
        let state = bridge.state().await;
        log::warn!(
            "{mode} transport failed to start ({}); serving for status queries",
            state.error.as_deref().unwrap_or("unknown error")
        );
    }

    while !shutdown_flag.load(Ordering::SeqCst) {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    println!("Shutting down...");
    bridge.shutdown().await;
    Ok(())
}

async fn verify(config: Config, store: StateStore) -> Result<()> {
    let bridge = Bridge::new(config, store, Arc::new(NullDispatcher))?;
    let started = bridge.start().await;
    let report = bridge.verify().await;
    println!("{}", serde_json::to_string_pretty(&report)?);
    bridge.stop().await;

    if !(started && report.success) {
        std::process::exit(1);
    }
    Ok(())
}

async fn status(config: Config, store: StateStore) -> Result<()> {
    let bridge = Bridge::new(config, store, Arc::new(NullDispatcher))?;
    let state = bridge.state().await;
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "version": VERSION,
            "configured_mode": bridge.config().mode,
            "session_id": bridge.session().session_id,
            "project": bridge.session().project_name,
            "state": state,
        }))?
    );
    Ok(())
}
