//! Warden CLI: supervise an RLS instance for one workspace from a terminal.
//!
//! ```text
//! main() -> Session::start() -> loop { stdin command | server event | ctrl-c }
//!                                           |
//!                                           v
//!                                  Session::shutdown()
//! ```
//!
//! Status updates and messages go to stderr; the process log goes to
//! `~/.warden/logs/warden.log`.

mod commands;
mod input;
mod ui;

use std::{
    env,
    fs::{self, OpenOptions},
    path::PathBuf,
    sync::{Arc, Mutex},
};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use warden_config::WardenConfig;
use warden_lsp::{Session, Status};
use warden_toolchain::ProcessRunner;

use crate::commands::{ConsoleCommand, HELP};
use crate::input::InputPump;
use crate::ui::TerminalUi;

#[derive(Debug, Parser)]
#[command(name = "warden", version, about)]
struct Cli {
    /// Workspace root. Defaults to the current directory.
    #[arg(long, short, global = true)]
    root: Option<PathBuf>,

    /// Answer "yes" to every install prompt.
    #[arg(long, short = 'y', global = true)]
    yes: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Clone, Copy, Subcommand)]
enum Command {
    /// Start the server and supervise it until `quit` or ctrl-c (default).
    Serve,
    /// Run `rustup update` once.
    Update,
    /// Provision the toolchain and print the server command without starting it.
    Check,
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let (log_file, init_warnings) = open_log_file();

    if let Some((log_path, file)) = log_file {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
            .with(env_filter)
            .init();

        tracing::info!(path = %log_path.display(), "Logging initialized");
        for warning in init_warnings {
            tracing::warn!("{warning}");
        }
        return;
    }

    // Stderr carries the status lines; no log beats an interleaved one.
    tracing_subscriber::registry().with(env_filter).init();
}

fn open_log_file() -> (Option<(PathBuf, fs::File)>, Vec<String>) {
    let mut warnings = Vec::new();

    for candidate in log_file_candidates() {
        if let Some(parent) = candidate.parent()
            && let Err(e) = fs::create_dir_all(parent)
        {
            warnings.push(format!(
                "Failed to create log dir {}: {e}",
                parent.display()
            ));
            continue;
        }

        match OpenOptions::new()
            .create(true)
            .append(true)
            .open(&candidate)
        {
            Ok(file) => return (Some((candidate, file)), warnings),
            Err(e) => {
                warnings.push(format!(
                    "Failed to open log file {}: {e}",
                    candidate.display()
                ));
            }
        }
    }

    (None, warnings)
}

fn log_file_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    // Primary: ~/.warden/logs/warden.log
    if let Some(config_path) = WardenConfig::path()
        && let Some(config_dir) = config_path.parent()
    {
        candidates.push(config_dir.join("logs").join("warden.log"));
    }

    candidates.push(PathBuf::from(".warden").join("logs").join("warden.log"));

    candidates
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let root = match cli.root {
        Some(root) => root,
        None => env::current_dir().context("cannot determine the current directory")?,
    };
    let config = WardenConfig::load(&root)
        .with_context(|| format!("failed to load settings for {}", root.display()))?;
    let settings = config.to_session_settings(&root);
    tracing::info!(?settings, "Session settings");

    let input = InputPump::stdin();
    let ui = Arc::new(TerminalUi::new(input.clone(), cli.yes));
    let mut session = Session::new(settings, Arc::new(ProcessRunner), ui);

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(&mut session, &input).await,
        Command::Update => {
            session.update_toolchain().await;
            Ok(())
        }
        Command::Check => {
            let plan = session.prepare_launch().await?;
            println!("{}", plan.invocation.command_line());
            if let Some(sysroot) = session.sysroot() {
                println!("sysroot: {}", sysroot.display());
            }
            Ok(())
        }
    }
}

async fn serve(session: &mut Session, input: &InputPump) -> Result<()> {
    // A failed start leaves the status terminal; `restart` can retry.
    if let Err(e) = session.start().await {
        eprintln!("error: {e}");
    }
    eprintln!("{HELP}");

    loop {
        tokio::select! {
            line = input.next_line() => {
                let Some(line) = line else {
                    tracing::info!("stdin closed, shutting down");
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                match line.parse::<ConsoleCommand>() {
                    Ok(ConsoleCommand::Quit) => break,
                    Ok(command) => execute(session, command).await,
                    Err(e) => eprintln!("{e}"),
                }
            }
            Some(event) = session.next_event() => session.handle_event(event),
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break;
            }
        }
    }

    session.shutdown().await;
    Ok(())
}

async fn execute(session: &mut Session, command: ConsoleCommand) {
    match command {
        ConsoleCommand::Restart => {
            if let Err(e) = session.restart().await {
                eprintln!("error: {e}");
            }
        }
        ConsoleCommand::Update => {
            session.update_toolchain().await;
        }
        ConsoleCommand::Run => {
            if let Err(e) = session.run_project().await {
                eprintln!("error: {e}");
            }
        }
        ConsoleCommand::Status => print_status(session),
        ConsoleCommand::Help => eprintln!("{HELP}"),
        ConsoleCommand::Quit => {}
    }
}

fn print_status(session: &Session) {
    let state = match (session.server_pid(), session.status()) {
        (None, _) => "stopped".to_string(),
        (Some(pid), Status::Idle) => format!("running (pid {pid}), idle"),
        (Some(pid), Status::Busy(label)) => format!("running (pid {pid}), busy: {label}"),
    };
    eprintln!("server: {state}");
    eprintln!("generation: {}", session.generation());
    if let Some(sysroot) = session.sysroot() {
        eprintln!("sysroot: {}", sysroot.display());
    }
    if let Some(log) = session.server_log() {
        eprintln!("server log: {}", log.display());
    }
    if let Some(pid) = session.run_pid() {
        eprintln!("cargo run: pid {pid}");
    }
}
