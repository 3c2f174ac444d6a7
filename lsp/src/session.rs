//! Per-workspace supervisor.
//!
//! A [`Session`] owns everything with a lifetime longer than one server
//! process: the installer state, the event channel, the progress reducers.
//! Each start runs the provisioning chain from scratch (channel, toolchain,
//! components, sysroot) and then spawns exactly one server.

use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use warden_toolchain::{
    CommandRunner, Environment, Installer, Invocation, Manager, MessageLevel, ProvisionError,
    STATUS_PREFIX, SysrootCommand, SysrootResolver, ToolchainConfig, ToolchainResolver, Ui,
    UpdateOutcome, auto_update, update_toolchain,
};

use crate::env::server_environment;
use crate::progress::{ProgressAggregator, Status};
use crate::protocol::ServerNotification;
use crate::server::{self, RunningServer, SpawnError};
use crate::types::{ServerEvent, ServerStopReason, SessionEvent, SessionSettings};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Server binary name, both on the search path and inside a toolchain.
pub const SERVER_PROGRAM: &str = "rls";

const START_FAILED: &str = "RLS could not be started";
const STOPPED: &str = "RLS stopped";

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Provision(#[from] ProvisionError),
    #[error(transparent)]
    Spawn(#[from] SpawnError),
    #[error("server initialization failed: {0}")]
    Initialize(String),
    #[error("could not start `cargo run`: {0}")]
    Run(#[source] io::Error),
}

/// Which of the three start strategies applies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchMode {
    /// Configured server executable; no toolchain checks.
    Explicit(String),
    /// Manager disabled; `rls` from the search path.
    Bare,
    /// `<manager> run <channel> rls` after provisioning.
    ViaManager,
}

impl LaunchMode {
    #[must_use]
    pub fn for_settings(settings: &SessionSettings) -> Self {
        match &settings.server_path {
            Some(path) => Self::Explicit(path.clone()),
            None if settings.disable_manager => Self::Bare,
            None => Self::ViaManager,
        }
    }
}

/// Result of the provisioning chain: what to spawn and with which environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchPlan {
    pub mode: LaunchMode,
    /// Set only when the manager is in use.
    pub channel: Option<String>,
    pub sysroot: Option<PathBuf>,
    /// Program, arguments, working directory and full environment.
    pub invocation: Invocation,
}

/// `<root>/rls<unix-millis>.log`
fn log_file_path(root: &Path) -> PathBuf {
    root.join(format!("rls{}.log", chrono::Utc::now().timestamp_millis()))
}

fn message_level(kind: u8) -> MessageLevel {
    match kind {
        1 => MessageLevel::Error,
        2 => MessageLevel::Warning,
        _ => MessageLevel::Info,
    }
}

pub struct Session {
    settings: SessionSettings,
    runner: Arc<dyn CommandRunner>,
    ui: Arc<dyn Ui>,
    base_env: Environment,
    installer: Installer,
    /// Valid for the current provisioning cycle only.
    sysroot: Option<PathBuf>,
    server: Option<RunningServer>,
    generation: u64,
    progress: ProgressAggregator,
    event_tx: mpsc::Sender<SessionEvent>,
    event_rx: mpsc::Receiver<SessionEvent>,
    cargo_run: Option<Child>,
}

impl Session {
    #[must_use]
    pub fn new(settings: SessionSettings, runner: Arc<dyn CommandRunner>, ui: Arc<dyn Ui>) -> Self {
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let installer =
            Installer::new(runner.clone(), ui.clone()).with_consent(settings.ask_install);
        Self {
            progress: ProgressAggregator::new(ui.clone()),
            settings,
            runner,
            ui,
            base_env: Environment::inherited(),
            installer,
            sysroot: None,
            server: None,
            generation: 0,
            event_tx,
            event_rx,
            cargo_run: None,
        }
    }

    /// Replace the inherited environment the server and commands start from.
    #[must_use]
    pub fn with_environment(mut self, env: Environment) -> Self {
        self.base_env = env;
        self
    }

    #[must_use]
    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    #[must_use]
    pub fn installer(&self) -> &Installer {
        &self.installer
    }

    fn manager(&self) -> Manager {
        Manager::new(self.settings.manager_path.clone(), self.settings.use_wsl)
    }

    /// Warn about workspace layouts and leftovers that degrade the server.
    pub fn preflight(&self) -> Vec<String> {
        let root = &self.settings.root;
        let mut warnings = Vec::new();
        if !root.join("Cargo.toml").exists() {
            warnings.push(
                "A Cargo.toml file must be at the root of the workspace in order to support all features"
                    .to_string(),
            );
        }
        if root.join("rls.toml").exists() {
            warnings.push(
                "Found deprecated rls.toml. Use the [rust-client] settings instead".to_string(),
            );
        }
        if self.base_env.is_set("RLS_PATH") || self.base_env.is_set("RLS_ROOT") {
            warnings.push(
                "Found deprecated environment variables (RLS_PATH or RLS_ROOT). Use the rlsPath setting instead"
                    .to_string(),
            );
        }
        for warning in &warnings {
            tracing::warn!(root = %root.display(), "{warning}");
            self.ui.show_message(MessageLevel::Warning, warning);
        }
        warnings
    }

    /// Session start: preflight warnings, optional manager update, then the
    /// full provisioning chain and spawn.
    pub async fn start(&mut self) -> Result<(), SessionError> {
        self.preflight();
        let manager = self.manager();
        if let Some(outcome) = auto_update(
            self.runner.as_ref(),
            self.ui.as_ref(),
            &manager,
            self.settings.update_on_startup,
            self.settings.manager_enabled(),
        )
        .await
        {
            tracing::info!(?outcome, "Startup update finished");
        }
        self.launch().await
    }

    /// Stop the current server (if any) and re-run the provisioning chain.
    pub async fn restart(&mut self) -> Result<(), SessionError> {
        tracing::info!(generation = self.generation, "Restarting server");
        self.launch().await
    }

    /// One provisioning cycle. Any running server is stopped first.
    async fn launch(&mut self) -> Result<(), SessionError> {
        self.stop().await;
        self.ui.start_spinner(STATUS_PREFIX, "Starting");
        let plan = match self.prepare_launch().await {
            Ok(plan) => plan,
            Err(e) => return Err(self.start_failed(e)),
        };
        match self.spawn(&plan).await {
            Ok(()) => Ok(()),
            Err(e) => Err(self.start_failed(e)),
        }
    }

    fn start_failed(&self, err: SessionError) -> SessionError {
        tracing::error!("{err}");
        self.ui.stop_spinner(START_FAILED);
        err
    }

    /// Run the provisioning chain without spawning anything.
    ///
    /// The sysroot cache is cleared first, so every call re-queries it.
    pub async fn prepare_launch(&mut self) -> Result<LaunchPlan, SessionError> {
        self.sysroot = None;
        let root = self.settings.root.clone();
        let mode = LaunchMode::for_settings(&self.settings);

        let (invocation, sysroot_command, channel) = match &mode {
            LaunchMode::Explicit(path) => (Invocation::new(path.clone()), SysrootCommand::Bare, None),
            LaunchMode::Bare => (Invocation::new(SERVER_PROGRAM), SysrootCommand::Bare, None),
            LaunchMode::ViaManager => {
                let manager = self.manager();
                let channel = ToolchainResolver::new(self.runner.as_ref(), &manager, &root)
                    .resolve_or_fallback(self.settings.channel.as_deref())
                    .await;
                let config = ToolchainConfig::new(channel.clone(), manager);
                self.installer.ensure_toolchain(&config).await?;
                self.installer.ensure_components(&config).await?;
                let invocation = config
                    .manager
                    .invocation(["run", channel.as_str(), SERVER_PROGRAM]);
                (invocation, SysrootCommand::ViaManager(config), Some(channel))
            }
        };

        let mut env = self.base_env.clone();
        match SysrootResolver::new(self.runner.as_ref(), sysroot_command)
            .resolve(&env)
            .await
        {
            Ok(found) => {
                tracing::info!(sysroot = %found.path.display(), "Found sysroot");
                env = found.env;
                self.sysroot = Some(found.path);
            }
            Err(e) => {
                tracing::warn!("{e}; starting without sysroot-derived environment");
            }
        }
        let env = server_environment(env, self.sysroot.as_deref(), self.settings.set_lib_path);

        Ok(LaunchPlan {
            mode,
            channel,
            sysroot: self.sysroot.clone(),
            invocation: invocation.current_dir(root).env(env),
        })
    }

    async fn spawn(&mut self, plan: &LaunchPlan) -> Result<(), SessionError> {
        self.generation += 1;
        let log_path = self
            .settings
            .log_to_file
            .then(|| log_file_path(&self.settings.root));

        let mut server = match RunningServer::spawn(
            &plan.invocation,
            self.generation,
            self.event_tx.clone(),
            log_path,
        ) {
            Ok(server) => server,
            Err(e) if e.is_not_found() => {
                tracing::warn!("{e}");
                self.ui
                    .show_message(MessageLevel::Warning, &format!("Could not start RLS: {e}"));
                self.ui.stop_spinner(START_FAILED);
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        if let Err(e) = server.initialize(&self.settings.root).await {
            server.shutdown().await;
            return Err(SessionError::Initialize(format!("{e:#}")));
        }
        if let Some(path) = server.log_path() {
            tracing::info!(path = %path.display(), "Server stderr goes to log file");
        }
        self.progress.reset();
        self.ui.stop_spinner(STATUS_PREFIX);
        self.server = Some(server);
        Ok(())
    }

    /// Stop the running server, if any. Progress state goes with it.
    pub async fn stop(&mut self) {
        if let Some(server) = self.server.take() {
            tracing::info!(
                generation = server.generation(),
                program = server.program(),
                "Stopping server"
            );
            server.shutdown().await;
        }
        self.progress.reset();
    }

    /// Manual `<manager> update`. Only meaningful with the manager enabled.
    pub async fn update_toolchain(&mut self) -> Option<UpdateOutcome> {
        if !self.settings.manager_enabled() {
            self.ui.show_message(
                MessageLevel::Info,
                "Toolchain updates are unavailable while rustup is disabled",
            );
            return None;
        }
        let manager = self.manager();
        Some(update_toolchain(self.runner.as_ref(), self.ui.as_ref(), &manager).await)
    }

    /// `cargo run` in the workspace root. A previous run is killed first.
    pub async fn run_project(&mut self) -> Result<(), SessionError> {
        if let Some(mut previous) = self.cargo_run.take() {
            tracing::info!(pid = previous.id(), "Killing previous `cargo run`");
            let _ = previous.kill().await;
        }

        let invocation = Invocation::new("cargo")
            .args(["run"])
            .current_dir(self.settings.root.clone())
            .env(self.base_env.clone());
        let program = server::resolve_program(&invocation).map_err(|e| {
            SessionError::Run(io::Error::new(io::ErrorKind::NotFound, e.to_string()))
        })?;
        let child = Command::new(program)
            .args(invocation.arg_list())
            .current_dir(&self.settings.root)
            .env_clear()
            .envs(self.base_env.iter())
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(SessionError::Run)?;
        tracing::info!(pid = child.id(), "Started `cargo run`");
        self.cargo_run = Some(child);
        Ok(())
    }

    /// Pid of the current `cargo run`, while it is alive.
    #[must_use]
    pub fn run_pid(&self) -> Option<u32> {
        self.cargo_run.as_ref().and_then(Child::id)
    }

    /// Wait for the next server event.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        self.event_rx.recv().await
    }

    /// Drain pending events without waiting, up to `budget`.
    pub fn poll_events(&mut self, budget: usize) -> usize {
        let mut count = 0;
        while count < budget {
            match self.event_rx.try_recv() {
                Ok(event) => {
                    self.handle_event(event);
                    count += 1;
                }
                Err(mpsc::error::TryRecvError::Empty | mpsc::error::TryRecvError::Disconnected) => {
                    break;
                }
            }
        }
        count
    }

    /// Apply one event. Events from any server other than the current one
    /// are dropped.
    pub fn handle_event(&mut self, event: SessionEvent) {
        let current = self.server.as_ref().map(RunningServer::generation);
        if current != Some(event.generation) {
            tracing::debug!(
                generation = event.generation,
                ?current,
                "Dropping event from stale server"
            );
            return;
        }

        match event.event {
            ServerEvent::Notification(ServerNotification::ShowMessage { kind, message }) => {
                self.ui.show_message(message_level(kind), &message);
            }
            ServerEvent::Notification(notification) => {
                self.progress.apply(&notification);
            }
            ServerEvent::Stopped(reason) => {
                // Dropping the handle kills the child if it is still around.
                self.server = None;
                self.progress.reset();
                match reason {
                    ServerStopReason::Exited => {
                        tracing::info!(generation = event.generation, "Server exited");
                    }
                    ServerStopReason::Failed(msg) => {
                        tracing::warn!(generation = event.generation, error = %msg, "Server failed");
                        self.ui
                            .show_message(MessageLevel::Error, &format!("{STOPPED}: {msg}"));
                    }
                }
                self.ui.stop_spinner(STOPPED);
            }
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.server.is_some()
    }

    /// Generation of the most recent spawn attempt; 0 before the first.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    #[must_use]
    pub fn status(&self) -> &Status {
        self.progress.current()
    }

    #[must_use]
    pub fn sysroot(&self) -> Option<&Path> {
        self.sysroot.as_deref()
    }

    #[must_use]
    pub fn server_pid(&self) -> Option<u32> {
        self.server.as_ref().and_then(RunningServer::pid)
    }

    #[must_use]
    pub fn server_log(&self) -> Option<&Path> {
        self.server.as_ref().and_then(RunningServer::log_path)
    }

    /// Stop the server and any `cargo run`.
    pub async fn shutdown(&mut self) {
        self.stop().await;
        if let Some(mut run) = self.cargo_run.take() {
            let _ = run.kill().await;
        }
    }

    #[cfg(test)]
    pub(crate) fn event_tx(&self) -> &mpsc::Sender<SessionEvent> {
        &self.event_tx
    }
}
