//! Interactive installation of a missing toolchain or missing components.

use std::fmt;
use std::sync::Arc;

use crate::components;
use crate::config::ToolchainConfig;
use crate::error::ProvisionError;
use crate::runner::CommandRunner;
use crate::ui::{MessageLevel, STATUS_PREFIX, Ui};

const MANAGER_INSTALL_HINT: &str = "Rustup not available. Install from https://www.rustup.rs/";

/// Progress of one installable target (the toolchain, or the component set).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InstallationState {
    #[default]
    Unchecked,
    Missing,
    Installing,
    Installed,
    Failed,
}

impl InstallationState {
    /// Forward-only, except `Failed → Installing` after an approved retry.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Unchecked, Self::Missing | Self::Installed)
                | (Self::Missing, Self::Installing)
                | (Self::Installing, Self::Installed | Self::Failed)
                | (Self::Failed, Self::Installing)
        )
    }
}

impl fmt::Display for InstallationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Unchecked => "unchecked",
            Self::Missing => "missing",
            Self::Installing => "installing",
            Self::Installed => "installed",
            Self::Failed => "failed",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Toolchain,
    Components,
}

/// Drives verify → consent → install → re-verify for the toolchain and its
/// required components.
///
/// Lives for the whole session so that a failed installation is only retried
/// after the user explicitly agrees to it.
pub struct Installer {
    runner: Arc<dyn CommandRunner>,
    ui: Arc<dyn Ui>,
    required: Vec<String>,
    ask_consent: bool,
    toolchain: InstallationState,
    components: InstallationState,
}

impl Installer {
    #[must_use]
    pub fn new(runner: Arc<dyn CommandRunner>, ui: Arc<dyn Ui>) -> Self {
        Self {
            runner,
            ui,
            required: components::required_components(),
            ask_consent: true,
            toolchain: InstallationState::Unchecked,
            components: InstallationState::Unchecked,
        }
    }

    /// Override the required component set (order is installation order).
    #[must_use]
    pub fn with_components(mut self, required: Vec<String>) -> Self {
        self.required = required;
        self
    }

    /// When false, missing components are installed without a prompt.
    #[must_use]
    pub fn with_consent(mut self, ask: bool) -> Self {
        self.ask_consent = ask;
        self
    }

    #[must_use]
    pub fn toolchain_state(&self) -> InstallationState {
        self.toolchain
    }

    #[must_use]
    pub fn components_state(&self) -> InstallationState {
        self.components
    }

    /// Make sure `config.channel` is installed, offering to install it.
    pub async fn ensure_toolchain(&mut self, config: &ToolchainConfig) -> Result<(), ProvisionError> {
        let retrying = self.toolchain == InstallationState::Failed;
        if !retrying {
            self.toolchain = InstallationState::Unchecked;
        }
        let present = match components::has_toolchain(self.runner.as_ref(), config).await {
            Ok(present) => present,
            Err(e) => {
                self.ui.show_message(MessageLevel::Error, MANAGER_INSTALL_HINT);
                return Err(e);
            }
        };
        if present {
            self.toolchain = InstallationState::Installed;
            return Ok(());
        }
        if !retrying {
            self.advance(Target::Toolchain, InstallationState::Missing);
        }
        tracing::info!(channel = %config.channel, "Toolchain not installed");

        let question = if retrying {
            format!("Installing the {} toolchain failed earlier. Retry?", config.channel)
        } else {
            format!("{} toolchain not installed. Install?", config.channel)
        };
        if !self.ui.confirm(&question).await {
            return Err(ProvisionError::UserDeclinedInstall {
                target: format!("{} toolchain", config.channel),
            });
        }

        self.advance(Target::Toolchain, InstallationState::Installing);
        self.ui.start_spinner(STATUS_PREFIX, "Installing toolchain…");
        let inv = config
            .manager
            .invocation(["toolchain", "install", config.channel.as_str()]);
        match self.runner.run(&inv).await {
            Ok(output) => {
                tracing::info!(stdout = %output.stdout, stderr = %output.stderr, "Toolchain installed");
                self.advance(Target::Toolchain, InstallationState::Installed);
                self.ui.stop_spinner(&format!(
                    "{} toolchain installed successfully",
                    config.channel
                ));
                Ok(())
            }
            Err(source) => {
                self.advance(Target::Toolchain, InstallationState::Failed);
                let text = format!("Could not install {} toolchain", config.channel);
                self.ui.show_message(MessageLevel::Error, &text);
                self.ui.stop_spinner(&text);
                Err(ProvisionError::InstallFailed {
                    target: format!("{} toolchain", config.channel),
                    source,
                })
            }
        }
    }

    /// Make sure every required component is installed for `config.channel`.
    ///
    /// Components are added one at a time in required order; the first
    /// failure stops the loop. A final verification catches installs that
    /// reported success but left something missing.
    pub async fn ensure_components(
        &mut self,
        config: &ToolchainConfig,
    ) -> Result<(), ProvisionError> {
        let retrying = self.components == InstallationState::Failed;
        if !retrying {
            self.components = InstallationState::Unchecked;
        }
        let missing = match components::missing_components(
            self.runner.as_ref(),
            config,
            &self.required,
        )
        .await
        {
            Ok(missing) => missing,
            Err(e) => {
                self.ui.show_message(
                    MessageLevel::Error,
                    "Unexpected error initialising RLS - error running rustup",
                );
                return Err(e);
            }
        };
        if missing.is_empty() {
            self.components = InstallationState::Installed;
            return Ok(());
        }
        if !retrying {
            self.advance(Target::Components, InstallationState::Missing);
        }
        tracing::info!(channel = %config.channel, missing = ?missing, "Components not installed");

        if self.ask_consent {
            let question = if retrying {
                "Installing RLS components failed earlier. Retry?"
            } else {
                "RLS not installed. Install?"
            };
            if !self.ui.confirm(question).await {
                return Err(ProvisionError::UserDeclinedInstall {
                    target: missing.join(", "),
                });
            }
        }

        self.advance(Target::Components, InstallationState::Installing);
        self.ui.start_spinner(STATUS_PREFIX, "Installing components…");
        match self.install_components(config).await {
            Ok(()) => {
                self.advance(Target::Components, InstallationState::Installed);
                self.ui.stop_spinner("RLS components installed successfully");
                Ok(())
            }
            Err(e) => {
                self.advance(Target::Components, InstallationState::Failed);
                self.ui.stop_spinner("components install failed");
                self.ui.show_message(MessageLevel::Error, &e.to_string());
                Err(e)
            }
        }
    }

    async fn install_components(&self, config: &ToolchainConfig) -> Result<(), ProvisionError> {
        // Serialized on purpose: concurrent `component add` calls contend for
        // the manager's toolchain lock.
        for name in &self.required {
            let inv = config.manager.invocation([
                "component",
                "add",
                name.as_str(),
                "--toolchain",
                config.channel.as_str(),
            ]);
            tracing::info!(component = %name, channel = %config.channel, "Installing component");
            self.runner
                .run(&inv)
                .await
                .map_err(|source| ProvisionError::InstallFailed {
                    target: name.clone(),
                    source,
                })?;
        }

        let still_missing =
            components::missing_components(self.runner.as_ref(), config, &self.required).await?;
        if still_missing.is_empty() {
            Ok(())
        } else {
            Err(ProvisionError::InstallVerificationFailed {
                channel: config.channel.clone(),
                missing: still_missing,
            })
        }
    }

    fn advance(&mut self, target: Target, next: InstallationState) {
        let slot = match target {
            Target::Toolchain => &mut self.toolchain,
            Target::Components => &mut self.components,
        };
        if !slot.can_transition_to(next) {
            tracing::warn!(?target, from = %slot, to = %next, "Unexpected installation state transition");
        }
        *slot = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Manager;
    use crate::testing::{RecordingUi, Reply, ScriptedRunner};

    const INSTALLED: &str = "\
rls-x86_64-unknown-linux-gnu (installed)
rust-analysis-x86_64-unknown-linux-gnu (installed)
rust-src (installed)
";

    fn config() -> ToolchainConfig {
        ToolchainConfig::new("nightly", Manager::default())
    }

    fn installer(runner: &Arc<ScriptedRunner>, ui: &Arc<RecordingUi>) -> Installer {
        Installer::new(runner.clone(), ui.clone())
    }

    #[test]
    fn state_transitions_are_forward_only() {
        use InstallationState as S;
        assert!(S::Unchecked.can_transition_to(S::Missing));
        assert!(S::Unchecked.can_transition_to(S::Installed));
        assert!(S::Missing.can_transition_to(S::Installing));
        assert!(S::Installing.can_transition_to(S::Installed));
        assert!(S::Installing.can_transition_to(S::Failed));
        assert!(S::Failed.can_transition_to(S::Installing));

        assert!(!S::Installed.can_transition_to(S::Missing));
        assert!(!S::Installing.can_transition_to(S::Missing));
        assert!(!S::Failed.can_transition_to(S::Installed));
        assert!(!S::Missing.can_transition_to(S::Unchecked));
    }

    #[tokio::test]
    async fn installed_toolchain_needs_no_prompt() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.on(&["toolchain", "list"], Reply::ok("nightly-x86_64-unknown-linux-gnu\n"));
        let ui = Arc::new(RecordingUi::answering(true));
        let mut inst = installer(&runner, &ui);

        inst.ensure_toolchain(&config()).await.unwrap();
        assert_eq!(inst.toolchain_state(), InstallationState::Installed);
        assert!(ui.prompts().is_empty());
        assert_eq!(runner.count(&["toolchain", "install"]), 0);
    }

    #[tokio::test]
    async fn declined_toolchain_install_is_fatal() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.on(&["toolchain", "list"], Reply::ok("stable-x86_64-unknown-linux-gnu\n"));
        let ui = Arc::new(RecordingUi::answering(false));
        let mut inst = installer(&runner, &ui);

        let err = inst.ensure_toolchain(&config()).await.unwrap_err();
        assert!(matches!(err, ProvisionError::UserDeclinedInstall { .. }));
        assert_eq!(ui.prompts(), vec!["nightly toolchain not installed. Install?"]);
        assert_eq!(runner.count(&["toolchain", "install"]), 0);
        assert_eq!(inst.toolchain_state(), InstallationState::Missing);
    }

    #[tokio::test]
    async fn accepted_toolchain_install_runs_manager_once() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.on(&["toolchain", "list"], Reply::ok(""));
        runner.on(&["toolchain", "install", "nightly"], Reply::ok("installed"));
        let ui = Arc::new(RecordingUi::answering(true));
        let mut inst = installer(&runner, &ui);

        inst.ensure_toolchain(&config()).await.unwrap();
        assert_eq!(runner.count(&["toolchain", "install", "nightly"]), 1);
        assert_eq!(inst.toolchain_state(), InstallationState::Installed);
        assert_eq!(
            ui.final_status().as_deref(),
            Some("nightly toolchain installed successfully")
        );
    }

    #[tokio::test]
    async fn toolchain_list_failure_tells_user_to_install_manager() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.on(&["toolchain", "list"], Reply::not_found());
        let ui = Arc::new(RecordingUi::answering(true));
        let mut inst = installer(&runner, &ui);

        let err = inst.ensure_toolchain(&config()).await.unwrap_err();
        assert!(matches!(err, ProvisionError::ManagerUnavailable { .. }));
        assert_eq!(ui.messages(MessageLevel::Error), vec![MANAGER_INSTALL_HINT]);
    }

    #[tokio::test]
    async fn component_install_is_sequential_and_stops_at_first_failure() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.on(&["component", "list"], Reply::ok(""));
        runner.on(&["component", "add", "rust-analysis"], Reply::ok(""));
        runner.on(&["component", "add", "rust-src"], Reply::fail("download failed"));
        runner.on(&["component", "add", "rls"], Reply::ok(""));
        let ui = Arc::new(RecordingUi::answering(true));
        let mut inst = installer(&runner, &ui);

        let err = inst.ensure_components(&config()).await.unwrap_err();
        match err {
            ProvisionError::InstallFailed { target, .. } => assert_eq!(target, "rust-src"),
            other => panic!("expected InstallFailed, got {other:?}"),
        }

        let adds: Vec<String> = runner
            .calls()
            .iter()
            .filter(|inv| inv.has_args_prefix(&["component", "add"]))
            .map(|inv| inv.arg_list()[2].clone())
            .collect();
        assert_eq!(adds, vec!["rust-analysis", "rust-src"]);
        assert_eq!(inst.components_state(), InstallationState::Failed);
        assert_eq!(ui.final_status().as_deref(), Some("components install failed"));
    }

    #[tokio::test]
    async fn silent_partial_install_fails_verification() {
        let runner = Arc::new(ScriptedRunner::new());
        // Listing never changes: every `add` "succeeds" without effect.
        runner.on(&["component", "list"], Reply::ok("rust-src (installed)\n"));
        runner.on(&["component", "add"], Reply::ok(""));
        let ui = Arc::new(RecordingUi::answering(true));
        let mut inst = installer(&runner, &ui);

        let err = inst.ensure_components(&config()).await.unwrap_err();
        match err {
            ProvisionError::InstallVerificationFailed { missing, .. } => {
                assert_eq!(missing, vec!["rust-analysis", "rls"]);
            }
            other => panic!("expected InstallVerificationFailed, got {other:?}"),
        }
        assert_eq!(runner.count(&["component", "add"]), 3);
    }

    #[tokio::test]
    async fn successful_component_install_reverifies() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.on(&["component", "list"], Reply::ok(""));
        runner.on(&["component", "list"], Reply::ok(INSTALLED));
        runner.on(&["component", "add"], Reply::ok(""));
        let ui = Arc::new(RecordingUi::answering(true));
        let mut inst = installer(&runner, &ui);

        inst.ensure_components(&config()).await.unwrap();
        assert_eq!(runner.count(&["component", "list"]), 2);
        assert_eq!(inst.components_state(), InstallationState::Installed);
    }

    #[tokio::test]
    async fn consent_can_be_skipped_by_configuration() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.on(&["component", "list"], Reply::ok(""));
        runner.on(&["component", "list"], Reply::ok(INSTALLED));
        runner.on(&["component", "add"], Reply::ok(""));
        let ui = Arc::new(RecordingUi::answering(false));
        let mut inst = installer(&runner, &ui).with_consent(false);

        inst.ensure_components(&config()).await.unwrap();
        assert!(ui.prompts().is_empty());
    }

    #[tokio::test]
    async fn failed_install_is_retried_only_after_approval() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.on(&["component", "list"], Reply::ok(""));
        runner.on(&["component", "add"], Reply::fail("offline"));
        // First prompt: install. Second prompt: retry, declined.
        let ui = Arc::new(RecordingUi::scripted([true, false]));
        let mut inst = installer(&runner, &ui);

        assert!(inst.ensure_components(&config()).await.is_err());
        assert_eq!(inst.components_state(), InstallationState::Failed);

        let err = inst.ensure_components(&config()).await.unwrap_err();
        assert!(matches!(err, ProvisionError::UserDeclinedInstall { .. }));
        assert_eq!(inst.components_state(), InstallationState::Failed);
        assert_eq!(
            ui.prompts(),
            vec![
                "RLS not installed. Install?",
                "Installing RLS components failed earlier. Retry?"
            ]
        );
        assert_eq!(runner.count(&["component", "add"]), 1);
    }
}
