//! Toolchain manager self-update.

use crate::config::Manager;
use crate::runner::CommandRunner;
use crate::ui::{MessageLevel, STATUS_PREFIX, Ui};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    UpToDate,
    /// Something changed; the server must be restarted to pick it up.
    RestartRequired,
    Failed,
}

/// Run `<manager> update` and report the result on the status indicator.
///
/// Never returns an error: a failed update is a warning only.
pub async fn update_toolchain(
    runner: &dyn CommandRunner,
    ui: &dyn Ui,
    manager: &Manager,
) -> UpdateOutcome {
    ui.start_spinner(STATUS_PREFIX, "Updating…");
    match runner.run(&manager.invocation(["update"])).await {
        Ok(output) if output.stdout.contains("unchanged") => {
            ui.stop_spinner("Up to date.");
            UpdateOutcome::UpToDate
        }
        Ok(_) => {
            ui.stop_spinner("Up to date. Restart extension for changes to take effect.");
            UpdateOutcome::RestartRequired
        }
        Err(e) => {
            tracing::warn!(manager = %manager.path(), "Toolchain update failed: {e}");
            ui.show_message(
                MessageLevel::Warning,
                "An error occurred whilst trying to update.",
            );
            ui.stop_spinner("An error occurred whilst trying to update.");
            UpdateOutcome::Failed
        }
    }
}

/// Startup update, run only when enabled and a manager is in use.
pub async fn auto_update(
    runner: &dyn CommandRunner,
    ui: &dyn Ui,
    manager: &Manager,
    update_on_startup: bool,
    manager_enabled: bool,
) -> Option<UpdateOutcome> {
    if !update_on_startup || !manager_enabled {
        tracing::debug!(update_on_startup, manager_enabled, "Skipping startup update");
        return None;
    }
    Some(update_toolchain(runner, ui, manager).await)
}
