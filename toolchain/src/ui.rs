//! Editor-facing sinks: status indicator, user messages and consent prompts.

use std::future::Future;
use std::pin::Pin;

/// Prefix shown in front of every status indicator update.
pub const STATUS_PREFIX: &str = "RLS";

/// Future returned by [`Ui::confirm`].
pub type ConfirmFut<'a> = Pin<Box<dyn Future<Output = bool> + Send + 'a>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageLevel {
    Info,
    Warning,
    Error,
}

impl MessageLevel {
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

/// Write-only view of the editor's UI, plus the one interactive question
/// the provisioning chain may need to ask.
pub trait Ui: Send + Sync {
    /// Show an animated "in progress" indicator: `<prefix> <spinner> <text>`.
    fn start_spinner(&self, prefix: &str, text: &str);

    /// Stop any running indicator and leave `text` in its place.
    fn stop_spinner(&self, text: &str);

    fn show_message(&self, level: MessageLevel, text: &str);

    /// Ask the user a yes/no question. Dismissal counts as "no".
    fn confirm<'a>(&'a self, question: &'a str) -> ConfirmFut<'a>;
}
