//! Active toolchain channel detection.

use std::path::Path;

use crate::config::Manager;
use crate::error::ProvisionError;
use crate::runner::CommandRunner;

/// Channel used when neither configuration nor the manager can name one.
pub const FALLBACK_CHANNEL: &str = "nightly";

const ACTIVE_SECTION_MARKER: &str = "active toolchain";

/// Result of scanning `rustup show` output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActiveToolchain {
    Found(String),
    /// More than one qualifying line under the "active toolchain" section.
    Ambiguous,
    NotFound,
}

/// Match `<name> (default…` or `<name> (overridden…` and return `name`.
fn channel_on_line(line: &str) -> Option<&str> {
    let (name, rest) = line.split_once(' ')?;
    if name.is_empty() || name.chars().any(char::is_whitespace) {
        return None;
    }
    (rest.starts_with("(default") || rest.starts_with("(overridden")).then_some(name)
}

/// Parse the output of `rustup show`.
///
/// The "installed toolchains" list may also carry a `(default)` entry, so the
/// search is scoped to the "active toolchain" section when one exists. With no
/// qualifying line there, the third line of the whole output is tried (the
/// layout of older manager releases).
#[must_use]
pub fn parse_active_toolchain(output: &str) -> ActiveToolchain {
    if let Some(idx) = output.find(ACTIVE_SECTION_MARKER) {
        let mut matches = output[idx..].lines().filter_map(channel_on_line);
        match (matches.next(), matches.next()) {
            (Some(name), None) => return ActiveToolchain::Found(name.to_string()),
            (Some(_), Some(_)) => return ActiveToolchain::Ambiguous,
            (None, _) => {}
        }
    }

    match output.lines().nth(2).and_then(channel_on_line) {
        Some(name) => ActiveToolchain::Found(name.to_string()),
        None => ActiveToolchain::NotFound,
    }
}

/// Strip the ` (default)` / ` (overridden by …)` annotation that
/// `rustup show active-toolchain` appends to the channel name.
#[must_use]
pub fn strip_channel_annotation(line: &str) -> &str {
    let line = line.trim();
    match line.find(" (") {
        Some(idx) if line.ends_with(')') => &line[..idx],
        _ => line,
    }
}

/// Determines the channel the server should run on.
pub struct ToolchainResolver<'a> {
    runner: &'a dyn CommandRunner,
    manager: &'a Manager,
    root: &'a Path,
}

impl<'a> ToolchainResolver<'a> {
    /// `root` is the project directory; local overrides there change the answer.
    #[must_use]
    pub fn new(runner: &'a dyn CommandRunner, manager: &'a Manager, root: &'a Path) -> Self {
        Self {
            runner,
            manager,
            root,
        }
    }

    /// Explicit override verbatim, otherwise whatever the manager reports.
    pub async fn resolve(&self, explicit: Option<&str>) -> Result<String, ProvisionError> {
        if let Some(channel) = explicit {
            return Ok(channel.to_string());
        }
        let channel = self.query_active().await?;
        tracing::info!(
            channel = %channel,
            "Detected active channel (no channel configured)"
        );
        Ok(channel)
    }

    /// Like [`resolve`](Self::resolve), but never fails: query problems fall
    /// back to [`FALLBACK_CHANNEL`].
    pub async fn resolve_or_fallback(&self, explicit: Option<&str>) -> String {
        match self.resolve(explicit).await {
            Ok(channel) if !channel.is_empty() => channel,
            Ok(_) => FALLBACK_CHANNEL.to_string(),
            Err(e) => {
                tracing::warn!("{e}; using {FALLBACK_CHANNEL}");
                FALLBACK_CHANNEL.to_string()
            }
        }
    }

    async fn query_active(&self) -> Result<String, ProvisionError> {
        let inv = self
            .manager
            .invocation(["show", "active-toolchain"])
            .current_dir(self.root);
        match self.runner.run(&inv).await {
            Ok(output) => {
                let first = output.stdout.lines().next().unwrap_or_default();
                let channel = strip_channel_annotation(first);
                if !channel.is_empty() {
                    return Ok(channel.to_string());
                }
                tracing::debug!("`show active-toolchain` printed nothing, trying `show`");
            }
            Err(e) => {
                // Older managers lack `show active-toolchain`.
                tracing::debug!("`show active-toolchain` failed ({e}), trying `show`");
            }
        }

        let inv = self.manager.invocation(["show"]).current_dir(self.root);
        let output =
            self.runner
                .run(&inv)
                .await
                .map_err(|e| ProvisionError::ToolchainQueryFailed {
                    reason: e.to_string(),
                })?;

        match parse_active_toolchain(&output.stdout) {
            ActiveToolchain::Found(name) => Ok(name),
            ActiveToolchain::Ambiguous => Err(ProvisionError::ToolchainQueryFailed {
                reason: "multiple active toolchains found under 'active toolchain'".to_string(),
            }),
            ActiveToolchain::NotFound => Err(ProvisionError::ToolchainQueryFailed {
                reason: "couldn't find an active toolchain".to_string(),
            }),
        }
    }
}
