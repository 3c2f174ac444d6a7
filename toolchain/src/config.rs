//! Resolved toolchain configuration for one provisioning cycle.

use crate::runner::Invocation;

/// How to invoke the toolchain manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manager {
    path: String,
    use_wsl: bool,
}

impl Manager {
    #[must_use]
    pub fn new(path: impl Into<String>, use_wsl: bool) -> Self {
        Self {
            path: path.into(),
            use_wsl,
        }
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[must_use]
    pub fn use_wsl(&self) -> bool {
        self.use_wsl
    }

    /// `<manager> <args…>`, routed through `wsl` when configured.
    #[must_use]
    pub fn invocation<I, S>(&self, args: I) -> Invocation
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if self.use_wsl {
            Invocation::new("wsl").args([self.path.clone()]).args(args)
        } else {
            Invocation::new(self.path.clone()).args(args)
        }
    }
}

impl Default for Manager {
    fn default() -> Self {
        Self::new("rustup", false)
    }
}

/// Channel plus manager. Immutable once resolved; a restart re-derives it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolchainConfig {
    pub channel: String,
    pub manager: Manager,
}

impl ToolchainConfig {
    #[must_use]
    pub fn new(channel: impl Into<String>, manager: Manager) -> Self {
        Self {
            channel: channel.into(),
            manager,
        }
    }
}
