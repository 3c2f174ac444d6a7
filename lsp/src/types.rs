//! Public types shared between the session and its callers.

use std::path::PathBuf;

use crate::protocol::ServerNotification;

/// Everything a session needs to know about the user's configuration.
///
/// Built by the configuration layer; the session never reads settings
/// anywhere else.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    /// Workspace root. Only the first root of a multi-root workspace is used.
    pub root: PathBuf,
    /// Explicit channel; detected from the manager when absent.
    pub channel: Option<String>,
    pub manager_path: String,
    /// Explicit server executable. Implies the manager is disabled.
    pub server_path: Option<String>,
    pub disable_manager: bool,
    pub use_wsl: bool,
    pub log_to_file: bool,
    pub set_lib_path: bool,
    pub update_on_startup: bool,
    /// Ask before installing missing components.
    pub ask_install: bool,
}

impl SessionSettings {
    /// Defaults for `root`: manager `rustup`, lib path injection and startup
    /// update on, consent prompts on.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            channel: None,
            manager_path: "rustup".to_string(),
            server_path: None,
            disable_manager: false,
            use_wsl: false,
            log_to_file: false,
            set_lib_path: true,
            update_on_startup: true,
            ask_install: true,
        }
    }

    /// Whether toolchain manager calls are allowed at all.
    #[must_use]
    pub fn manager_enabled(&self) -> bool {
        !self.disable_manager && self.server_path.is_none()
    }
}

/// How a server process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerStopReason {
    Exited,
    Failed(String),
}

/// Something that happened on a server's streams.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    Notification(ServerNotification),
    Stopped(ServerStopReason),
}

/// A [`ServerEvent`] tagged with the generation of the server that sent it.
///
/// Every spawn gets a new generation; events from older generations are
/// dropped by the session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionEvent {
    pub generation: u64,
    pub event: ServerEvent,
}
