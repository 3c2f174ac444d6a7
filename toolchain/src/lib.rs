//! Toolchain provisioning for the analysis server.
//!
//! Everything here talks to the outside world through two seams:
//! [`CommandRunner`] for subprocesses and [`Ui`] for the editor surfaces.

mod channel;
mod components;
mod config;
mod env;
mod error;
mod install;
mod runner;
mod sysroot;
mod ui;
mod update;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use channel::{
    ActiveToolchain, FALLBACK_CHANNEL, ToolchainResolver, parse_active_toolchain,
    strip_channel_annotation,
};
pub use components::{
    REQUIRED_COMPONENTS, has_components, has_toolchain, missing_components, missing_from_listing,
    required_components,
};
pub use config::{Manager, ToolchainConfig};
pub use env::{Environment, PATH_LIST_SEPARATOR};
pub use error::ProvisionError;
pub use install::{InstallationState, Installer};
pub use runner::{CommandOutput, CommandRunner, Invocation, ProcessRunner, RunError, RunFut};
pub use sysroot::{
    ExtendSearchPath, RetryPolicy, RetryStrategy, Sysroot, SysrootCommand, SysrootResolver,
};
pub use ui::{ConfirmFut, MessageLevel, STATUS_PREFIX, Ui};
pub use update::{UpdateOutcome, auto_update, update_toolchain};
