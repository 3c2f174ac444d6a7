//! Analysis server supervision: framing, progress, and the per-workspace
//! session that provisions a toolchain and keeps one server running.

pub mod codec;
pub mod types;

pub(crate) mod env;
pub(crate) mod progress;
pub(crate) mod protocol;
pub(crate) mod server;

mod session;

pub use env::server_environment;
pub use progress::{BuildCounter, ProgressAggregator, Status, TokenReducer};
pub use protocol::{ProgressId, ProgressParams, ServerNotification};
pub use server::SpawnError;
pub use session::{LaunchMode, LaunchPlan, SERVER_PROGRAM, Session, SessionError};
pub use types::{ServerEvent, ServerStopReason, SessionEvent, SessionSettings};
