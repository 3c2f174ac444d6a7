//! Reduce server progress notifications to a single status line.
//!
//! Two reducers run side by side. [`TokenReducer`] tracks `window/progress`
//! tokens; [`BuildCounter`] tracks the older `rustDocument/beginBuild` /
//! `rustDocument/diagnosticsEnd` pair. They share no state: whichever one
//! handles an event decides the status published after it.

use std::collections::HashMap;
use std::sync::Arc;

use warden_toolchain::{STATUS_PREFIX, Ui};

use crate::protocol::{ProgressId, ProgressParams, ServerNotification};

/// What the status indicator should show.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    Idle,
    Busy(String),
}

#[derive(Debug, Clone)]
struct Token {
    percentage: Option<f64>,
    message: Option<String>,
    title: Option<String>,
    touched: u64,
}

impl Token {
    /// `round(p*100)%`, else the message, else `[title]` in lower case.
    fn label(&self) -> String {
        if let Some(p) = self.percentage {
            return format!("{}%", (p * 100.0).round() as i64);
        }
        if let Some(message) = &self.message {
            return message.clone();
        }
        if let Some(title) = &self.title {
            return format!("[{}]", title.to_lowercase());
        }
        String::new()
    }
}

/// Live `window/progress` tokens.
#[derive(Debug, Default)]
pub struct TokenReducer {
    tokens: HashMap<ProgressId, Token>,
    clock: u64,
}

impl TokenReducer {
    pub fn apply(&mut self, params: &ProgressParams) -> Status {
        if params.done == Some(true) {
            self.tokens.remove(&params.id);
        } else {
            self.clock += 1;
            self.tokens.insert(
                params.id.clone(),
                Token {
                    percentage: params.percentage,
                    message: params.message.clone(),
                    title: params.title.clone(),
                    touched: self.clock,
                },
            );
        }
        self.status()
    }

    /// Pure function of the live set.
    #[must_use]
    pub fn status(&self) -> Status {
        match self.tokens.values().max_by_key(|t| t.touched) {
            Some(token) => Status::Busy(token.label()),
            None => Status::Idle,
        }
    }

    #[must_use]
    pub fn live_count(&self) -> usize {
        self.tokens.len()
    }

    pub fn clear(&mut self) {
        self.tokens.clear();
    }
}

/// Counter for builds started by `beginBuild` and finished by `diagnosticsEnd`.
#[derive(Debug, Default)]
pub struct BuildCounter {
    pending: i64,
}

impl BuildCounter {
    pub fn begin(&mut self) -> Status {
        self.pending += 1;
        Status::Busy("working".to_string())
    }

    /// `None` while other builds are still outstanding.
    pub fn end(&mut self) -> Option<Status> {
        self.pending -= 1;
        (self.pending <= 0).then_some(Status::Idle)
    }

    #[must_use]
    pub fn pending(&self) -> i64 {
        self.pending
    }

    pub fn clear(&mut self) {
        self.pending = 0;
    }
}

/// Feeds both reducers and publishes the result to the status indicator.
pub struct ProgressAggregator {
    ui: Arc<dyn Ui>,
    tokens: TokenReducer,
    builds: BuildCounter,
    current: Status,
}

impl ProgressAggregator {
    #[must_use]
    pub fn new(ui: Arc<dyn Ui>) -> Self {
        Self {
            ui,
            tokens: TokenReducer::default(),
            builds: BuildCounter::default(),
            current: Status::Idle,
        }
    }

    /// Apply one notification. Returns the status published for it, if any.
    pub fn apply(&mut self, notification: &ServerNotification) -> Option<Status> {
        let status = match notification {
            ServerNotification::Progress(params) => self.tokens.apply(params),
            ServerNotification::BeginBuild => self.builds.begin(),
            ServerNotification::DiagnosticsEnd => self.builds.end()?,
            ServerNotification::ShowMessage { .. } | ServerNotification::Other(_) => return None,
        };
        self.publish(status.clone());
        Some(status)
    }

    /// Drop all progress state, e.g. when the server goes away. Publishes
    /// nothing; the caller sets the terminal status.
    pub fn reset(&mut self) {
        self.tokens.clear();
        self.builds.clear();
        self.current = Status::Idle;
    }

    #[must_use]
    pub fn current(&self) -> &Status {
        &self.current
    }

    #[must_use]
    pub fn live_tokens(&self) -> usize {
        self.tokens.live_count()
    }

    fn publish(&mut self, status: Status) {
        match &status {
            Status::Busy(label) => self.ui.start_spinner(STATUS_PREFIX, label),
            Status::Idle => self.ui.stop_spinner(STATUS_PREFIX),
        }
        self.current = status;
    }
}
