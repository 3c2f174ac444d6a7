//! Fakes for the runner and UI seams.
//!
//! Available to this crate's tests and, with the `test-support` feature, to
//! downstream crates' tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::runner::{CommandOutput, CommandRunner, Invocation, RunError, RunFut};
use crate::ui::{ConfirmFut, MessageLevel, Ui};

/// Canned response for one matching invocation.
#[derive(Debug, Clone)]
pub enum Reply {
    Ok(String),
    Fail(String),
    NotFound,
}

impl Reply {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self::Ok(stdout.into())
    }

    pub fn fail(stderr: impl Into<String>) -> Self {
        Self::Fail(stderr.into())
    }

    #[must_use]
    pub fn not_found() -> Self {
        Self::NotFound
    }

    fn into_result(self, invocation: &Invocation) -> Result<CommandOutput, RunError> {
        match self {
            Self::Ok(stdout) => Ok(CommandOutput::new(stdout)),
            Self::Fail(stderr) => Err(RunError::Failed {
                command: invocation.command_line(),
                code: Some(1),
                stderr,
            }),
            Self::NotFound => Err(RunError::NotFound {
                program: invocation.program().to_string(),
            }),
        }
    }
}

struct Rule {
    prefix: Vec<String>,
    replies: VecDeque<Reply>,
}

/// [`CommandRunner`] answering from scripted replies keyed by argument prefix.
///
/// The longest matching prefix wins. Replies for a prefix are consumed in
/// order; the last one repeats. Unscripted invocations fail.
#[derive(Default)]
pub struct ScriptedRunner {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<Invocation>>,
}

impl ScriptedRunner {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `reply` for invocations whose arguments start with `prefix`.
    pub fn on(&self, prefix: &[&str], reply: Reply) {
        let mut rules = self.rules.lock().expect("rules lock");
        if let Some(rule) = rules
            .iter_mut()
            .find(|r| r.prefix.iter().map(String::as_str).eq(prefix.iter().copied()))
        {
            rule.replies.push_back(reply);
            return;
        }
        rules.push(Rule {
            prefix: prefix.iter().map(|s| (*s).to_string()).collect(),
            replies: VecDeque::from([reply]),
        });
    }

    /// Every invocation seen so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.lock().expect("calls lock").clone()
    }

    /// Number of invocations whose arguments start with `prefix`.
    #[must_use]
    pub fn count(&self, prefix: &[&str]) -> usize {
        self.calls()
            .iter()
            .filter(|inv| inv.has_args_prefix(prefix))
            .count()
    }

    fn next_reply(&self, invocation: &Invocation) -> Reply {
        let mut rules = self.rules.lock().expect("rules lock");
        let best = rules
            .iter_mut()
            .filter(|r| {
                let prefix: Vec<&str> = r.prefix.iter().map(String::as_str).collect();
                invocation.has_args_prefix(&prefix)
            })
            .max_by_key(|r| r.prefix.len());
        match best {
            Some(rule) if rule.replies.len() > 1 => rule.replies.pop_front().expect("non-empty"),
            Some(rule) => rule.replies.front().cloned().expect("non-empty"),
            None => Reply::fail(format!("unscripted: {}", invocation.command_line())),
        }
    }
}

impl CommandRunner for ScriptedRunner {
    fn run<'a>(&'a self, invocation: &'a Invocation) -> RunFut<'a> {
        self.calls
            .lock()
            .expect("calls lock")
            .push(invocation.clone());
        let result = self.next_reply(invocation).into_result(invocation);
        Box::pin(async move { result })
    }
}

/// Observable interaction with a [`RecordingUi`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiEvent {
    Spinner { prefix: String, text: String },
    Stopped(String),
    Message(MessageLevel, String),
    Prompt(String),
}

/// [`Ui`] that records everything and answers prompts from a script.
pub struct RecordingUi {
    answers: Mutex<VecDeque<bool>>,
    default_answer: bool,
    events: Mutex<Vec<UiEvent>>,
}

impl RecordingUi {
    /// Answers every prompt with `answer`.
    #[must_use]
    pub fn answering(answer: bool) -> Self {
        Self {
            answers: Mutex::new(VecDeque::new()),
            default_answer: answer,
            events: Mutex::new(Vec::new()),
        }
    }

    /// Answers prompts from `answers` in order, then with `false`.
    #[must_use]
    pub fn scripted(answers: impl IntoIterator<Item = bool>) -> Self {
        Self {
            answers: Mutex::new(answers.into_iter().collect()),
            default_answer: false,
            events: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn events(&self) -> Vec<UiEvent> {
        self.events.lock().expect("events lock").clone()
    }

    #[must_use]
    pub fn prompts(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                UiEvent::Prompt(q) => Some(q),
                _ => None,
            })
            .collect()
    }

    #[must_use]
    pub fn messages(&self, level: MessageLevel) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                UiEvent::Message(l, text) if l == level => Some(text),
                _ => None,
            })
            .collect()
    }

    /// The text left by the most recent `stop_spinner`, if the indicator is
    /// currently stopped.
    #[must_use]
    pub fn final_status(&self) -> Option<String> {
        self.events().into_iter().rev().find_map(|e| match e {
            UiEvent::Stopped(text) => Some(Some(text)),
            UiEvent::Spinner { .. } => Some(None),
            _ => None,
        })?
    }

    fn record(&self, event: UiEvent) {
        self.events.lock().expect("events lock").push(event);
    }
}

impl Ui for RecordingUi {
    fn start_spinner(&self, prefix: &str, text: &str) {
        self.record(UiEvent::Spinner {
            prefix: prefix.to_string(),
            text: text.to_string(),
        });
    }

    fn stop_spinner(&self, text: &str) {
        self.record(UiEvent::Stopped(text.to_string()));
    }

    fn show_message(&self, level: MessageLevel, text: &str) {
        self.record(UiEvent::Message(level, text.to_string()));
    }

    fn confirm<'a>(&'a self, question: &'a str) -> ConfirmFut<'a> {
        self.record(UiEvent::Prompt(question.to_string()));
        let answer = self
            .answers
            .lock()
            .expect("answers lock")
            .pop_front()
            .unwrap_or(self.default_answer);
        Box::pin(async move { answer })
    }
}
