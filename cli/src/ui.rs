//! [`Ui`] for a terminal: status lines and messages on stderr, consent
//! prompts answered on stdin.

use std::io::Write;
use std::sync::{Mutex, PoisonError};

use warden_toolchain::{ConfirmFut, MessageLevel, Ui};

use crate::input::InputPump;

const SPINNER_GLYPH: &str = "…";

pub struct TerminalUi {
    input: InputPump,
    assume_yes: bool,
    last_line: Mutex<String>,
}

impl TerminalUi {
    #[must_use]
    pub fn new(input: InputPump, assume_yes: bool) -> Self {
        Self {
            input,
            assume_yes,
            last_line: Mutex::new(String::new()),
        }
    }

    /// Write `line` unless it repeats the previous status line.
    fn status_line(&self, line: String) {
        let mut last = self.last_line.lock().unwrap_or_else(PoisonError::into_inner);
        if *last == line {
            return;
        }
        eprintln!("{line}");
        *last = line;
    }
}

fn spinner_line(prefix: &str, text: &str) -> String {
    if text.is_empty() {
        format!("{prefix} {SPINNER_GLYPH}")
    } else {
        format!("{prefix} {SPINNER_GLYPH} {text}")
    }
}

/// `y`/`yes` in any case; everything else, including an empty line, is no.
fn parse_answer(line: &str) -> bool {
    matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

impl Ui for TerminalUi {
    fn start_spinner(&self, prefix: &str, text: &str) {
        self.status_line(spinner_line(prefix, text));
    }

    fn stop_spinner(&self, text: &str) {
        self.status_line(text.to_string());
    }

    fn show_message(&self, level: MessageLevel, text: &str) {
        tracing::info!(level = level.label(), %text, "User message");
        eprintln!("[{}] {text}", level.label());
    }

    fn confirm<'a>(&'a self, question: &'a str) -> ConfirmFut<'a> {
        Box::pin(async move {
            if self.assume_yes {
                eprintln!("{question} [y/N] y");
                return true;
            }
            eprint!("{question} [y/N] ");
            let _ = std::io::stderr().flush();
            let answer = self.input.next_line().await;
            let yes = answer.as_deref().is_some_and(parse_answer);
            tracing::info!(%question, yes, "Consent prompt answered");
            yes
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn answers() {
        assert!(parse_answer("y"));
        assert!(parse_answer(" YES\n"));
        assert!(!parse_answer(""));
        assert!(!parse_answer("no"));
        assert!(!parse_answer("yep"));
    }

    #[test]
    fn spinner_line_omits_empty_text() {
        assert_eq!(spinner_line("RLS", "Starting"), "RLS … Starting");
        assert_eq!(spinner_line("RLS", ""), "RLS …");
    }

    #[tokio::test]
    async fn confirm_reads_the_next_line() {
        let (tx, rx) = mpsc::channel(4);
        let ui = TerminalUi::new(InputPump::from_receiver(rx), false);
        tx.send("y".to_string()).await.unwrap();
        assert!(ui.confirm("Install?").await);
        tx.send("n".to_string()).await.unwrap();
        assert!(!ui.confirm("Install?").await);
    }

    #[tokio::test]
    async fn closed_stdin_declines() {
        let (tx, rx) = mpsc::channel::<String>(1);
        drop(tx);
        let ui = TerminalUi::new(InputPump::from_receiver(rx), false);
        assert!(!ui.confirm("Install?").await);
    }

    #[tokio::test]
    async fn assume_yes_skips_input() {
        let (_tx, rx) = mpsc::channel::<String>(1);
        let ui = TerminalUi::new(InputPump::from_receiver(rx), true);
        assert!(ui.confirm("Install?").await);
    }
}
