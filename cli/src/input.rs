//! Line-oriented stdin for the command loop and for consent prompts.

use std::io::BufRead;
use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};

const INPUT_CHANNEL_CAPACITY: usize = 64;

/// Shared receiver of stdin lines.
///
/// The command loop and [`crate::ui::TerminalUi::confirm`] both read from
/// it. They never wait at the same time: prompts only happen while the loop
/// is awaiting a session operation.
#[derive(Clone)]
pub struct InputPump {
    lines: Arc<Mutex<mpsc::Receiver<String>>>,
}

impl InputPump {
    /// Read stdin on a dedicated thread.
    ///
    /// A blocking stdin read cannot be cancelled, so this is a plain thread
    /// rather than a runtime blocking task; it dies with the process.
    #[must_use]
    pub fn stdin() -> Self {
        let (tx, rx) = mpsc::channel(INPUT_CHANNEL_CAPACITY);
        let spawned = std::thread::Builder::new()
            .name("warden-stdin".to_string())
            .spawn(move || {
                let stdin = std::io::stdin();
                for line in stdin.lock().lines() {
                    let Ok(line) = line else {
                        break;
                    };
                    if tx.blocking_send(line).is_err() {
                        break;
                    }
                }
                tracing::debug!("stdin closed");
            });
        if let Err(e) = spawned {
            tracing::warn!(error = %e, "Failed to start stdin reader; running without input");
        }
        Self::from_receiver(rx)
    }

    #[must_use]
    pub fn from_receiver(rx: mpsc::Receiver<String>) -> Self {
        Self {
            lines: Arc::new(Mutex::new(rx)),
        }
    }

    /// Next line, or `None` once stdin is closed.
    pub async fn next_line(&self) -> Option<String> {
        self.lines.lock().await.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn clones_share_one_stream() {
        let (tx, rx) = mpsc::channel(4);
        let pump = InputPump::from_receiver(rx);
        let other = pump.clone();
        tx.send("restart".to_string()).await.unwrap();
        tx.send("quit".to_string()).await.unwrap();
        drop(tx);

        assert_eq!(pump.next_line().await.as_deref(), Some("restart"));
        assert_eq!(other.next_line().await.as_deref(), Some("quit"));
        assert_eq!(pump.next_line().await, None);
    }
}
