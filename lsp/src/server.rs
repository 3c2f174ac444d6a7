//! Server handle: owns the child process and its stdio tasks.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use warden_toolchain::Invocation;

use crate::codec::{FrameReader, FrameWriter};
use crate::protocol::{self, Incoming, Notification, Request};
use crate::types::{ServerEvent, ServerStopReason, SessionEvent};

const INIT_TIMEOUT: Duration = Duration::from_secs(30);

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

const WRITER_CHANNEL_CAPACITY: usize = 64;

/// Requests awaiting a response. `None` once the reader has exited: nothing
/// will be answered after that.
type Pending = Mutex<Option<HashMap<u64, oneshot::Sender<serde_json::Value>>>>;
type PendingMap = Arc<Pending>;

enum WriterCommand {
    Send(serde_json::Value),
    Shutdown,
}

/// Why a server process could not be created.
#[derive(Debug, thiserror::Error)]
pub enum SpawnError {
    #[error("`{program}` not found")]
    NotFound { program: String },
    #[error("failed to spawn `{program}`: {source}")]
    Io {
        program: String,
        #[source]
        source: io::Error,
    },
}

impl SpawnError {
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Look `program` up the way the child will see it: through the
/// invocation's own `PATH` and working directory.
pub(crate) fn resolve_program(invocation: &Invocation) -> Result<PathBuf, SpawnError> {
    let search_path = invocation
        .environment()
        .and_then(|env| env.get("PATH"))
        .map(str::to_string)
        .or_else(|| std::env::var("PATH").ok());
    let cwd = invocation
        .cwd()
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
    which::which_in(invocation.program(), search_path, cwd).map_err(|e| {
        tracing::debug!(program = invocation.program(), "Lookup failed: {e}");
        SpawnError::NotFound {
            program: invocation.program().to_string(),
        }
    })
}

/// Copy server stderr into `log` when given, else into the debug log.
///
/// A log file that cannot be created or written is reported once; the stream
/// is still drained so the server never blocks on a full pipe.
async fn pump_stderr<R: AsyncRead + Unpin>(mut stderr: R, log: Option<PathBuf>) {
    let Some(path) = log else {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            tracing::debug!(target: "warden::server::stderr", "{line}");
        }
        return;
    };

    match tokio::fs::File::create(&path).await {
        Ok(mut file) => match tokio::io::copy(&mut stderr, &mut file).await {
            Ok(bytes) => tracing::debug!(path = %path.display(), bytes, "Server log closed"),
            Err(e) => tracing::warn!(path = %path.display(), "Writing server log failed: {e}"),
        },
        Err(e) => tracing::warn!(path = %path.display(), "Creating server log failed: {e}"),
    }
    let _ = tokio::io::copy(&mut stderr, &mut tokio::io::sink()).await;
}

pub(crate) struct RunningServer {
    generation: u64,
    program: String,
    child: Child,
    writer_tx: mpsc::Sender<WriterCommand>,
    next_id: u64,
    pending: PendingMap,
    log_path: Option<PathBuf>,
    /// Set once a deliberate stop begins; the reader then exits silently.
    stopping: Arc<AtomicBool>,
    reader_handle: JoinHandle<()>,
    #[allow(dead_code)]
    writer_handle: JoinHandle<()>,
    #[allow(dead_code)]
    stderr_handle: JoinHandle<()>,
}

impl RunningServer {
    /// Spawn `invocation` and wire its stdio. Does not talk to the server yet;
    /// see [`initialize`](Self::initialize).
    pub fn spawn(
        invocation: &Invocation,
        generation: u64,
        event_tx: mpsc::Sender<SessionEvent>,
        log_path: Option<PathBuf>,
    ) -> Result<Self, SpawnError> {
        let program = invocation.program().to_string();
        let resolved = resolve_program(invocation)?;

        let mut cmd = Command::new(&resolved);
        cmd.args(invocation.arg_list())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = invocation.cwd() {
            cmd.current_dir(cwd);
        }
        if let Some(env) = invocation.environment() {
            cmd.env_clear().envs(env.iter());
        }

        let mut child = cmd.spawn().map_err(|source| {
            if source.kind() == io::ErrorKind::NotFound {
                SpawnError::NotFound {
                    program: program.clone(),
                }
            } else {
                SpawnError::Io {
                    program: program.clone(),
                    source,
                }
            }
        })?;
        tracing::info!(
            generation,
            pid = child.id(),
            command = %invocation.command_line(),
            "Server spawned"
        );

        let io_error = |what: &str| SpawnError::Io {
            program: program.clone(),
            source: io::Error::other(format!("no {what} pipe")),
        };
        let stdin = child.stdin.take().ok_or_else(|| io_error("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| io_error("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| io_error("stderr"))?;

        let stderr_handle = tokio::spawn(pump_stderr(stderr, log_path.clone()));

        let (writer_tx, mut writer_rx) = mpsc::channel::<WriterCommand>(WRITER_CHANNEL_CAPACITY);
        let writer_handle = tokio::spawn(async move {
            let mut writer = FrameWriter::new(stdin);
            while let Some(cmd) = writer_rx.recv().await {
                match cmd {
                    WriterCommand::Send(frame) => {
                        if let Err(e) = writer.send(&frame).await {
                            tracing::warn!(generation, "Server write error: {e}");
                            break;
                        }
                    }
                    WriterCommand::Shutdown => break,
                }
            }
        });

        let pending: PendingMap = Arc::new(Mutex::new(Some(HashMap::new())));
        let reader_pending = pending.clone();
        let reader_writer_tx = writer_tx.clone();
        let stopping = Arc::new(AtomicBool::new(false));
        let reader_stopping = stopping.clone();
        let reader_handle = tokio::spawn(async move {
            let mut reader = FrameReader::new(stdout);
            let reason = loop {
                match reader.recv().await {
                    Ok(Some(frame)) => {
                        Self::dispatch_frame(
                            &frame,
                            generation,
                            &reader_pending,
                            &event_tx,
                            &reader_writer_tx,
                        )
                        .await;
                    }
                    Ok(None) => {
                        tracing::info!(generation, "Server closed stdout");
                        break ServerStopReason::Exited;
                    }
                    Err(e) => {
                        tracing::warn!(generation, "Server read error: {e}");
                        break ServerStopReason::Failed(e.to_string());
                    }
                }
            };
            // Dropping the senders fails every waiting request at once.
            reader_pending.lock().await.take();
            if reader_stopping.load(Ordering::Acquire) {
                return;
            }
            let _ = event_tx
                .send(SessionEvent {
                    generation,
                    event: ServerEvent::Stopped(reason),
                })
                .await;
        });

        Ok(Self {
            generation,
            program,
            child,
            writer_tx,
            next_id: 1,
            pending,
            log_path,
            stopping,
            reader_handle,
            writer_handle,
            stderr_handle,
        })
    }

    async fn dispatch_frame(
        frame: &serde_json::Value,
        generation: u64,
        pending: &Pending,
        event_tx: &mpsc::Sender<SessionEvent>,
        writer_tx: &mpsc::Sender<WriterCommand>,
    ) {
        let Some(incoming) = Incoming::parse(frame) else {
            tracing::trace!(generation, "Ignoring malformed JSON-RPC frame");
            return;
        };

        match incoming {
            Incoming::Response { id, body } => {
                if let Some(tx) = pending.lock().await.as_mut().and_then(|p| p.remove(&id)) {
                    let _ = tx.send(body);
                }
            }
            Incoming::Request { id, method } => {
                // Servers block on some requests until they get an answer.
                tracing::debug!(generation, method = %method, "Replying method not found");
                let reply = protocol::method_not_found(&id, &method);
                let _ = writer_tx.send(WriterCommand::Send(reply)).await;
            }
            Incoming::Notification(notification) => {
                tracing::trace!(generation, ?notification, "Server notification");
                let _ = event_tx
                    .send(SessionEvent {
                        generation,
                        event: ServerEvent::Notification(notification),
                    })
                    .await;
            }
        }
    }

    /// `initialize` request followed by the `initialized` notification.
    pub async fn initialize(&mut self, root: &Path) -> Result<()> {
        let root_uri =
            protocol::path_to_file_uri(root).context("converting workspace root to URI")?;
        let params = protocol::initialize_params(root_uri.as_str());
        let response = self
            .send_request("initialize", Some(params), INIT_TIMEOUT)
            .await?;

        if let Some(error) = response.get("error") {
            bail!(
                "initialize failed: {}",
                error["message"].as_str().unwrap_or("unknown error")
            );
        }

        self.send_notification("initialized", Some(serde_json::json!({})))
            .await?;
        tracing::info!(generation = self.generation, "Server initialized");
        Ok(())
    }

    async fn send_request(
        &mut self,
        method: &'static str,
        params: Option<serde_json::Value>,
        timeout: Duration,
    ) -> Result<serde_json::Value> {
        let id = self.next_id;
        self.next_id += 1;

        let (tx, rx) = oneshot::channel();
        match self.pending.lock().await.as_mut() {
            Some(pending) => pending.insert(id, tx),
            None => bail!("server went away before answering {method}"),
        };

        let frame = serde_json::to_value(Request::new(id, method, params))
            .context("serializing request")?;
        if self
            .writer_tx
            .send(WriterCommand::Send(frame))
            .await
            .is_err()
        {
            self.forget(id).await;
            bail!("writer channel closed");
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => {
                self.forget(id).await;
                bail!("server went away before answering {method}");
            }
            Err(_) => {
                self.forget(id).await;
                bail!("{method} timed out after {}s", timeout.as_secs());
            }
        }
    }

    async fn forget(&self, id: u64) {
        if let Some(pending) = self.pending.lock().await.as_mut() {
            pending.remove(&id);
        }
    }

    async fn send_notification(
        &self,
        method: &'static str,
        params: Option<serde_json::Value>,
    ) -> Result<()> {
        let frame = serde_json::to_value(Notification::new(method, params))
            .context("serializing notification")?;
        self.writer_tx
            .send(WriterCommand::Send(frame))
            .await
            .map_err(|_| anyhow::anyhow!("writer channel closed"))?;
        Ok(())
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    #[must_use]
    pub fn log_path(&self) -> Option<&Path> {
        self.log_path.as_deref()
    }

    /// Best effort: `shutdown`, `exit`, then kill if the process lingers.
    ///
    /// The reader keeps running until the process is gone so the `shutdown`
    /// reply is routed; it emits no `Stopped` event for a deliberate stop.
    pub async fn shutdown(mut self) {
        self.stopping.store(true, Ordering::Release);
        if let Ok(response) = self.send_request("shutdown", None, SHUTDOWN_TIMEOUT).await
            && response.get("error").is_none()
        {
            let _ = self.send_notification("exit", None).await;
        }
        let _ = self.writer_tx.send(WriterCommand::Shutdown).await;

        if tokio::time::timeout(SHUTDOWN_TIMEOUT, self.child.wait())
            .await
            .is_err()
        {
            tracing::debug!(generation = self.generation, "Server didn't exit in time, killing");
            let _ = self.child.kill().await;
        }
        self.reader_handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ServerNotification;
    use warden_toolchain::Environment;

    fn channels() -> (
        PendingMap,
        mpsc::Sender<SessionEvent>,
        mpsc::Receiver<SessionEvent>,
        mpsc::Sender<WriterCommand>,
        mpsc::Receiver<WriterCommand>,
    ) {
        let (event_tx, event_rx) = mpsc::channel(16);
        let (writer_tx, writer_rx) = mpsc::channel(16);
        (
            Arc::new(Mutex::new(Some(HashMap::new()))),
            event_tx,
            event_rx,
            writer_tx,
            writer_rx,
        )
    }

    #[tokio::test]
    async fn response_is_routed_to_waiting_request() {
        let (pending, event_tx, _event_rx, writer_tx, _writer_rx) = channels();
        let (tx, rx) = oneshot::channel();
        pending.lock().await.as_mut().unwrap().insert(1, tx);

        let frame = serde_json::json!({"jsonrpc": "2.0", "id": 1, "result": {"capabilities": {}}});
        RunningServer::dispatch_frame(&frame, 1, &pending, &event_tx, &writer_tx).await;

        assert!(rx.await.unwrap()["result"]["capabilities"].is_object());
        assert!(pending.lock().await.as_ref().unwrap().is_empty());
    }

    #[tokio::test]
    async fn server_request_gets_method_not_found() {
        let (pending, event_tx, mut event_rx, writer_tx, mut writer_rx) = channels();
        let frame = serde_json::json!({
            "jsonrpc": "2.0", "id": 3, "method": "workspace/configuration", "params": {}
        });
        RunningServer::dispatch_frame(&frame, 1, &pending, &event_tx, &writer_tx).await;

        let Ok(WriterCommand::Send(reply)) = writer_rx.try_recv() else {
            panic!("expected a reply");
        };
        assert_eq!(reply["id"], 3);
        assert_eq!(reply["error"]["code"], -32601);
        assert!(event_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn notifications_are_tagged_with_generation() {
        let (pending, event_tx, mut event_rx, writer_tx, _writer_rx) = channels();
        let frame = serde_json::json!({"jsonrpc": "2.0", "method": "rustDocument/beginBuild"});
        RunningServer::dispatch_frame(&frame, 7, &pending, &event_tx, &writer_tx).await;

        assert_eq!(
            event_rx.try_recv().unwrap(),
            SessionEvent {
                generation: 7,
                event: ServerEvent::Notification(ServerNotification::BeginBuild),
            }
        );
    }

    #[tokio::test]
    async fn response_for_unknown_id_is_dropped() {
        let (pending, event_tx, mut event_rx, writer_tx, mut writer_rx) = channels();
        let frame = serde_json::json!({"jsonrpc": "2.0", "id": 99, "result": null});
        RunningServer::dispatch_frame(&frame, 1, &pending, &event_tx, &writer_tx).await;
        assert!(event_rx.try_recv().is_err());
        assert!(writer_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn missing_program_is_not_found() {
        let (event_tx, _event_rx) = mpsc::channel(1);
        let invocation = Invocation::new("warden-no-such-server")
            .env(Environment::from_pairs([("PATH", "/nonexistent")]));
        let Err(err) = RunningServer::spawn(&invocation, 1, event_tx, None) else {
            panic!("spawn should fail");
        };
        assert!(err.is_not_found(), "{err}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn request_fails_at_once_when_server_exits() {
        let (event_tx, mut event_rx) = mpsc::channel(4);
        let invocation = Invocation::new("sh").args(["-c", "exit 1"]);
        let mut server = RunningServer::spawn(&invocation, 3, event_tx, None).unwrap();

        let err = tokio::time::timeout(Duration::from_secs(5), server.initialize(Path::new("/")))
            .await
            .expect("initialize should not wait for its timeout")
            .unwrap_err();
        assert!(format!("{err:#}").contains("went away"), "{err:#}");
        assert!(matches!(
            event_rx.recv().await,
            Some(SessionEvent {
                generation: 3,
                event: ServerEvent::Stopped(_)
            })
        ));
        server.shutdown().await;
    }

    #[tokio::test]
    async fn stderr_is_copied_verbatim_to_log_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rls1700000000000.log");
        pump_stderr(&b"error: one\r\nerror: two\n"[..], Some(path.clone())).await;
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "error: one\r\nerror: two\n"
        );
    }

    #[tokio::test]
    async fn unwritable_log_does_not_panic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing-dir").join("rls.log");
        pump_stderr(&b"noise\n"[..], Some(path.clone())).await;
        assert!(!path.exists());
    }
}
