//! `Content-Length` framing for JSON-RPC over the server's stdio.

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// Upper bound on a single message body.
const MAX_FRAME_BYTES: usize = 8 * 1024 * 1024;

const CONTENT_LENGTH: &str = "Content-Length";

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("stream closed in the middle of a frame header")]
    TruncatedHeader,
    #[error("frame header has no Content-Length")]
    MissingLength,
    #[error("invalid Content-Length `{0}`")]
    InvalidLength(String),
    #[error("frame of {0} bytes is larger than the {MAX_FRAME_BYTES} byte limit")]
    TooLarge(usize),
    #[error("frame body is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("i/o error on server stream: {0}")]
    Io(#[from] std::io::Error),
}

/// Parse one header line; returns the length if it is a `Content-Length`.
fn content_length(line: &str) -> Result<Option<usize>, FrameError> {
    let Some((key, value)) = line.split_once(':') else {
        return Ok(None);
    };
    if !key.trim().eq_ignore_ascii_case(CONTENT_LENGTH) {
        return Ok(None);
    }
    let value = value.trim();
    value
        .parse()
        .map(Some)
        .map_err(|_| FrameError::InvalidLength(value.to_string()))
}

pub struct FrameReader<R> {
    inner: BufReader<R>,
    line: String,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            inner: BufReader::new(reader),
            line: String::new(),
        }
    }

    /// Next message, or `None` when the stream ends between frames.
    pub async fn recv(&mut self) -> Result<Option<serde_json::Value>, FrameError> {
        let Some(len) = self.header().await? else {
            return Ok(None);
        };
        if len > MAX_FRAME_BYTES {
            return Err(FrameError::TooLarge(len));
        }
        let mut body = vec![0u8; len];
        self.inner.read_exact(&mut body).await?;
        Ok(Some(serde_json::from_slice(&body)?))
    }

    async fn header(&mut self) -> Result<Option<usize>, FrameError> {
        let mut len = None;
        let mut started = false;
        loop {
            self.line.clear();
            if self.inner.read_line(&mut self.line).await? == 0 {
                return if started {
                    Err(FrameError::TruncatedHeader)
                } else {
                    Ok(None)
                };
            }
            started = true;
            let line = self.line.trim_end_matches(['\r', '\n']);
            if line.is_empty() {
                return len.map(Some).ok_or(FrameError::MissingLength);
            }
            if let Some(n) = content_length(line)? {
                len = Some(n);
            }
        }
    }
}

pub struct FrameWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { inner: writer }
    }

    pub async fn send(&mut self, message: &serde_json::Value) -> Result<(), FrameError> {
        let body = serde_json::to_vec(message)?;
        let header = format!("{CONTENT_LENGTH}: {}\r\n\r\n", body.len());
        self.inner.write_all(header.as_bytes()).await?;
        self.inner.write_all(&body).await?;
        self.inner.flush().await?;
        Ok(())
    }
}
