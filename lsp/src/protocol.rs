//! JSON-RPC message shapes exchanged with the analysis server.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// JSON-RPC "method not found".
pub(crate) const METHOD_NOT_FOUND: i64 = -32601;

#[derive(Debug, thiserror::Error)]
#[error("cannot convert path to file URI: {}", path.display())]
pub(crate) struct PathToUriError {
    path: PathBuf,
}

#[derive(Debug, Serialize)]
pub(crate) struct Request {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl Request {
    pub fn new(id: u64, method: &'static str, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method,
            params,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct Notification {
    pub jsonrpc: &'static str,
    pub method: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl Notification {
    pub fn new(method: &'static str, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            method,
            params,
        }
    }
}

/// Reply to a server → client request this client does not implement.
pub(crate) fn method_not_found(id: &serde_json::Value, method: &str) -> serde_json::Value {
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {
            "code": METHOD_NOT_FOUND,
            "message": format!("Method not found: {method}"),
        }
    })
}

pub(crate) fn initialize_params(root_uri: &str) -> serde_json::Value {
    serde_json::json!({
        "processId": std::process::id(),
        "rootUri": root_uri,
        "capabilities": {
            "window": { "progress": true }
        },
        "initializationOptions": {
            "omitInitBuild": true,
            "cmdRun": true
        },
        "workspaceFolders": [{
            "uri": root_uri,
            "name": "workspace"
        }]
    })
}

/// One frame read from the server, classified.
#[derive(Debug)]
pub(crate) enum Incoming {
    Response {
        id: u64,
        body: serde_json::Value,
    },
    Request {
        id: serde_json::Value,
        method: String,
    },
    Notification(ServerNotification),
}

impl Incoming {
    pub fn parse(frame: &serde_json::Value) -> Option<Self> {
        let id = frame.get("id");
        let method = frame.get("method").and_then(serde_json::Value::as_str);
        let is_reply = frame.get("result").is_some() || frame.get("error").is_some();

        match (id, method) {
            (Some(id), None) if is_reply => Some(Self::Response {
                id: id.as_u64()?,
                body: frame.clone(),
            }),
            (Some(id), Some(method)) => Some(Self::Request {
                id: id.clone(),
                method: method.to_string(),
            }),
            (None, Some(method)) => Some(Self::Notification(ServerNotification::parse(
                method,
                frame.get("params"),
            ))),
            _ => None,
        }
    }
}

/// `window/progress` parameters.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ProgressParams {
    pub id: ProgressId,
    #[serde(default)]
    pub done: Option<bool>,
    /// Fraction of completion in `0.0..=1.0`.
    #[serde(default)]
    pub percentage: Option<f64>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

/// Servers use both strings and numbers as progress ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(untagged)]
pub enum ProgressId {
    Number(i64),
    String(String),
}

impl fmt::Display for ProgressId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => f.write_str(s),
        }
    }
}

/// Notifications the session reacts to.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerNotification {
    Progress(ProgressParams),
    /// `rustDocument/beginBuild`
    BeginBuild,
    /// `rustDocument/diagnosticsEnd`
    DiagnosticsEnd,
    /// `window/showMessage`
    ShowMessage { kind: u8, message: String },
    Other(String),
}

impl ServerNotification {
    pub(crate) fn parse(method: &str, params: Option<&serde_json::Value>) -> Self {
        match method {
            "window/progress" => match params.cloned().map(serde_json::from_value) {
                Some(Ok(progress)) => Self::Progress(progress),
                Some(Err(e)) => {
                    tracing::debug!("Malformed window/progress params: {e}");
                    Self::Other(method.to_string())
                }
                None => Self::Other(method.to_string()),
            },
            "rustDocument/beginBuild" => Self::BeginBuild,
            "rustDocument/diagnosticsEnd" => Self::DiagnosticsEnd,
            "window/showMessage" => {
                let kind = params
                    .and_then(|p| p.get("type"))
                    .and_then(serde_json::Value::as_u64)
                    .unwrap_or(3);
                let message = params
                    .and_then(|p| p.get("message"))
                    .and_then(serde_json::Value::as_str)
                    .unwrap_or_default();
                Self::ShowMessage {
                    kind: u8::try_from(kind).unwrap_or(3),
                    message: message.to_string(),
                }
            }
            other => Self::Other(other.to_string()),
        }
    }
}

pub(crate) fn path_to_file_uri(path: &Path) -> Result<url::Url, PathToUriError> {
    url::Url::from_file_path(path).map_err(|()| PathToUriError {
        path: path.to_path_buf(),
    })
}
