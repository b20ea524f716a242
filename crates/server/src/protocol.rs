//! Wire format: one JSON object per line.
//!
//! A client sends a single [`Request`] line. The server answers with
//! [`StreamRecord`]s (`chunk`… then `done`, or a single `error`), or with
//! one [`LegacyResponse`] when the request set `"stream": false`.

use kiln_core::Message;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// What the client wants done.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RequestKind {
    /// Plain question answering, no tools
    Chat,
    /// Tool-enabled loop (`edit` or `tool-chat` on the wire)
    Edit,
    Add,
    Index,
    Stats,
    Clear,
    Sources,
    Unknown(String),
}

impl RequestKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Chat => "chat",
            Self::Edit => "edit",
            Self::Add => "add",
            Self::Index => "index",
            Self::Stats => "stats",
            Self::Clear => "clear",
            Self::Sources => "sources",
            Self::Unknown(other) => other,
        }
    }

    /// Kinds whose answer comes from the model and is streamed.
    pub fn is_conversational(&self) -> bool {
        matches!(self, Self::Chat | Self::Edit)
    }
}

impl From<String> for RequestKind {
    fn from(s: String) -> Self {
        match s.as_str() {
            "chat" => Self::Chat,
            "edit" | "tool-chat" => Self::Edit,
            "add" => Self::Add,
            "index" => Self::Index,
            "stats" => Self::Stats,
            "clear" => Self::Clear,
            "sources" => Self::Sources,
            _ => Self::Unknown(s),
        }
    }
}

impl From<RequestKind> for String {
    fn from(kind: RequestKind) -> Self {
        kind.as_str().to_string()
    }
}

impl std::fmt::Display for RequestKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A client request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    #[serde(rename = "type")]
    pub kind: RequestKind,

    #[serde(default)]
    pub content: String,

    /// Client working directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pwd: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<Message>,

    /// Overrides the server's default request timeout
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,

    /// `false` selects the single-record legacy reply
    #[serde(default = "default_stream")]
    pub stream: bool,
}

fn default_stream() -> bool {
    true
}

impl Request {
    pub fn new(kind: RequestKind, content: impl Into<String>) -> Self {
        Self {
            kind,
            content: content.into(),
            pwd: None,
            history: Vec::new(),
            timeout_secs: None,
            stream: true,
        }
    }

    pub fn with_pwd(mut self, pwd: impl Into<String>) -> Self {
        self.pwd = Some(pwd.into());
        self
    }

    pub fn with_history(mut self, history: Vec<Message>) -> Self {
        self.history = history;
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    pub fn legacy(mut self) -> Self {
        self.stream = false;
        self
    }
}

/// One record of a streamed reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamRecord {
    /// A text increment from the model
    Chunk { content: String },
    /// The final answer; always the last record
    Done { content: String },
    /// The request failed; always the last record
    Error { error: String },
}

impl StreamRecord {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Chunk { .. })
    }
}

/// Single-record reply for `"stream": false` requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyResponse {
    pub success: bool,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl LegacyResponse {
    pub fn from_result(result: &Result<String, String>) -> Self {
        match result {
            Ok(content) => Self {
                success: true,
                content: content.clone(),
                error: None,
            },
            Err(error) => Self {
                success: false,
                content: String::new(),
                error: Some(error.clone()),
            },
        }
    }
}

/// Failure while reading one protocol line.
#[derive(Debug, thiserror::Error)]
pub enum LineError {
    #[error("request exceeds {limit} bytes")]
    TooLarge { limit: usize },

    #[error("request is not valid UTF-8")]
    InvalidUtf8,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Read one newline-terminated line of at most `limit` bytes.
///
/// Returns `None` on a clean EOF before any byte. A final line without a
/// trailing newline is accepted.
pub async fn read_line<R>(reader: &mut R, limit: usize) -> Result<Option<String>, LineError>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    let read = reader
        .take(limit as u64 + 1)
        .read_until(b'\n', &mut buf)
        .await?;
    if read == 0 {
        return Ok(None);
    }
    if buf.last() == Some(&b'\n') {
        buf.pop();
    } else if buf.len() > limit {
        return Err(LineError::TooLarge { limit });
    }
    String::from_utf8(buf)
        .map(Some)
        .map_err(|_| LineError::InvalidUtf8)
}

/// Write `value` as one JSON line and flush.
pub async fn write_line<W, T>(writer: &mut W, value: &T) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut json = serde_json::to_vec(value)?;
    json.push(b'\n');
    writer.write_all(&json).await?;
    writer.flush().await
}
