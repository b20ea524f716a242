//! Socket client used by the CLI.

use crate::protocol::{LegacyResponse, LineError, Request, StreamRecord, read_line, write_line};
use std::path::{Path, PathBuf};
use tokio::io::BufReader;
use tokio::net::UnixStream;

/// Longest reply line accepted from the server.
const MAX_REPLY_BYTES: usize = 64 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Cannot connect to {path}: {source} (is `kiln serve` running?)")]
    Connect {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Connection error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed reply: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Reply error: {0}")]
    Line(#[from] LineError),

    /// The server answered with an `error` record.
    #[error("{0}")]
    Server(String),

    #[error("Server closed the connection before the final record")]
    Closed,
}

/// Sends one request per connection to a running server.
#[derive(Debug, Clone)]
pub struct Client {
    socket_path: PathBuf,
}

impl Client {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    async fn send(&self, request: &Request) -> Result<BufReader<tokio::net::unix::OwnedReadHalf>, ClientError> {
        let stream = UnixStream::connect(&self.socket_path)
            .await
            .map_err(|source| ClientError::Connect {
                path: self.socket_path.display().to_string(),
                source,
            })?;
        let (read, mut write) = stream.into_split();
        write_line(&mut write, request).await?;
        Ok(BufReader::new(read))
    }

    /// Send a streaming request, calling `on_chunk` for every increment.
    /// Returns the content of the final `done` record.
    pub async fn stream(
        &self,
        request: &Request,
        mut on_chunk: impl FnMut(&str),
    ) -> Result<String, ClientError> {
        let mut request = request.clone();
        request.stream = true;
        let mut reader = self.send(&request).await?;

        loop {
            let Some(line) = read_line(&mut reader, MAX_REPLY_BYTES).await? else {
                return Err(ClientError::Closed);
            };
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<StreamRecord>(&line)? {
                StreamRecord::Chunk { content } => on_chunk(&content),
                StreamRecord::Done { content } => return Ok(content),
                StreamRecord::Error { error } => return Err(ClientError::Server(error)),
            }
        }
    }

    /// Send a request expecting the single-record legacy reply.
    pub async fn request(&self, request: &Request) -> Result<LegacyResponse, ClientError> {
        let mut request = request.clone();
        request.stream = false;
        let mut reader = self.send(&request).await?;
        let line = read_line(&mut reader, MAX_REPLY_BYTES)
            .await?
            .ok_or(ClientError::Closed)?;
        Ok(serde_json::from_str(&line)?)
    }
}
