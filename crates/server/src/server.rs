//! The agent server: accept loop, one task per connection, graceful shutdown.

use crate::handler::RequestHandler;
use crate::protocol::{LegacyResponse, LineError, Request, StreamRecord, read_line, write_line};
use kiln_agent::ConversationEngine;
use kiln_config::ServerConfig;
use kiln_core::{Error, Result};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};

/// Buffered increments per streaming request.
const INCREMENT_BUFFER: usize = 64;

/// Time cancelled connections get to write their `error` record before
/// being aborted.
const CANCEL_FLUSH: Duration = Duration::from_secs(1);

/// Server settings.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub socket_path: PathBuf,
    /// Deadline for requests that do not set `timeout_secs`
    pub request_timeout: Duration,
    /// How long in-flight connections may continue after shutdown
    pub shutdown_grace: Duration,
    pub max_request_bytes: usize,
}

impl ServerOptions {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            request_timeout: Duration::from_secs(600),
            shutdown_grace: Duration::from_secs(5),
            max_request_bytes: 4 * 1024 * 1024,
        }
    }

    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            socket_path: config.socket_path.clone(),
            request_timeout: Duration::from_secs(config.request_timeout_secs),
            shutdown_grace: Duration::from_secs(config.shutdown_grace_secs),
            max_request_bytes: config.max_request_bytes,
        }
    }
}

/// Removes the socket file when dropped.
struct SocketGuard(PathBuf);

impl Drop for SocketGuard {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.0) {
            Ok(()) => debug!(socket = %self.0.display(), "Socket removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(socket = %self.0.display(), error = %e, "Failed to remove socket"),
        }
    }
}

/// Bind `path` so that it is never reachable with a mode wider than 0600.
///
/// The socket is created inside a fresh 0700 directory next to `path`,
/// narrowed to 0600, then renamed into place. The rename keeps the bound
/// listener.
async fn bind_private(path: &Path) -> std::io::Result<UnixListener> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    let staging = parent.join(format!(".{name}.{}.bind", std::process::id()));

    if tokio::fs::symlink_metadata(&staging).await.is_ok() {
        tokio::fs::remove_dir_all(&staging).await?;
    }
    tokio::fs::DirBuilder::new().mode(0o700).create(&staging).await?;

    let staged = staging.join("socket");
    let bound = async {
        let listener = UnixListener::bind(&staged)?;
        tokio::fs::set_permissions(&staged, std::fs::Permissions::from_mode(0o600)).await?;
        tokio::fs::rename(&staged, path).await?;
        Ok::<_, std::io::Error>(listener)
    }
    .await;

    if let Err(e) = tokio::fs::remove_dir_all(&staging).await {
        warn!(dir = %staging.display(), error = %e, "Failed to remove socket staging directory");
    }
    bound
}

/// A bound server, ready to [`serve`](AgentServer::serve).
pub struct AgentServer {
    listener: UnixListener,
    handler: Arc<RequestHandler>,
    options: ServerOptions,
    guard: SocketGuard,
}

impl AgentServer {
    /// Bind the socket, replacing a stale socket file. Fails if another
    /// server is already answering on the path.
    pub async fn bind(engine: Arc<ConversationEngine>, options: ServerOptions) -> Result<Self> {
        let path = &options.socket_path;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        if tokio::fs::symlink_metadata(path).await.is_ok() {
            if UnixStream::connect(path).await.is_ok() {
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::AddrInUse,
                    format!("another server is listening on {}", path.display()),
                )));
            }
            debug!(socket = %path.display(), "Removing stale socket");
            tokio::fs::remove_file(path).await?;
        }

        let listener = bind_private(path).await?;
        let guard = SocketGuard(path.clone());
        info!(socket = %path.display(), "Listening");

        Ok(Self {
            listener,
            handler: Arc::new(RequestHandler::new(engine)),
            options,
            guard,
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.options.socket_path
    }

    /// Accept connections until `shutdown` turns `true`.
    ///
    /// Then stops accepting, lets in-flight connections run for the grace
    /// period, cancels what is left, and removes the socket file.
    pub async fn serve(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let Self {
            listener,
            handler,
            options,
            guard,
        } = self;
        let limits = ConnectionLimits {
            request_timeout: options.request_timeout,
            max_request_bytes: options.max_request_bytes,
        };
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        let handler = handler.clone();
                        let cancel = cancel_rx.clone();
                        connections.spawn(async move {
                            if let Err(e) = handle_connection(stream, &handler, limits, cancel).await {
                                debug!(error = %e, "Connection closed with I/O error");
                            }
                        });
                        debug!(active = connections.len(), "Connection accepted");
                    }
                    Err(e) => {
                        warn!(error = %e, "Accept failed");
                        tokio::time::sleep(Duration::from_millis(50)).await;
                    }
                },
                Some(joined) = connections.join_next() => log_join(joined),
                _ = signalled(&mut shutdown) => break,
            }
        }

        drop(listener);
        info!(in_flight = connections.len(), "Shutting down");

        if tokio::time::timeout(options.shutdown_grace, drain(&mut connections))
            .await
            .is_err()
        {
            warn!(remaining = connections.len(), "Grace period elapsed, cancelling requests");
            let _ = cancel_tx.send(true);
            if tokio::time::timeout(CANCEL_FLUSH, drain(&mut connections))
                .await
                .is_err()
            {
                connections.abort_all();
                drain(&mut connections).await;
            }
        }

        drop(guard);
        info!("Server stopped");
        Ok(())
    }
}

/// Resolves once the flag turns `true`. A dropped sender never fires.
async fn signalled(rx: &mut watch::Receiver<bool>) {
    let closed = rx.wait_for(|set| *set).await.is_err();
    if closed {
        std::future::pending::<()>().await;
    }
}

async fn drain(connections: &mut JoinSet<()>) {
    while let Some(joined) = connections.join_next().await {
        log_join(joined);
    }
}

fn log_join(joined: std::result::Result<(), JoinError>) {
    match joined {
        Ok(()) => {}
        Err(e) if e.is_panic() => error!(error = %e, "Connection task panicked"),
        Err(_) => debug!("Connection task aborted"),
    }
}

#[derive(Debug, Clone, Copy)]
struct ConnectionLimits {
    request_timeout: Duration,
    max_request_bytes: usize,
}

/// Serve one request on one connection.
async fn handle_connection(
    stream: UnixStream,
    handler: &RequestHandler,
    limits: ConnectionLimits,
    mut cancel: watch::Receiver<bool>,
) -> std::io::Result<()> {
    let (read, mut write) = stream.into_split();
    let mut reader = BufReader::new(read);

    let line = tokio::select! {
        read = read_line(&mut reader, limits.max_request_bytes) => read,
        _ = tokio::time::sleep(limits.request_timeout) => {
            debug!("No request before the deadline");
            return Ok(());
        }
        _ = signalled(&mut cancel) => return Ok(()),
    };
    let line = match line {
        Ok(Some(line)) => line,
        Ok(None) => return Ok(()),
        Err(LineError::Io(e)) => return Err(e),
        Err(e) => return reject(&mut write, e.to_string()).await,
    };
    let request: Request = match serde_json::from_str(line.trim()) {
        Ok(request) => request,
        Err(e) => return reject(&mut write, format!("malformed request: {e}")).await,
    };

    let deadline = match request.timeout_secs {
        Some(secs) if secs > 0 => Duration::from_secs(secs),
        _ => limits.request_timeout,
    };
    let started = Instant::now();
    let sent = if request.stream {
        respond_streaming(&mut write, handler, &request, deadline, &mut cancel).await
    } else {
        respond_legacy(&mut write, handler, &request, deadline, &mut cancel).await
    };
    debug!(kind = %request.kind, elapsed_ms = started.elapsed().as_millis() as u64, "Request finished");
    sent?;
    write.shutdown().await
}

async fn reject(write: &mut OwnedWriteHalf, reason: String) -> std::io::Result<()> {
    warn!(reason = %reason, "Rejecting request");
    let record = StreamRecord::Error {
        error: Error::Protocol(reason).to_string(),
    };
    write_line(write, &record).await?;
    write.shutdown().await
}

fn timed_out(deadline: Duration) -> Error {
    Error::Cancelled(format!("request timed out after {}s", deadline.as_secs()))
}

fn shutting_down() -> Error {
    Error::Cancelled("server is shutting down".into())
}

/// Stream `chunk` records while the request runs, then `done` or `error`.
///
/// Leaving early (deadline, cancellation, or a write failure) drops the
/// request future, which releases store locks and the provider stream.
async fn respond_streaming(
    write: &mut OwnedWriteHalf,
    handler: &RequestHandler,
    request: &Request,
    deadline: Duration,
    cancel: &mut watch::Receiver<bool>,
) -> std::io::Result<()> {
    let (tx, mut rx) = mpsc::channel::<String>(INCREMENT_BUFFER);
    let increments = request.kind.is_conversational().then_some(&tx);

    let outcome = {
        let work = handler.dispatch(request, increments);
        tokio::pin!(work);
        let expiry = tokio::time::sleep(deadline);
        tokio::pin!(expiry);

        loop {
            tokio::select! {
                biased;
                Some(content) = rx.recv() => {
                    write_line(write, &StreamRecord::Chunk { content }).await?;
                }
                result = &mut work => break result,
                _ = &mut expiry => break Err(timed_out(deadline)),
                _ = signalled(cancel) => break Err(shutting_down()),
            }
        }
    };

    drop(tx);
    while let Some(content) = rx.recv().await {
        write_line(write, &StreamRecord::Chunk { content }).await?;
    }

    let record = match outcome {
        Ok(content) => StreamRecord::Done { content },
        Err(e) => {
            warn!(kind = %request.kind, error = %e, "Request failed");
            StreamRecord::Error { error: e.to_string() }
        }
    };
    write_line(write, &record).await
}

/// Run the request to completion and send one legacy record.
async fn respond_legacy(
    write: &mut OwnedWriteHalf,
    handler: &RequestHandler,
    request: &Request,
    deadline: Duration,
    cancel: &mut watch::Receiver<bool>,
) -> std::io::Result<()> {
    let outcome = tokio::select! {
        result = tokio::time::timeout(deadline, handler.dispatch(request, None)) => {
            result.unwrap_or_else(|_| Err(timed_out(deadline)))
        }
        _ = signalled(cancel) => Err(shutting_down()),
    };
    if let Err(e) = &outcome {
        warn!(kind = %request.kind, error = %e, "Request failed");
    }
    let response = LegacyResponse::from_result(&outcome.map_err(|e| e.to_string()));
    write_line(write, &response).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{Client, ClientError};
    use crate::protocol::RequestKind;
    use crate::test_helpers::{EchoProvider, StallingProvider, letter_store};
    use kiln_core::{Permission, Provider, ToolRegistry};
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt};

    struct Running {
        _dir: tempfile::TempDir,
        socket: PathBuf,
        stop: watch::Sender<bool>,
        task: tokio::task::JoinHandle<Result<()>>,
    }

    async fn start_with(provider: Arc<dyn Provider>, tweak: impl FnOnce(&mut ServerOptions)) -> Running {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("kiln.sock");
        let engine = ConversationEngine::new(
            provider,
            Arc::new(letter_store()),
            Arc::new(ToolRegistry::new(Permission::READ)),
            "test",
        );
        let mut options = ServerOptions::new(&socket);
        tweak(&mut options);
        let server = AgentServer::bind(Arc::new(engine), options).await.unwrap();
        let (stop, stop_rx) = watch::channel(false);
        let task = tokio::spawn(server.serve(stop_rx));
        Running {
            _dir: dir,
            socket,
            stop,
            task,
        }
    }

    async fn start() -> Running {
        start_with(Arc::new(EchoProvider), |_| {}).await
    }

    async fn raw_exchange(socket: &Path, line: &[u8]) -> Vec<String> {
        let mut stream = UnixStream::connect(socket).await.unwrap();
        stream.write_all(line).await.unwrap();
        let mut lines = BufReader::new(stream).lines();
        let mut out = Vec::new();
        // A rejected oversized request may end in a reset after the reply.
        while let Ok(Some(line)) = lines.next_line().await {
            out.push(line);
        }
        out
    }

    #[tokio::test]
    async fn socket_is_private() {
        let running = start().await;
        let mode = std::fs::metadata(&running.socket).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[tokio::test]
    async fn bind_leaves_only_the_private_socket() {
        let running = start().await;
        let dir = running.socket.parent().unwrap();
        let entries: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(entries, vec![running.socket.file_name().unwrap().to_string_lossy().into_owned()]);

        let mode = std::fs::metadata(&running.socket).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        let reply = raw_exchange(&running.socket, b"{\"type\":\"stats\"}\n").await;
        assert_eq!(reply.len(), 1);
    }

    #[tokio::test]
    async fn chat_streams_chunks_then_done() {
        let running = start().await;
        let client = Client::new(&running.socket);

        let mut chunks = Vec::new();
        let answer = client
            .stream(&Request::new(RequestKind::Chat, "hello there"), |c| chunks.push(c.to_string()))
            .await
            .unwrap();

        assert_eq!(answer, "echo: hello there");
        assert!(chunks.len() >= 2);
        assert_eq!(chunks.concat(), "echo: hello there");
    }

    #[tokio::test]
    async fn non_conversational_kinds_send_one_done() {
        let running = start().await;
        let lines = raw_exchange(&running.socket, b"{\"type\":\"stats\"}\n").await;
        assert_eq!(
            lines,
            vec![r#"{"type":"done","content":"Knowledge base contains 0 documents"}"#]
        );
    }

    #[tokio::test]
    async fn legacy_reply() {
        let running = start().await;
        let client = Client::new(&running.socket);

        let ok = client
            .request(&Request::new(RequestKind::Add, "a note").legacy())
            .await
            .unwrap();
        assert!(ok.success);
        assert_eq!(ok.content, "Added to knowledge base");

        let failed = client
            .request(&Request::new(RequestKind::Unknown("dance".into()), "").legacy())
            .await
            .unwrap();
        assert!(!failed.success);
        assert!(failed.error.unwrap().contains("unknown request type: dance"));
    }

    #[tokio::test]
    async fn unknown_kind_errors_and_closes() {
        let running = start().await;
        let lines = raw_exchange(&running.socket, b"{\"type\":\"dance\"}\n").await;
        assert_eq!(lines.len(), 1);
        let record: StreamRecord = serde_json::from_str(&lines[0]).unwrap();
        assert!(matches!(record, StreamRecord::Error { ref error } if error.contains("dance")));
    }

    #[tokio::test]
    async fn malformed_and_oversized_requests_are_rejected() {
        let running = start_with(Arc::new(EchoProvider), |o| o.max_request_bytes = 64).await;

        let lines = raw_exchange(&running.socket, b"not json\n").await;
        assert!(lines[0].contains("malformed request"));

        let big = format!("{{\"type\":\"add\",\"content\":\"{}\"}}\n", "x".repeat(200));
        let lines = raw_exchange(&running.socket, big.as_bytes()).await;
        assert!(lines[0].contains("exceeds 64 bytes"));

        // The server keeps serving after bad clients.
        let stats = Client::new(&running.socket)
            .stream(&Request::new(RequestKind::Stats, ""), |_| {})
            .await
            .unwrap();
        assert_eq!(stats, "Knowledge base contains 0 documents");
    }

    #[tokio::test]
    async fn concurrent_adds_all_land() {
        let running = start().await;
        let mut tasks = JoinSet::new();
        for i in 0..10 {
            let client = Client::new(&running.socket);
            tasks.spawn(async move {
                client
                    .stream(&Request::new(RequestKind::Add, format!("note number {i}")), |_| {})
                    .await
            });
        }
        while let Some(joined) = tasks.join_next().await {
            assert_eq!(joined.unwrap().unwrap(), "Added to knowledge base");
        }

        let stats = Client::new(&running.socket)
            .stream(&Request::new(RequestKind::Stats, ""), |_| {})
            .await
            .unwrap();
        assert_eq!(stats, "Knowledge base contains 10 documents");
    }

    #[tokio::test]
    async fn request_deadline_produces_error_record() {
        let running = start_with(Arc::new(StallingProvider), |_| {}).await;
        let client = Client::new(&running.socket);

        let mut chunks = Vec::new();
        let err = client
            .stream(
                &Request::new(RequestKind::Chat, "hang").with_timeout_secs(1),
                |c| chunks.push(c.to_string()),
            )
            .await
            .unwrap_err();

        assert_eq!(chunks, vec!["thinking"]);
        assert!(matches!(err, ClientError::Server(ref msg) if msg.contains("timed out")));

        // Store is still usable afterwards.
        let stats = client.stream(&Request::new(RequestKind::Stats, ""), |_| {}).await.unwrap();
        assert_eq!(stats, "Knowledge base contains 0 documents");
    }

    #[tokio::test]
    async fn shutdown_removes_socket() {
        let running = start().await;
        assert!(running.socket.exists());
        running.stop.send(true).unwrap();
        running.task.await.unwrap().unwrap();
        assert!(!running.socket.exists());
    }

    #[tokio::test]
    async fn shutdown_cancels_stuck_requests_after_grace() {
        let running = start_with(Arc::new(StallingProvider), |o| {
            o.shutdown_grace = Duration::from_millis(200);
        })
        .await;
        let client = Client::new(&running.socket);
        let pending = tokio::spawn(async move {
            client
                .stream(&Request::new(RequestKind::Chat, "hang"), |_| {})
                .await
        });
        tokio::time::sleep(Duration::from_millis(100)).await;

        running.stop.send(true).unwrap();
        running.task.await.unwrap().unwrap();

        let err = pending.await.unwrap().unwrap_err();
        assert!(matches!(err, ClientError::Server(ref msg) if msg.contains("shutting down")));
        assert!(!running.socket.exists());
    }

    #[tokio::test]
    async fn stale_socket_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("stale.sock");
        drop(std::os::unix::net::UnixListener::bind(&socket).unwrap());
        assert!(socket.exists());

        let engine = ConversationEngine::new(
            Arc::new(EchoProvider),
            Arc::new(letter_store()),
            Arc::new(ToolRegistry::new(Permission::NONE)),
            "test",
        );
        let server = AgentServer::bind(Arc::new(engine), ServerOptions::new(&socket)).await.unwrap();
        assert_eq!(server.socket_path(), socket.as_path());
    }

    #[tokio::test]
    async fn live_socket_is_not_stolen() {
        let running = start().await;
        let engine = ConversationEngine::new(
            Arc::new(EchoProvider),
            Arc::new(letter_store()),
            Arc::new(ToolRegistry::new(Permission::NONE)),
            "test",
        );
        let result = AgentServer::bind(Arc::new(engine), ServerOptions::new(&running.socket)).await;
        assert!(matches!(result, Err(Error::Io(ref e)) if e.kind() == std::io::ErrorKind::AddrInUse));
    }
}
