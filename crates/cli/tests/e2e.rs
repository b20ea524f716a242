//! End-to-end tests for the Kiln agent runtime.
//!
//! These run a real server on a temporary socket, with scripted model and
//! embedding collaborators, and talk to it through the real client.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use kiln_agent::ConversationEngine;
use kiln_core::provider::ChunkReceiver;
use kiln_core::{
    Embedder, KnowledgeError, Message, Permission, Provider, ProviderError, ProviderRequest,
    ProviderResponse, Role, StreamChunk,
};
use kiln_knowledge::{KnowledgeStore, StoreOptions, source_metadata};
use kiln_server::{AgentServer, Client, ClientError, Request, RequestKind, ServerOptions, StreamRecord};
use kiln_tools::{Sandbox, default_registry};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::sync::watch;

// ── Scripted collaborators ───────────────────────────────────────────────

/// Replays canned outputs in order, streamed word by word.
struct ScriptedProvider {
    outputs: Vec<String>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    fn new(outputs: &[&str]) -> Self {
        Self {
            outputs: outputs.iter().map(|s| s.to_string()).collect(),
            requests: Mutex::new(Vec::new()),
        }
    }

    fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn next(&self, request: ProviderRequest) -> String {
        let mut requests = self.requests.lock().unwrap();
        let index = requests.len();
        requests.push(request);
        self.outputs
            .get(index)
            .cloned()
            .unwrap_or_else(|| panic!("ScriptedProvider exhausted: call #{index}"))
    }
}

#[async_trait::async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "e2e_mock"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        Ok(ProviderResponse {
            message: Message::assistant(self.next(request)),
            usage: None,
            model: "mock".into(),
        })
    }

    async fn stream(&self, request: ProviderRequest) -> Result<ChunkReceiver, ProviderError> {
        let output = self.next(request);
        let pieces: Vec<String> = output.split_inclusive(' ').map(String::from).collect();
        let (tx, rx) = tokio::sync::mpsc::channel(pieces.len() + 1);
        for piece in pieces {
            let _ = tx
                .send(Ok(StreamChunk {
                    content: Some(piece),
                    ..Default::default()
                }))
                .await;
        }
        let _ = tx
            .send(Ok(StreamChunk {
                done: true,
                ..Default::default()
            }))
            .await;
        Ok(rx)
    }
}

/// 26-dimensional letter histogram.
struct LetterEmbedder;

#[async_trait::async_trait]
impl Embedder for LetterEmbedder {
    fn name(&self) -> &str {
        "letters"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let mut v = vec![0.0; 26];
        for b in text.bytes().filter(u8::is_ascii_alphabetic) {
            v[(b.to_ascii_lowercase() - b'a') as usize] += 1.0;
        }
        Ok(v)
    }
}

// ── Harness ──────────────────────────────────────────────────────────────

struct Harness {
    dir: tempfile::TempDir,
    socket: PathBuf,
    store: Arc<KnowledgeStore>,
    stop: watch::Sender<bool>,
    server: tokio::task::JoinHandle<kiln_core::Result<()>>,
}

impl Harness {
    async fn start(provider: Arc<dyn Provider>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("kiln.sock");
        let store = Arc::new(
            KnowledgeStore::open(
                Arc::new(LetterEmbedder),
                StoreOptions {
                    chunk_size: 100,
                    chunk_overlap: 20,
                    path: Some(dir.path().join("knowledge.jsonl")),
                    ..Default::default()
                },
            )
            .unwrap(),
        );
        let tools = Arc::new(default_registry(Permission::READ, Sandbox::default()));
        let engine = ConversationEngine::new(provider, store.clone(), tools, "mock");

        let server = AgentServer::bind(Arc::new(engine), ServerOptions::new(&socket))
            .await
            .unwrap();
        let (stop, stop_rx) = watch::channel(false);
        let server = tokio::spawn(server.serve(stop_rx));

        Self {
            dir,
            socket,
            store,
            stop,
            server,
        }
    }

    fn client(&self) -> Client {
        Client::new(&self.socket)
    }

    fn workdir(&self) -> &Path {
        self.dir.path()
    }

    async fn shutdown(self) {
        self.stop.send(true).unwrap();
        self.server.await.unwrap().unwrap();
        assert!(!self.socket.exists(), "socket file should be removed");
    }
}

fn idle() -> Arc<ScriptedProvider> {
    Arc::new(ScriptedProvider::new(&[]))
}

// ── Scenarios ────────────────────────────────────────────────────────────

#[tokio::test]
async fn e2e_empty_store_retrieves_nothing() {
    let harness = Harness::start(idle()).await;
    let hits = harness.store.retrieve("x", 5).await.unwrap();
    assert!(hits.is_empty());
    harness.shutdown().await;
}

#[tokio::test]
async fn e2e_add_text_stores_one_document() {
    let harness = Harness::start(idle()).await;
    harness
        .store
        .add_text("hello world", source_metadata("m"))
        .await
        .unwrap();
    assert_eq!(harness.store.count().await, 1);
    assert_eq!(harness.store.sources().await, vec!["m"]);
    harness.shutdown().await;
}

#[tokio::test]
async fn e2e_stats_over_socket_reports_count() {
    let harness = Harness::start(idle()).await;
    for text in ["first note", "second note", "third note"] {
        let reply = harness
            .client()
            .stream(&Request::new(RequestKind::Add, text), |_| {})
            .await
            .unwrap();
        assert_eq!(reply, "Added to knowledge base");
    }

    // Raw exchange, to pin the exact wire record.
    let mut stream = UnixStream::connect(&harness.socket).await.unwrap();
    stream.write_all(b"{\"type\":\"stats\"}\n").await.unwrap();
    let mut lines = BufReader::new(stream).lines();
    let line = lines.next_line().await.unwrap().unwrap();
    let record: StreamRecord = serde_json::from_str(&line).unwrap();
    assert_eq!(
        record,
        StreamRecord::Done {
            content: "Knowledge base contains 3 documents".into()
        }
    );
    assert!(lines.next_line().await.unwrap().is_none());

    harness.shutdown().await;
}

#[tokio::test]
async fn e2e_tool_call_result_reaches_second_model_call() {
    let directive =
        r#"<tool_call><name>read_file</name><arguments>{"path":"notes.txt"}</arguments></tool_call>"#;
    let provider = Arc::new(ScriptedProvider::new(&[directive, "The file says abc."]));
    let harness = Harness::start(provider.clone()).await;
    std::fs::write(harness.workdir().join("notes.txt"), "abc").unwrap();

    let request = Request::new(RequestKind::Edit, "what is in notes.txt?")
        .with_pwd(harness.workdir().to_str().unwrap());
    let mut chunks = Vec::new();
    let answer = harness
        .client()
        .stream(&request, |c| chunks.push(c.to_string()))
        .await
        .unwrap();

    assert_eq!(answer, "The file says abc.");
    assert_eq!(chunks.concat(), format!("{directive}The file says abc."));

    let requests = provider.requests();
    assert_eq!(requests.len(), 2);
    let tool_message = requests[1].messages.last().unwrap();
    assert_eq!(tool_message.role, Role::Tool);
    assert!(tool_message.content.contains("abc"));
    assert!(tool_message.content.starts_with("Tool 'read_file' result:"));

    harness.shutdown().await;
}

#[tokio::test]
async fn e2e_index_missing_path_leaves_store_unchanged() {
    let harness = Harness::start(idle()).await;
    harness
        .store
        .add_text("existing knowledge", source_metadata("seed"))
        .await
        .unwrap();

    let direct = harness
        .store
        .index_directory(Path::new("/no/such/kiln/dir"))
        .await
        .unwrap_err();
    assert!(matches!(direct, KnowledgeError::NotFound(_)));

    let over_socket = harness
        .client()
        .stream(&Request::new(RequestKind::Index, "/no/such/kiln/dir"), |_| {})
        .await
        .unwrap_err();
    assert!(matches!(over_socket, ClientError::Server(ref msg) if msg.contains("Path not found")));

    assert_eq!(harness.store.count().await, 1);
    harness.shutdown().await;
}

// ── Broader flows ────────────────────────────────────────────────────────

#[tokio::test]
async fn e2e_index_then_chat_uses_context() {
    let provider = Arc::new(ScriptedProvider::new(&["Kilns fire clay."]));
    let harness = Harness::start(provider.clone()).await;
    let docs = harness.workdir().join("docs");
    std::fs::create_dir(&docs).unwrap();
    std::fs::write(docs.join("kiln.md"), "A kiln fires clay at high heat.").unwrap();
    std::fs::write(docs.join("ignored.bin"), "binary").unwrap();

    let reply = harness
        .client()
        .stream(
            &Request::new(RequestKind::Index, "docs").with_pwd(harness.workdir().to_str().unwrap()),
            |_| {},
        )
        .await
        .unwrap();
    assert!(reply.contains("1 files"));

    let answer = harness
        .client()
        .stream(&Request::new(RequestKind::Chat, "what does a kiln fire?"), |_| {})
        .await
        .unwrap();
    assert_eq!(answer, "Kilns fire clay.");

    let user = &provider.requests()[0].messages[1];
    assert!(user.content.contains("Relevant context from your knowledge base:"));
    assert!(user.content.contains("[1] A kiln fires clay at high heat."));

    harness.shutdown().await;
}

#[tokio::test]
async fn e2e_history_is_forwarded() {
    let provider = Arc::new(ScriptedProvider::new(&["Still four."]));
    let harness = Harness::start(provider.clone()).await;

    let request = Request::new(RequestKind::Chat, "and now?")
        .with_history(vec![Message::user("2+2?"), Message::assistant("Four.")]);
    harness.client().stream(&request, |_| {}).await.unwrap();

    let messages = &provider.requests()[0].messages;
    let roles: Vec<Role> = messages.iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant, Role::User]);
    assert_eq!(messages[2].content, "Four.");

    harness.shutdown().await;
}

#[tokio::test]
async fn e2e_store_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("knowledge.jsonl");
    let options = || StoreOptions {
        path: Some(path.clone()),
        ..Default::default()
    };

    let first = KnowledgeStore::open(Arc::new(LetterEmbedder), options()).unwrap();
    first.add_text("persist me", source_metadata("a")).await.unwrap();
    drop(first);

    let second = KnowledgeStore::open(Arc::new(LetterEmbedder), options()).unwrap();
    assert_eq!(second.count().await, 1);
    let report = second.add_text("and me", source_metadata("b")).await.unwrap();
    assert_eq!(report.ids, vec!["doc_1"]);
}
