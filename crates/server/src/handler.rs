//! Request dispatch: map a [`Request`] onto the engine or the store.

use crate::protocol::{Request, RequestKind};
use kiln_agent::{ConversationEngine, IncrementSender, Turn};
use kiln_core::{Error, Result};
use kiln_knowledge::{KnowledgeStore, source_metadata};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// `source` recorded for text added through the `add` request.
pub const USER_INPUT_SOURCE: &str = "user_input";

/// Executes requests against the shared engine and knowledge store.
pub struct RequestHandler {
    engine: Arc<ConversationEngine>,
}

impl RequestHandler {
    pub fn new(engine: Arc<ConversationEngine>) -> Self {
        Self { engine }
    }

    fn store(&self) -> &KnowledgeStore {
        self.engine.knowledge()
    }

    /// Run `request`, forwarding model increments for conversational kinds.
    /// Returns the text for the final `done` record.
    pub async fn dispatch(&self, request: &Request, increments: Option<&IncrementSender>) -> Result<String> {
        debug!(kind = %request.kind, bytes = request.content.len(), "Dispatching request");
        match &request.kind {
            RequestKind::Chat => {
                let outcome = self.engine.chat(self.turn(request), increments).await?;
                Ok(outcome.answer)
            }
            RequestKind::Edit => {
                let outcome = self
                    .engine
                    .chat_with_tools(self.turn(request), increments)
                    .await?;
                info!(iterations = outcome.iterations, tool_calls = outcome.tool_calls, "Tool turn finished");
                Ok(outcome.answer)
            }
            RequestKind::Add => {
                if request.content.trim().is_empty() {
                    return Err(Error::Protocol("add requires non-empty content".into()));
                }
                let report = self
                    .store()
                    .add_text(&request.content, source_metadata(USER_INPUT_SOURCE))
                    .await?;
                debug!(chunks = report.ids.len(), skipped = report.skipped, "Text added");
                if report.skipped == 0 {
                    Ok("Added to knowledge base".into())
                } else {
                    Ok(format!(
                        "Added to knowledge base ({} chunks, {} skipped)",
                        report.ids.len(),
                        report.skipped
                    ))
                }
            }
            RequestKind::Index => {
                if request.content.trim().is_empty() {
                    return Err(Error::Protocol("index requires a path".into()));
                }
                let path = resolve_path(request.content.trim(), request.pwd.as_deref());
                let report = self.store().index_directory(&path).await?;
                Ok(format!(
                    "Indexed directory: {} ({} files, {} chunks, {} files skipped, {} chunks skipped)",
                    path.display(),
                    report.files_indexed,
                    report.chunks_added,
                    report.files_skipped,
                    report.chunks_skipped
                ))
            }
            RequestKind::Stats => {
                let count = self.store().count().await;
                Ok(format!("Knowledge base contains {count} documents"))
            }
            RequestKind::Clear => {
                let removed = self.store().clear().await?;
                Ok(format!("Removed {removed} documents from knowledge base"))
            }
            RequestKind::Sources => {
                let sources = self.store().sources().await;
                if sources.is_empty() {
                    Ok("Knowledge base is empty".into())
                } else {
                    Ok(sources.join("\n"))
                }
            }
            RequestKind::Unknown(kind) => Err(Error::Protocol(format!("unknown request type: {kind}"))),
        }
    }

    fn turn(&self, request: &Request) -> Turn {
        let mut turn = Turn::new(request.content.clone()).with_history(request.history.clone());
        if let Some(pwd) = request.pwd.as_deref().filter(|p| !p.is_empty()) {
            turn = turn.with_working_dir(pwd);
        }
        turn
    }
}

/// Resolve a client-supplied path against the client's working directory.
fn resolve_path(path: &str, pwd: Option<&str>) -> PathBuf {
    let path = Path::new(path);
    match pwd {
        Some(pwd) if path.is_relative() && !pwd.is_empty() => Path::new(pwd).join(path),
        _ => path.to_path_buf(),
    }
}
