//! JSON-lines persistence for the knowledge store.
//!
//! Each line is one JSON-encoded [`Document`]. The file is read once when the
//! store opens, appended to on every commit, and truncated on `clear`.

use crate::document::Document;
use kiln_core::KnowledgeError;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// Handle to the JSONL file backing a store.
#[derive(Debug, Clone)]
pub(crate) struct JsonlFile {
    path: PathBuf,
}

impl JsonlFile {
    pub(crate) fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Load documents from disk.
    ///
    /// A missing file yields an empty list. Corrupt lines are skipped.
    pub(crate) fn load(&self) -> Result<Vec<Document>, KnowledgeError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(KnowledgeError::Storage(format!(
                    "Failed to read {}: {e}",
                    self.path.display()
                )));
            }
        };

        let documents: Vec<Document> = content
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .filter_map(|(n, line)| match serde_json::from_str::<Document>(line) {
                Ok(doc) => Some(doc),
                Err(e) => {
                    warn!(line = n + 1, error = %e, "Skipping corrupted knowledge entry");
                    None
                }
            })
            .collect();

        debug!(path = %self.path.display(), count = documents.len(), "Knowledge file loaded");
        Ok(documents)
    }

    /// Append documents, creating the file and its parent directory if needed.
    pub(crate) async fn append(&self, documents: &[Document]) -> Result<(), KnowledgeError> {
        let mut content = String::new();
        for doc in documents {
            let line = serde_json::to_string(doc).map_err(|e| {
                KnowledgeError::Storage(format!("Failed to serialize document: {e}"))
            })?;
            content.push_str(&line);
            content.push('\n');
        }

        self.ensure_parent().await?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| self.storage_error("open", e))?;
        file.write_all(content.as_bytes())
            .await
            .map_err(|e| self.storage_error("write", e))?;
        file.flush().await.map_err(|e| self.storage_error("flush", e))?;
        Ok(())
    }

    /// Empty the file.
    pub(crate) async fn truncate(&self) -> Result<(), KnowledgeError> {
        self.ensure_parent().await?;
        tokio::fs::write(&self.path, b"")
            .await
            .map_err(|e| self.storage_error("truncate", e))
    }

    async fn ensure_parent(&self) -> Result<(), KnowledgeError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                KnowledgeError::Storage(format!("Failed to create knowledge directory: {e}"))
            })?;
        }
        Ok(())
    }

    fn storage_error(&self, action: &str, e: std::io::Error) -> KnowledgeError {
        KnowledgeError::Storage(format!("Failed to {action} {}: {e}", self.path.display()))
    }
}
