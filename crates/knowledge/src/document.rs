//! Stored document and report types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Metadata key for the origin of a document (file path or `user_input`).
pub const SOURCE_KEY: &str = "source";
/// Metadata key for the chunk index within its source text.
pub const CHUNK_KEY: &str = "chunk";
/// Metadata key for the number of chunks the source text produced.
pub const CHUNK_COUNT_KEY: &str = "chunk_count";

/// A chunk of text together with its embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// `doc_<n>`, unique for the lifetime of the store contents
    pub id: String,
    pub content: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    pub embedding: Vec<f32>,
    pub created_at: DateTime<Utc>,
}

impl Document {
    pub fn source(&self) -> Option<&str> {
        self.metadata.get(SOURCE_KEY).map(String::as_str)
    }

    /// The numeric part of a `doc_<n>` id.
    pub(crate) fn sequence(&self) -> Option<u64> {
        self.id.strip_prefix("doc_")?.parse().ok()
    }
}

/// Build a metadata map with only a `source` entry.
pub fn source_metadata(source: impl Into<String>) -> BTreeMap<String, String> {
    BTreeMap::from([(SOURCE_KEY.to_string(), source.into())])
}

/// A retrieved document and its similarity to the query.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub document: Document,
    pub score: f32,
}

/// Outcome of [`crate::KnowledgeStore::add_text`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddReport {
    /// IDs of the stored documents, in chunk order
    pub ids: Vec<String>,
    /// Chunks that could not be embedded
    pub skipped: usize,
}

/// Outcome of [`crate::KnowledgeStore::index_directory`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexReport {
    pub files_indexed: usize,
    pub chunks_added: usize,
    /// Unreadable files and files whose every chunk failed to embed
    pub files_skipped: usize,
    /// Chunks dropped from files that were otherwise indexed
    pub chunks_skipped: usize,
}
