//! The knowledge store: chunk, embed, keep, and retrieve text.

use crate::chunk::Chunker;
use crate::document::{AddReport, CHUNK_COUNT_KEY, CHUNK_KEY, Document, SOURCE_KEY, SearchHit};
use crate::persistence::JsonlFile;
use crate::vector;
use chrono::Utc;
use kiln_core::{Embedder, KnowledgeError};
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Options for opening a [`KnowledgeStore`].
#[derive(Debug, Clone)]
pub struct StoreOptions {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    /// Extensions (without the dot) picked up by directory indexing
    pub extensions: Vec<String>,
    /// JSONL file to persist to; `None` keeps everything in memory
    pub path: Option<PathBuf>,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
            extensions: ["rs", "go", "py", "js", "ts", "tsx", "jsx", "md", "txt"]
                .into_iter()
                .map(String::from)
                .collect(),
            path: None,
        }
    }
}

/// Everything guarded by the store lock.
#[derive(Debug, Default)]
struct StoreState {
    documents: Vec<Document>,
    next_id: u64,
    /// Fixed by the first stored document
    dimension: Option<usize>,
}

impl StoreState {
    fn from_documents(loaded: Vec<Document>) -> Self {
        let mut state = Self::default();
        for doc in loaded {
            let len = doc.embedding.len();
            if len == 0 || state.dimension.is_some_and(|d| d != len) {
                warn!(id = %doc.id, "Skipping stored document with mismatched embedding");
                continue;
            }
            state.dimension = Some(len);
            if let Some(seq) = doc.sequence() {
                state.next_id = state.next_id.max(seq + 1);
            }
            state.documents.push(doc);
        }
        state
    }
}

/// A similarity-searchable collection of embedded text chunks.
///
/// Embeddings are computed before the write lock is taken, so a document is
/// never visible without its embedding and readers are never blocked on the
/// embedding model.
pub struct KnowledgeStore {
    embedder: Arc<dyn Embedder>,
    chunker: Chunker,
    pub(crate) extensions: Vec<String>,
    file: Option<JsonlFile>,
    state: RwLock<StoreState>,
}

impl KnowledgeStore {
    /// Open a store, loading any persisted documents.
    pub fn open(embedder: Arc<dyn Embedder>, options: StoreOptions) -> Result<Self, KnowledgeError> {
        let file = options.path.map(JsonlFile::new);
        let state = match &file {
            Some(file) => StoreState::from_documents(file.load()?),
            None => StoreState::default(),
        };
        info!(
            embedder = embedder.name(),
            documents = state.documents.len(),
            persistent = file.is_some(),
            "Knowledge store opened"
        );
        Ok(Self {
            embedder,
            chunker: Chunker::new(options.chunk_size, options.chunk_overlap),
            extensions: options.extensions,
            file,
            state: RwLock::new(state),
        })
    }

    /// A non-persistent store with default chunking.
    pub fn in_memory(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            chunker: Chunker::default(),
            extensions: StoreOptions::default().extensions,
            file: None,
            state: RwLock::new(StoreState::default()),
        }
    }

    pub fn with_chunking(mut self, size: usize, overlap: usize) -> Self {
        self.chunker = Chunker::new(size, overlap);
        self
    }

    /// The JSONL file backing this store, if any.
    pub fn persistence_path(&self) -> Option<&std::path::Path> {
        self.file.as_ref().map(|f| f.path())
    }

    /// Chunk, embed, and store `content`.
    ///
    /// Chunks whose embedding fails are skipped and counted; the call only
    /// fails when no chunk could be stored. Whitespace-only chunks are
    /// dropped silently.
    pub async fn add_text(
        &self,
        content: &str,
        metadata: BTreeMap<String, String>,
    ) -> Result<AddReport, KnowledgeError> {
        let pieces: Vec<&str> = self
            .chunker
            .split(content)
            .into_iter()
            .filter(|c| !c.trim().is_empty())
            .collect();
        if pieces.is_empty() {
            return Ok(AddReport::default());
        }

        let chunk_count = pieces.len();
        let mut embedded = Vec::with_capacity(chunk_count);
        let mut failures = Vec::new();
        for (index, piece) in pieces.iter().enumerate() {
            match self.embedder.embed(piece).await {
                Ok(embedding) if embedding.is_empty() => {
                    failures.push(KnowledgeError::Embedding("embedder returned an empty vector".into()));
                }
                Ok(embedding) => embedded.push((index, *piece, embedding)),
                Err(e) => {
                    warn!(chunk = index, source = ?metadata.get(SOURCE_KEY), error = %e, "Skipping chunk: embedding failed");
                    failures.push(KnowledgeError::Embedding(e.to_string()));
                }
            }
        }

        let mut state = self.state.write().await;
        let dimension = state
            .dimension
            .or_else(|| embedded.first().map(|(_, _, e)| e.len()));

        let mut next_id = state.next_id;
        let now = Utc::now();
        let mut documents = Vec::with_capacity(embedded.len());
        for (index, piece, embedding) in embedded {
            if let Some(expected) = dimension.filter(|d| *d != embedding.len()) {
                warn!(chunk = index, expected, actual = embedding.len(), "Skipping chunk: dimension mismatch");
                failures.push(KnowledgeError::DimensionMismatch {
                    expected,
                    actual: embedding.len(),
                });
                continue;
            }
            let mut meta = metadata.clone();
            meta.insert(CHUNK_KEY.into(), index.to_string());
            meta.insert(CHUNK_COUNT_KEY.into(), chunk_count.to_string());
            documents.push(Document {
                id: format!("doc_{next_id}"),
                content: piece.to_string(),
                metadata: meta,
                embedding,
                created_at: now,
            });
            next_id += 1;
        }

        if documents.is_empty() {
            return Err(failures
                .into_iter()
                .next()
                .unwrap_or_else(|| KnowledgeError::Embedding("no chunk could be embedded".into())));
        }

        if let Some(file) = &self.file {
            file.append(&documents).await?;
        }

        let ids: Vec<String> = documents.iter().map(|d| d.id.clone()).collect();
        state.next_id = next_id;
        state.dimension = dimension;
        state.documents.extend(documents);
        debug!(added = ids.len(), skipped = failures.len(), total = state.documents.len(), "Knowledge added");

        Ok(AddReport {
            ids,
            skipped: failures.len(),
        })
    }

    /// The `top_k` documents most similar to `query`, best first.
    ///
    /// Equal scores keep insertion order. An empty store returns nothing
    /// without consulting the embedder. A query embedding whose length
    /// differs from the stored documents is a
    /// [`KnowledgeError::DimensionMismatch`].
    pub async fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<SearchHit>, KnowledgeError> {
        if top_k == 0 || self.state.read().await.documents.is_empty() {
            return Ok(Vec::new());
        }

        let query_embedding = self
            .embedder
            .embed(query)
            .await
            .map_err(|e| KnowledgeError::Embedding(e.to_string()))?;

        let state = self.state.read().await;
        if let Some(expected) = state.dimension.filter(|d| *d != query_embedding.len()) {
            return Err(KnowledgeError::DimensionMismatch {
                expected,
                actual: query_embedding.len(),
            });
        }
        let ranked = vector::rank(
            state.documents.iter().map(|d| d.embedding.as_slice()),
            &query_embedding,
            top_k,
        );
        Ok(ranked
            .into_iter()
            .map(|(i, score)| SearchHit {
                document: state.documents[i].clone(),
                score,
            })
            .collect())
    }

    /// Number of stored documents.
    pub async fn count(&self) -> usize {
        self.state.read().await.documents.len()
    }

    /// Embedding dimension, once the first document has been stored.
    pub async fn dimension(&self) -> Option<usize> {
        self.state.read().await.dimension
    }

    /// Distinct `source` values in first-seen order.
    pub async fn sources(&self) -> Vec<String> {
        let state = self.state.read().await;
        let mut seen = HashSet::new();
        state
            .documents
            .iter()
            .filter_map(|d| d.source())
            .filter(|s| seen.insert(*s))
            .map(String::from)
            .collect()
    }

    /// Snapshot of every stored document.
    pub async fn documents(&self) -> Vec<Document> {
        self.state.read().await.documents.clone()
    }

    /// Remove every document and reset the persistence file.
    pub async fn clear(&self) -> Result<usize, KnowledgeError> {
        let mut state = self.state.write().await;
        if let Some(file) = &self.file {
            file.truncate().await?;
        }
        let removed = state.documents.len();
        *state = StoreState::default();
        info!(removed, "Knowledge store cleared");
        Ok(removed)
    }
}
