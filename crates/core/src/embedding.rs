//! Embedder trait: the abstraction over the embedding collaborator.

use async_trait::async_trait;
use crate::error::ProviderError;

/// Turns text into a fixed-length vector for similarity search.
///
/// The dimension is fixed by the backing model; the knowledge store enforces
/// that every stored vector has the same length.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// A human-readable name (e.g., "ollama/nomic-embed-text").
    fn name(&self) -> &str;

    /// Embed a single piece of text.
    async fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, ProviderError>;
}
