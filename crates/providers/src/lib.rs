//! Model collaborators for Kiln.
//!
//! [`OllamaProvider`] implements both `kiln_core::Provider` (chat) and
//! `kiln_core::Embedder` (embeddings) against a local Ollama daemon.

pub mod ollama;

pub use ollama::OllamaProvider;
