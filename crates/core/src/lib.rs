//! # Kiln Core
//!
//! Domain types, traits, and error definitions for the Kiln local agent
//! runtime. This crate has **no framework dependencies**; it defines the
//! domain model that the knowledge store, tool registry, conversation engine,
//! and socket server all build against.
//!
//! ## Design Philosophy
//!
//! Every external collaborator (chat model, embedding model, tool) is a trait
//! here. Implementations live in their respective crates, which keeps the
//! engine testable with scripted stand-ins.

pub mod embedding;
pub mod error;
pub mod message;
pub mod provider;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use embedding::Embedder;
pub use error::{Error, KnowledgeError, ProviderError, Result, ToolError};
pub use message::{Message, Role};
pub use provider::{Provider, ProviderRequest, ProviderResponse, StreamChunk};
pub use tool::{ParamSpec, ParamType, Permission, Tool, ToolContext, ToolRegistry, ToolSpec};
