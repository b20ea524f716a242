//! Stand-in collaborators for server tests.

use async_trait::async_trait;
use kiln_core::provider::ChunkReceiver;
use kiln_core::{
    Embedder, Message, Provider, ProviderError, ProviderRequest, ProviderResponse, Role, StreamChunk,
};
use kiln_knowledge::KnowledgeStore;
use std::sync::Arc;

/// Replies `echo: <last user message>`, streamed word by word.
pub struct EchoProvider;

fn echo(request: &ProviderRequest) -> String {
    let last = request
        .messages
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
        .map(|m| m.content.as_str())
        .unwrap_or_default();
    format!("echo: {last}")
}

#[async_trait]
impl Provider for EchoProvider {
    fn name(&self) -> &str {
        "echo"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        Ok(ProviderResponse {
            message: Message::assistant(echo(&request)),
            usage: None,
            model: request.model,
        })
    }

    async fn stream(&self, request: ProviderRequest) -> Result<ChunkReceiver, ProviderError> {
        let reply = echo(&request);
        let pieces: Vec<String> = reply.split_inclusive(' ').map(String::from).collect();
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

/// Streams one increment, then never finishes.
pub struct StallingProvider;

#[async_trait]
impl Provider for StallingProvider {
    fn name(&self) -> &str {
        "stalling"
    }

    async fn complete(&self, _request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        std::future::pending().await
    }

    async fn stream(&self, _request: ProviderRequest) -> Result<ChunkReceiver, ProviderError> {
        let (tx, rx) = tokio::sync::mpsc::channel(4);
        tokio::spawn(async move {
            let _ = tx
                .send(Ok(StreamChunk {
                    content: Some("thinking".into()),
                    ..Default::default()
                }))
                .await;
            tx.closed().await;
        });
        Ok(rx)
    }
}

/// Letter-histogram embedder; fails on any text containing `FAIL`.
pub struct LetterEmbedder;

#[async_trait]
impl Embedder for LetterEmbedder {
    fn name(&self) -> &str {
        "letters"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        if text.contains("FAIL") {
            return Err(ProviderError::Network("embedding backend unreachable".into()));
        }
        let mut v = vec![0.0; 26];
        for b in text.bytes().filter(u8::is_ascii_alphabetic) {
            v[(b.to_ascii_lowercase() - b'a') as usize] += 1.0;
        }
        Ok(v)
    }
}

pub fn letter_store() -> KnowledgeStore {
    KnowledgeStore::in_memory(Arc::new(LetterEmbedder))
}
