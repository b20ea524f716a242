//! Scripted collaborators for engine tests.

use async_trait::async_trait;
use kiln_core::provider::ChunkReceiver;
use kiln_core::{
    Embedder, Message, Provider, ProviderError, ProviderRequest, ProviderResponse, StreamChunk,
};
use std::sync::Mutex;

/// A provider that replays canned outputs in order.
///
/// Each output is streamed word by word, then a `done` chunk. Once the script
/// runs out the last output repeats, which makes "the model never stops
/// calling tools" easy to express. Every request is recorded.
pub struct ScriptedProvider {
    outputs: Vec<String>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    pub fn new(outputs: &[&str]) -> Self {
        assert!(!outputs.is_empty(), "ScriptedProvider needs at least one output");
        Self {
            outputs: outputs.iter().map(|s| s.to_string()).collect(),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn next_output(&self, request: ProviderRequest) -> String {
        let mut requests = self.requests.lock().unwrap();
        let index = requests.len().min(self.outputs.len() - 1);
        requests.push(request);
        self.outputs[index].clone()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let model = request.model.clone();
        Ok(ProviderResponse {
            message: Message::assistant(self.next_output(request)),
            usage: None,
            model,
        })
    }

    async fn stream(&self, request: ProviderRequest) -> Result<ChunkReceiver, ProviderError> {
        let output = self.next_output(request);
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

/// A provider whose stream breaks after one increment.
pub struct BrokenStreamProvider;

#[async_trait]
impl Provider for BrokenStreamProvider {
    fn name(&self) -> &str {
        "broken"
    }

    async fn complete(&self, _request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        Err(ProviderError::Network("connection refused".into()))
    }

    async fn stream(&self, _request: ProviderRequest) -> Result<ChunkReceiver, ProviderError> {
        let (tx, rx) = tokio::sync::mpsc::channel(2);
        let _ = tx
            .send(Ok(StreamChunk {
                content: Some("partial".into()),
                ..Default::default()
            }))
            .await;
        let _ = tx
            .send(Err(ProviderError::StreamInterrupted("socket closed".into())))
            .await;
        Ok(rx)
    }
}

/// Letter-histogram embedder that refuses any text containing `FAIL`.
pub struct LetterEmbedder;

#[async_trait]
impl Embedder for LetterEmbedder {
    fn name(&self) -> &str {
        "letters"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        if text.contains("FAIL") {
            return Err(ProviderError::Network("embedding service down".into()));
        }
        let mut v = vec![0.0; 26];
        for b in text.bytes().filter(u8::is_ascii_alphabetic) {
            v[(b.to_ascii_lowercase() - b'a') as usize] += 1.0;
        }
        Ok(v)
    }
}
