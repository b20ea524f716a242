//! Deterministic embedders for tests.

use async_trait::async_trait;
use kiln_core::{Embedder, ProviderError};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Embeds text as a 26-dimensional letter histogram.
pub struct LetterEmbedder;

pub fn letter_histogram(text: &str) -> Vec<f32> {
    let mut v = vec![0.0; 26];
    for b in text.bytes().filter(u8::is_ascii_alphabetic) {
        v[(b.to_ascii_lowercase() - b'a') as usize] += 1.0;
    }
    v
}

#[async_trait]
impl Embedder for LetterEmbedder {
    fn name(&self) -> &str {
        "letters"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        Ok(letter_histogram(text))
    }
}

/// Counts calls and returns a constant vector.
#[derive(Default)]
pub struct CountingEmbedder {
    calls: AtomicUsize,
}

impl CountingEmbedder {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Embedder for CountingEmbedder {
    fn name(&self) -> &str {
        "counting"
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![1.0, 0.0])
    }
}

/// Fails for any text containing the marker; otherwise a letter histogram.
pub struct FailingEmbedder {
    marker: String,
}

impl FailingEmbedder {
    pub fn on(marker: &str) -> Self {
        Self {
            marker: marker.into(),
        }
    }
}

#[async_trait]
impl Embedder for FailingEmbedder {
    fn name(&self) -> &str {
        "failing"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        if text.contains(&self.marker) {
            return Err(ProviderError::Network("embedding backend unreachable".into()));
        }
        Ok(letter_histogram(text))
    }
}
