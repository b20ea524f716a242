//! Ollama provider implementation.
//!
//! Talks to a local Ollama daemon:
//! - `POST /api/chat` for completions (NDJSON stream when `stream` is true)
//! - `POST /api/embed` for embeddings
//!
//! Tool results are sent with the `user` role, since the model sees tools
//! only through the text directive protocol.

use async_trait::async_trait;
use futures::StreamExt;
use kiln_core::error::ProviderError;
use kiln_core::message::{Message, Role};
use kiln_core::provider::*;
use kiln_core::Embedder;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, trace, warn};

/// An Ollama chat + embedding provider.
pub struct OllamaProvider {
    base_url: String,
    embedding_model: String,
    embedder_name: String,
    client: reqwest::Client,
}

impl OllamaProvider {
    /// Create a provider for the daemon at `base_url`.
    pub fn new(
        base_url: impl Into<String>,
        embedding_model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::NotConfigured(format!("HTTP client: {e}")))?;
        let embedding_model = embedding_model.into();

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            embedder_name: format!("ollama/{embedding_model}"),
            embedding_model,
            client,
        })
    }

    /// Provider for `http://localhost:11434` with `nomic-embed-text`.
    pub fn local() -> Result<Self, ProviderError> {
        Self::new("http://localhost:11434", "nomic-embed-text", Duration::from_secs(300))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn to_api_messages(messages: &[Message]) -> Vec<ApiMessage> {
        messages
            .iter()
            .map(|m| ApiMessage {
                role: match m.role {
                    Role::System => "system",
                    Role::User | Role::Tool => "user",
                    Role::Assistant => "assistant",
                }
                .to_string(),
                content: m.content.clone(),
            })
            .collect()
    }

    fn chat_body(request: &ProviderRequest, stream: bool) -> ChatRequest {
        ChatRequest {
            model: request.model.clone(),
            messages: Self::to_api_messages(&request.messages),
            stream,
            options: ChatOptions {
                temperature: request.temperature,
                num_predict: request.max_tokens,
            },
        }
    }

    async fn post<B: Serialize>(&self, path: &str, body: &B) -> Result<reqwest::Response, ProviderError> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status().as_u16();
        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, url = %url, body = %error_body, "Ollama returned error");
            return Err(ProviderError::Api {
                status_code: status,
                message: extract_error(&error_body),
            });
        }
        Ok(response)
    }
}

fn map_reqwest_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout(e.to_string())
    } else {
        ProviderError::Network(e.to_string())
    }
}

/// Ollama reports failures as `{"error": "..."}`; fall back to the raw body.
fn extract_error(body: &str) -> String {
    serde_json::from_str::<ErrorBody>(body)
        .map(|e| e.error)
        .unwrap_or_else(|_| body.trim().to_string())
}

/// Parse one NDJSON line of a streamed `/api/chat` response.
///
/// Returns `Ok(None)` for blank lines.
fn parse_stream_line(line: &[u8]) -> Result<Option<StreamChunk>, ProviderError> {
    let line = String::from_utf8_lossy(line);
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let resp: ChatResponse = serde_json::from_str(line)
        .map_err(|e| ProviderError::InvalidResponse(format!("bad stream line: {e}")))?;
    if let Some(error) = resp.error {
        return Err(ProviderError::StreamInterrupted(error));
    }

    let usage = resp.done.then(|| usage_from(&resp)).flatten();
    Ok(Some(StreamChunk {
        content: resp.message.map(|m| m.content).filter(|c| !c.is_empty()),
        done: resp.done,
        usage,
    }))
}

fn usage_from(resp: &ChatResponse) -> Option<Usage> {
    let prompt = resp.prompt_eval_count?;
    let completion = resp.eval_count.unwrap_or(0);
    Some(Usage {
        prompt_tokens: prompt,
        completion_tokens: completion,
        total_tokens: prompt + completion,
    })
}

#[async_trait]
impl kiln_core::Provider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        debug!(model = %request.model, messages = request.messages.len(), "Sending completion request");
        let response = self.post("/api/chat", &Self::chat_body(&request, false)).await?;

        let api_response: ChatResponse = response.json().await.map_err(|e| {
            ProviderError::InvalidResponse(format!("Failed to parse response: {e}"))
        })?;
        if let Some(error) = api_response.error {
            return Err(ProviderError::Api {
                status_code: 200,
                message: error,
            });
        }

        let usage = usage_from(&api_response);
        let content = api_response.message.map(|m| m.content).unwrap_or_default();
        Ok(ProviderResponse {
            message: Message::assistant(content),
            usage,
            model: api_response.model.unwrap_or(request.model),
        })
    }

    async fn stream(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ChunkReceiver, ProviderError> {
        debug!(model = %request.model, messages = request.messages.len(), "Sending streaming request");
        let response = self.post("/api/chat", &Self::chat_body(&request, true)).await?;

        let (tx, rx) = tokio::sync::mpsc::channel(64);

        // Read the NDJSON byte stream on its own task; dropping the receiver
        // ends the task and with it the HTTP response.
        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut buffer: Vec<u8> = Vec::new();

            while let Some(chunk_result) = byte_stream.next().await {
                let bytes = match chunk_result {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx
                            .send(Err(ProviderError::StreamInterrupted(e.to_string())))
                            .await;
                        return;
                    }
                };
                buffer.extend_from_slice(&bytes);

                while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
                    let line: Vec<u8> = buffer.drain(..=pos).collect();
                    match parse_stream_line(&line) {
                        Ok(None) => {}
                        Ok(Some(chunk)) => {
                            let done = chunk.done;
                            trace!(done, "Stream chunk");
                            if tx.send(Ok(chunk)).await.is_err() || done {
                                return;
                            }
                        }
                        Err(e) => {
                            let _ = tx.send(Err(e)).await;
                            return;
                        }
                    }
                }
            }

            // Trailing line without a newline
            match parse_stream_line(&buffer) {
                Ok(Some(chunk)) => {
                    let _ = tx.send(Ok(chunk)).await;
                }
                Ok(None) => {}
                Err(e) => {
                    let _ = tx.send(Err(e)).await;
                }
            }
        });

        Ok(rx)
    }

    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self.client.get(&url).send().await.map_err(map_reqwest_error)?;
        Ok(response.status().is_success())
    }
}

#[async_trait]
impl Embedder for OllamaProvider {
    fn name(&self) -> &str {
        &self.embedder_name
    }

    async fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, ProviderError> {
        let body = EmbedRequest {
            model: &self.embedding_model,
            input: text,
        };
        let response = self.post("/api/embed", &body).await?;

        let api_resp: EmbedResponse = response.json().await.map_err(|e| {
            ProviderError::InvalidResponse(format!("Failed to parse embedding response: {e}"))
        })?;
        api_resp
            .embeddings
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::InvalidResponse("No embeddings returned".into()))
    }
}

// --- Ollama API types (internal) ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ApiMessage>,
    stream: bool,
    options: ChatOptions,
}

#[derive(Debug, Serialize)]
struct ChatOptions {
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    message: Option<ApiMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    prompt_eval_count: Option<u32>,
    #[serde(default)]
    eval_count: Option<u32>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}
