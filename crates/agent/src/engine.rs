//! The conversation engine: retrieve, generate, and run the tool-call loop.

use crate::directive::{self, ModelOutput};
use crate::prompt;
use kiln_core::{Message, Provider, ProviderRequest, Result, ToolContext, ToolRegistry};
use kiln_knowledge::KnowledgeStore;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Sender for streamed text increments.
pub type IncrementSender = mpsc::Sender<String>;

/// One user turn.
#[derive(Debug, Clone, Default)]
pub struct Turn {
    pub message: String,
    /// Prior messages, oldest first
    pub history: Vec<Message>,
    /// Caller's working directory; relative tool paths resolve against it
    pub working_dir: Option<PathBuf>,
}

impl Turn {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn with_history(mut self, history: Vec<Message>) -> Self {
        self.history = history;
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

/// The result of a completed turn.
#[derive(Debug, Clone)]
pub struct ChatOutcome {
    /// Final answer with directive markup stripped
    pub answer: String,
    /// Number of model generations
    pub iterations: u32,
    /// Number of tool directives executed
    pub tool_calls: usize,
    /// The full transcript sent to (and produced by) the model
    pub messages: Vec<Message>,
}

/// Drives a turn from user message to final answer.
///
/// Shared across connections behind an `Arc`; holds no per-turn state.
pub struct ConversationEngine {
    provider: Arc<dyn Provider>,
    knowledge: Arc<KnowledgeStore>,
    tools: Arc<ToolRegistry>,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
    system_prompt: String,
    max_iterations: u32,
    top_k: usize,
}

impl ConversationEngine {
    pub fn new(
        provider: Arc<dyn Provider>,
        knowledge: Arc<KnowledgeStore>,
        tools: Arc<ToolRegistry>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            knowledge,
            tools,
            model: model.into(),
            temperature: 0.7,
            max_tokens: None,
            system_prompt: "You are a helpful local coding assistant.".into(),
            max_iterations: 10,
            top_k: 3,
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: Option<u32>) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = max;
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn knowledge(&self) -> &Arc<KnowledgeStore> {
        &self.knowledge
    }

    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    /// Plain question answering: persona prompt, retrieved context, one
    /// generation, no tools.
    pub async fn chat(&self, turn: Turn, increments: Option<&IncrementSender>) -> Result<ChatOutcome> {
        let mut messages = Vec::with_capacity(turn.history.len() + 3);
        messages.push(Message::system(self.system_prompt.clone()));
        messages.extend(turn.history);
        messages.push(self.user_message(&turn.message).await);

        let output = self.generate(&messages, increments).await?;
        messages.push(Message::assistant(output.clone()));

        Ok(ChatOutcome {
            answer: directive::strip_directives(&output),
            iterations: 1,
            tool_calls: 0,
            messages,
        })
    }

    /// Tool-enabled turn: generate, execute any directives, feed the
    /// results back, and repeat until the model answers without directives.
    ///
    /// Fails with [`kiln_core::Error::ToolLoopExceeded`] once
    /// `max_iterations` generations have all asked for tools.
    pub async fn chat_with_tools(
        &self,
        turn: Turn,
        increments: Option<&IncrementSender>,
    ) -> Result<ChatOutcome> {
        let system = prompt::tool_system_prompt(
            &self.system_prompt,
            &self.tools.specs(),
            turn.working_dir.as_deref(),
        );
        let ctx = ToolContext::new(turn.working_dir);

        let mut messages = Vec::with_capacity(turn.history.len() + 4);
        messages.push(Message::system(system));
        messages.extend(turn.history);
        messages.push(self.user_message(&turn.message).await);

        let mut tool_calls = 0;
        let mut iteration = 0;
        loop {
            iteration += 1;
            if iteration > self.max_iterations {
                warn!(max = self.max_iterations, "Tool loop exceeded max iterations");
                return Err(kiln_core::Error::ToolLoopExceeded {
                    max_iterations: self.max_iterations,
                });
            }
            debug!(iteration, messages = messages.len(), "Generating");

            let output = self.generate(&messages, increments).await?;
            let parsed = directive::parse(&output);
            messages.push(Message::assistant(output));

            let calls = match parsed {
                ModelOutput::Text(answer) => {
                    info!(iterations = iteration, tool_calls, "Turn complete");
                    return Ok(ChatOutcome {
                        answer,
                        iterations: iteration,
                        tool_calls,
                        messages,
                    });
                }
                ModelOutput::ToolCalls(calls) => calls,
            };

            for call in calls {
                debug!(tool = %call.name, arguments = %call.raw_arguments, "Executing tool call");
                let result = self.tools.execute(&call.name, &call.arguments, &ctx).await;
                match &result {
                    Ok(output) => debug!(tool = %call.name, bytes = output.len(), "Tool succeeded"),
                    Err(e) => warn!(tool = %call.name, error = %e, "Tool failed"),
                }
                messages.push(prompt::tool_result_message(&call.name, &result));
                tool_calls += 1;
            }
        }
    }

    /// The user message with any retrieved context appended. Retrieval is
    /// best-effort.
    async fn user_message(&self, text: &str) -> Message {
        match self.knowledge.retrieve(text, self.top_k).await {
            Ok(hits) => {
                debug!(hits = hits.len(), "Context retrieved");
                Message::user(format!("{text}{}", prompt::format_context(&hits)))
            }
            Err(e) => {
                warn!(error = %e, "Retrieval failed, continuing without context");
                Message::user(text)
            }
        }
    }

    /// Stream one generation, forwarding each increment, and return the
    /// full output.
    async fn generate(&self, messages: &[Message], increments: Option<&IncrementSender>) -> Result<String> {
        let request = ProviderRequest {
            model: self.model.clone(),
            messages: messages.to_vec(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            stream: true,
        };

        let mut rx = self.provider.stream(request).await?;
        let mut output = String::new();
        while let Some(chunk) = rx.recv().await {
            let chunk = chunk?;
            if let Some(content) = chunk.content.filter(|c| !c.is_empty()) {
                if let Some(tx) = increments {
                    // A departed listener does not stop the turn.
                    let _ = tx.send(content.clone()).await;
                }
                output.push_str(&content);
            }
            if chunk.done {
                break;
            }
        }
        Ok(output)
    }
}
