//! The conversation engine for Kiln.
//!
//! A turn follows a **Retrieve → Generate → Act → Observe** cycle:
//!
//! 1. **Retrieve** context for the user message from the knowledge store
//! 2. **Build** the message sequence (persona or tool prompt + history + message)
//! 3. **Generate** via the configured provider, streaming increments out
//! 4. **If the output holds `<tool_call>` directives**: run them, append the
//!    results, loop back to step 3
//! 5. **Otherwise**: strip directive markup and return the answer
//!
//! The loop ends when the model answers without directives or the
//! iteration limit is reached.

pub mod directive;
pub mod engine;
pub mod prompt;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use directive::{ModelOutput, ToolCallDirective, parse, strip_directives};
pub use engine::{ChatOutcome, ConversationEngine, IncrementSender, Turn};
