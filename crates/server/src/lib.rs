//! Unix socket front end for Kiln.
//!
//! [`AgentServer`] accepts connections, reads one JSON request line per
//! connection, and answers with streamed JSON records. [`Client`] is the
//! other end, used by the `kiln` CLI.

pub mod client;
pub mod handler;
pub mod protocol;
pub mod server;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use client::{Client, ClientError};
pub use handler::{RequestHandler, USER_INPUT_SOURCE};
pub use protocol::{LegacyResponse, Request, RequestKind, StreamRecord};
pub use server::{AgentServer, ServerOptions};
