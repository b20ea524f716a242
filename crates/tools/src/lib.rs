//! Built-in tool implementations for Kiln.
//!
//! Tools let the model act on the local machine: read files, list
//! directories, write files (with a backup), and, when explicitly granted,
//! run whitelisted commands. Every tool goes through the shared [`Sandbox`].

pub mod list_directory;
pub mod read_file;
pub mod run_command;
pub mod sandbox;
pub mod write_file;

use kiln_core::{Permission, ToolRegistry};
use std::sync::Arc;

pub use list_directory::ListDirectoryTool;
pub use read_file::ReadFileTool;
pub use run_command::RunCommandTool;
pub use sandbox::{PathValidationError, Sandbox, validate_path};
pub use write_file::WriteFileTool;

/// Create a registry with every built-in tool the granted permission allows.
pub fn default_registry(granted: Permission, sandbox: Sandbox) -> ToolRegistry {
    let sandbox = Arc::new(sandbox);
    let mut registry = ToolRegistry::new(granted);
    registry.register(Box::new(ReadFileTool::new(sandbox.clone())));
    registry.register(Box::new(ListDirectoryTool::new(sandbox.clone())));
    registry.register(Box::new(WriteFileTool::new(sandbox.clone())));
    registry.register(Box::new(RunCommandTool::new(sandbox)));
    tracing::debug!(tools = ?registry.names(), granted = %granted, "Tool registry built");
    registry
}
