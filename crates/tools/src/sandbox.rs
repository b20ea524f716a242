//! Filesystem and command sandbox shared by the built-in tools.
//!
//! File tools may only touch paths inside the allowed roots (when any are
//! configured) and never under a forbidden prefix. `run_command` may only
//! start allow-listed programs.

use kiln_core::ToolError;
use std::path::{Component, Path, PathBuf};

/// Error returned when path validation fails.
#[derive(Debug, thiserror::Error)]
pub enum PathValidationError {
    #[error("Path '{path}' is outside allowed roots")]
    OutsideAllowedRoots { path: String },

    #[error("Path '{path}' matches forbidden pattern '{pattern}'")]
    ForbiddenPath { path: String, pattern: String },

    #[error("Path traversal detected in '{path}'")]
    PathTraversal { path: String },

    #[error("Failed to canonicalize path '{path}': {reason}")]
    CanonicalizeFailed { path: String, reason: String },
}

/// Characters that would let a command line start a second program.
const SHELL_CHAINING: &[char] = &[';', '&', '|', '`', '\n', '>', '<'];

/// Sandbox policy for tool execution.
#[derive(Debug, Clone, Default)]
pub struct Sandbox {
    /// Allowed root directories. Empty = allow all.
    pub allowed_roots: Vec<String>,
    /// Forbidden path prefixes (`~` expands to `$HOME`).
    pub forbidden_paths: Vec<String>,
    /// Programs `run_command` may start. Empty = none.
    pub allowed_commands: Vec<String>,
}

impl Sandbox {
    pub fn new(
        allowed_roots: Vec<String>,
        forbidden_paths: Vec<String>,
        allowed_commands: Vec<String>,
    ) -> Self {
        Self {
            allowed_roots,
            forbidden_paths,
            allowed_commands,
        }
    }

    /// Validate `path` for `tool_name`, mapping failures to
    /// [`ToolError::PermissionDenied`].
    pub fn check_path(&self, tool_name: &str, path: &Path) -> Result<PathBuf, ToolError> {
        validate_path(path, &self.allowed_roots, &self.forbidden_paths).map_err(|e| {
            ToolError::PermissionDenied {
                tool_name: tool_name.into(),
                reason: e.to_string(),
            }
        })
    }

    /// Whether the first word of `command` is an allowed program and the
    /// line chains no further commands.
    pub fn is_command_allowed(&self, command: &str) -> bool {
        if command.contains(SHELL_CHAINING) || command.contains("$(") {
            return false;
        }
        let Some(program) = command.split_whitespace().next() else {
            return false;
        };
        self.allowed_commands.iter().any(|a| a == program)
    }
}

/// Validate that a path is safe to access.
///
/// Checks:
/// 1. No `..` components
/// 2. The path (or its nearest existing ancestor) is canonicalized to resolve symlinks
/// 3. Path is not under a forbidden prefix
/// 4. Path is within allowed roots (if specified)
///
/// Returns the canonicalized path on success.
pub fn validate_path(
    path: &Path,
    allowed_roots: &[String],
    forbidden_paths: &[String],
) -> Result<PathBuf, PathValidationError> {
    let display = path.display().to_string();

    if path.components().any(|c| c == Component::ParentDir) {
        return Err(PathValidationError::PathTraversal { path: display });
    }

    let canonical = canonicalize_lenient(path).map_err(|e| PathValidationError::CanonicalizeFailed {
        path: display.clone(),
        reason: e.to_string(),
    })?;

    for forbidden in forbidden_paths {
        let prefix = normalize_root(forbidden);
        if canonical.starts_with(&prefix) {
            return Err(PathValidationError::ForbiddenPath {
                path: display,
                pattern: forbidden.clone(),
            });
        }
    }

    if !allowed_roots.is_empty()
        && !allowed_roots
            .iter()
            .any(|root| canonical.starts_with(normalize_root(root)))
    {
        return Err(PathValidationError::OutsideAllowedRoots { path: display });
    }

    Ok(canonical)
}

/// Canonicalize `path`, or its nearest existing ancestor with the missing
/// tail re-appended (for files about to be created).
fn canonicalize_lenient(path: &Path) -> std::io::Result<PathBuf> {
    if path.exists() {
        return path.canonicalize();
    }

    let mut missing = Vec::new();
    let mut ancestor = path;
    while let Some(parent) = ancestor.parent() {
        if let Some(name) = ancestor.file_name() {
            missing.push(name.to_os_string());
        }
        ancestor = parent;
        if !ancestor.as_os_str().is_empty() && ancestor.exists() {
            let mut resolved = ancestor.canonicalize()?;
            resolved.extend(missing.iter().rev());
            return Ok(resolved);
        }
    }
    Ok(path.to_path_buf())
}

/// Expand `~` and resolve symlinks in a configured root when it exists.
fn normalize_root(root: &str) -> PathBuf {
    let expanded = PathBuf::from(expand_tilde(root));
    expanded.canonicalize().unwrap_or(expanded)
}

/// Expand ~ to the user's home directory.
fn expand_tilde(path: &str) -> String {
    if (path.starts_with("~/") || path == "~")
        && let Ok(home) = std::env::var("HOME")
    {
        return path.replacen('~', &home, 1);
    }
    path.to_string()
}
