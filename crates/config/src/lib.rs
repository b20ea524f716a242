//! Configuration loading, validation, and management for Kiln.
//!
//! Loads configuration from `~/.kiln/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use kiln_core::Permission;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.kiln/config.toml`. Every section and field is
/// optional in the file; missing values fall back to the defaults below.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Chat model settings
    #[serde(default)]
    pub llm: LlmConfig,

    /// Knowledge store / retrieval settings
    #[serde(default)]
    pub rag: RagConfig,

    /// Which tool permission classes are granted
    #[serde(default)]
    pub permissions: PermissionsConfig,

    /// Filesystem and command sandbox for tools
    #[serde(default)]
    pub sandbox: SandboxConfig,

    /// Conversation engine settings
    #[serde(default)]
    pub agent: AgentConfig,

    /// Socket server settings
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_model")]
    pub model: String,

    /// Ollama base URL
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// HTTP timeout for a single model call
    #[serde(default = "default_llm_timeout")]
    pub request_timeout_secs: u64,
}

fn default_model() -> String {
    "llama3.2".into()
}
fn default_base_url() -> String {
    "http://localhost:11434".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_llm_timeout() -> u64 {
    300
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            base_url: default_base_url(),
            temperature: default_temperature(),
            max_tokens: None,
            request_timeout_secs: default_llm_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagConfig {
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    /// Chunk length in bytes
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Bytes shared between consecutive chunks
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,

    /// Number of documents retrieved per query
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// File extensions picked up by directory indexing (without the dot)
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,

    /// JSON-lines file the store persists to
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,

    /// Keep the store in memory only
    #[serde(default)]
    pub in_memory: bool,
}

fn default_embedding_model() -> String {
    "nomic-embed-text".into()
}
fn default_chunk_size() -> usize {
    1000
}
fn default_chunk_overlap() -> usize {
    200
}
fn default_top_k() -> usize {
    3
}
fn default_extensions() -> Vec<String> {
    ["rs", "go", "py", "js", "ts", "tsx", "jsx", "md", "txt"]
        .into_iter()
        .map(String::from)
        .collect()
}
fn default_store_path() -> PathBuf {
    AppConfig::config_dir().join("knowledge.jsonl")
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            embedding_model: default_embedding_model(),
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            top_k: default_top_k(),
            extensions: default_extensions(),
            store_path: default_store_path(),
            in_memory: false,
        }
    }
}

impl RagConfig {
    /// The persistence path, or `None` when the store is in-memory.
    pub fn persistence_path(&self) -> Option<&Path> {
        (!self.in_memory).then_some(self.store_path.as_path())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionsConfig {
    #[serde(default = "default_true")]
    pub read: bool,

    #[serde(default = "default_true")]
    pub write: bool,

    #[serde(default)]
    pub execute: bool,
}

fn default_true() -> bool {
    true
}

impl Default for PermissionsConfig {
    fn default() -> Self {
        Self {
            read: true,
            write: true,
            execute: false,
        }
    }
}

impl PermissionsConfig {
    pub fn granted(&self) -> Permission {
        Permission {
            read: self.read,
            write: self.write,
            execute: self.execute,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Roots tools may touch; empty means anywhere not forbidden
    #[serde(default)]
    pub allowed_roots: Vec<String>,

    #[serde(default = "default_forbidden_paths")]
    pub forbidden_paths: Vec<String>,

    /// Program names `run_command` may start
    #[serde(default = "default_allowed_commands")]
    pub allowed_commands: Vec<String>,
}

fn default_forbidden_paths() -> Vec<String> {
    ["/etc", "/proc", "/sys", "~/.ssh", "~/.gnupg", "~/.aws"]
        .into_iter()
        .map(String::from)
        .collect()
}
fn default_allowed_commands() -> Vec<String> {
    ["git", "ls", "cat", "grep", "cargo", "wc", "head", "tail"]
        .into_iter()
        .map(String::from)
        .collect()
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            allowed_roots: vec![],
            forbidden_paths: default_forbidden_paths(),
            allowed_commands: default_allowed_commands(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Persona prompt placed at the top of every system message
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    /// Upper bound on generate/execute rounds per request
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
}

fn default_system_prompt() -> String {
    "You are a helpful local coding assistant. Answer concisely and use the \
     provided context when it is relevant."
        .into()
}
fn default_max_iterations() -> u32 {
    10
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            system_prompt: default_system_prompt(),
            max_iterations: default_max_iterations(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,

    /// Default per-request deadline
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// How long in-flight connections may run after a shutdown signal
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,

    /// Longest accepted request line
    #[serde(default = "default_max_request_bytes")]
    pub max_request_bytes: usize,
}

fn default_socket_path() -> PathBuf {
    PathBuf::from("/tmp/kiln.sock")
}
fn default_request_timeout() -> u64 {
    600
}
fn default_shutdown_grace() -> u64 {
    5
}
fn default_max_request_bytes() -> usize {
    4 * 1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            request_timeout_secs: default_request_timeout(),
            shutdown_grace_secs: default_shutdown_grace(),
            max_request_bytes: default_max_request_bytes(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.kiln/config.toml).
    ///
    /// Environment variables override the file:
    /// - `KILN_MODEL`
    /// - `KILN_OLLAMA_URL`
    /// - `KILN_SOCKET`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from a variable lookup (the process environment in
    /// production).
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(model) = lookup("KILN_MODEL") {
            self.llm.model = model;
        }
        if let Some(url) = lookup("KILN_OLLAMA_URL") {
            self.llm.base_url = url;
        }
        if let Some(socket) = lookup("KILN_SOCKET") {
            self.server.socket_path = PathBuf::from(socket);
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".kiln")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(ConfigError::ValidationError(
                "llm.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.rag.chunk_size == 0 {
            return Err(ConfigError::ValidationError(
                "rag.chunk_size must be > 0".into(),
            ));
        }

        if self.rag.chunk_overlap >= self.rag.chunk_size {
            return Err(ConfigError::ValidationError(format!(
                "rag.chunk_overlap ({}) must be smaller than rag.chunk_size ({})",
                self.rag.chunk_overlap, self.rag.chunk_size
            )));
        }

        if self.rag.top_k == 0 {
            return Err(ConfigError::ValidationError("rag.top_k must be > 0".into()));
        }

        if self.agent.max_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_iterations must be >= 1".into(),
            ));
        }

        if self.server.max_request_bytes == 0 {
            return Err(ConfigError::ValidationError(
                "server.max_request_bytes must be > 0".into(),
            ));
        }

        Ok(())
    }

    /// Render the configuration as TOML (for `kiln config`).
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::SerializeError(e.to_string()))
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        Self::default().to_toml().unwrap_or_default()
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Failed to serialize config: {0}")]
    SerializeError(String),

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

impl From<ConfigError> for kiln_core::Error {
    fn from(err: ConfigError) -> Self {
        kiln_core::Error::Config {
            message: err.to_string(),
        }
    }
}
