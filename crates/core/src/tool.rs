//! Tool trait: the abstraction over agent capabilities.
//!
//! Tools are what give the agent the ability to act on the local machine:
//! read and write files, list directories, run whitelisted commands.
//! Every tool declares the permission it needs; the registry only accepts
//! tools whose permission has been granted by configuration.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use crate::error::ToolError;

/// The JSON type a tool parameter must have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    Object,
    Array,
}

impl ParamType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Object => "object",
            Self::Array => "array",
        }
    }

    /// Whether `value` has this type.
    pub fn matches(&self, value: &serde_json::Value) -> bool {
        use serde_json::Value;
        match self {
            Self::String => value.is_string(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Number => matches!(value, Value::Number(_)),
            Self::Boolean => value.is_boolean(),
            Self::Object => value.is_object(),
            Self::Array => value.is_array(),
        }
    }
}

/// One named parameter of a tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ParamType,
    pub description: String,
    #[serde(default)]
    pub required: bool,
}

impl ParamSpec {
    pub fn required(name: &str, param_type: ParamType, description: &str) -> Self {
        Self {
            name: name.into(),
            param_type,
            description: description.into(),
            required: true,
        }
    }

    pub fn optional(name: &str, param_type: ParamType, description: &str) -> Self {
        Self {
            required: false,
            ..Self::required(name, param_type, description)
        }
    }
}

/// A set of permission flags.
///
/// Used both for what a tool requires and for what configuration grants.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Permission {
    pub read: bool,
    pub write: bool,
    pub execute: bool,
}

impl Permission {
    pub const NONE: Self = Self { read: false, write: false, execute: false };
    pub const READ: Self = Self { read: true, write: false, execute: false };
    pub const WRITE: Self = Self { read: false, write: true, execute: false };
    pub const EXECUTE: Self = Self { read: false, write: false, execute: true };
    pub const ALL: Self = Self { read: true, write: true, execute: true };

    /// True when every flag set in `required` is also set in `self`.
    pub fn allows(&self, required: Permission) -> bool {
        (!required.read || self.read)
            && (!required.write || self.write)
            && (!required.execute || self.execute)
    }

    pub fn union(self, other: Permission) -> Self {
        Self {
            read: self.read || other.read,
            write: self.write || other.write,
            execute: self.execute || other.execute,
        }
    }
}

impl std::fmt::Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let flags: Vec<&str> = [
            (self.read, "read"),
            (self.write, "write"),
            (self.execute, "execute"),
        ]
        .into_iter()
        .filter_map(|(set, name)| set.then_some(name))
        .collect();
        if flags.is_empty() {
            f.write_str("none")
        } else {
            f.write_str(&flags.join("+"))
        }
    }
}

/// Description of a tool as presented to the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Vec<ParamSpec>,
    pub permission: Permission,
}

impl ToolSpec {
    pub fn required_parameters(&self) -> impl Iterator<Item = &ParamSpec> {
        self.parameters.iter().filter(|p| p.required)
    }
}

/// Per-request execution context handed to every tool.
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    /// The caller's working directory; relative paths resolve against it.
    pub working_dir: Option<PathBuf>,
}

impl ToolContext {
    pub fn new(working_dir: Option<PathBuf>) -> Self {
        Self { working_dir }
    }

    /// Resolve `path` against the working directory when it is relative.
    pub fn resolve(&self, path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref();
        match &self.working_dir {
            Some(dir) if path.is_relative() => dir.join(path),
            _ => path.to_path_buf(),
        }
    }
}

/// The core Tool trait.
///
/// Each tool (read_file, list_directory, write_file, run_command) implements
/// this trait and is registered in the [`ToolRegistry`].
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "read_file").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the model).
    fn description(&self) -> &str;

    /// The parameters this tool accepts.
    fn parameters(&self) -> Vec<ParamSpec>;

    /// The permission the tool needs to be registered.
    fn permission(&self) -> Permission;

    /// Execute the tool. Arguments have already been validated against
    /// [`Tool::parameters`].
    async fn execute(
        &self,
        arguments: serde_json::Value,
        ctx: &ToolContext,
    ) -> std::result::Result<String, ToolError>;

    fn to_spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters(),
            permission: self.permission(),
        }
    }
}

/// A permission-filtered registry of available tools.
///
/// Immutable once built; share it behind an `Arc`.
pub struct ToolRegistry {
    granted: Permission,
    tools: HashMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new(granted: Permission) -> Self {
        Self {
            granted,
            tools: HashMap::new(),
        }
    }

    /// Register a tool if its required permission is granted.
    ///
    /// Returns whether the tool was added. A name that is already taken is
    /// refused and the first registration stays.
    pub fn register(&mut self, tool: Box<dyn Tool>) -> bool {
        let required = tool.permission();
        if !self.granted.allows(required) {
            tracing::debug!(
                tool = tool.name(),
                required = %required,
                granted = %self.granted,
                "Tool omitted: permission not granted"
            );
            return false;
        }
        if self.tools.contains_key(tool.name()) {
            tracing::warn!(tool = tool.name(), "Tool omitted: name already registered");
            return false;
        }
        let name = tool.name().to_string();
        self.tools.insert(name, tool);
        true
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    /// All tool specs, sorted by name.
    pub fn specs(&self) -> Vec<ToolSpec> {
        let mut specs: Vec<ToolSpec> = self.tools.values().map(|t| t.to_spec()).collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }

    /// Registered tool names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn granted(&self) -> Permission {
        self.granted
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Validate `arguments` and run the named tool.
    pub async fn execute(
        &self,
        name: &str,
        arguments: &serde_json::Value,
        ctx: &ToolContext,
    ) -> std::result::Result<String, ToolError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::Unknown(name.to_string()))?;
        validate_arguments(name, &tool.parameters(), arguments)?;
        tracing::debug!(tool = name, "Executing tool");
        tool.execute(arguments.clone(), ctx).await
    }
}

fn validate_arguments(
    tool_name: &str,
    params: &[ParamSpec],
    arguments: &serde_json::Value,
) -> std::result::Result<(), ToolError> {
    let object = arguments
        .as_object()
        .ok_or_else(|| ToolError::invalid_arguments(tool_name, "arguments must be a JSON object"))?;

    for param in params {
        match object.get(&param.name) {
            None | Some(serde_json::Value::Null) if param.required => {
                return Err(ToolError::invalid_arguments(
                    tool_name,
                    format!("missing required parameter '{}'", param.name),
                ));
            }
            Some(value) if !value.is_null() && !param.param_type.matches(value) => {
                return Err(ToolError::invalid_arguments(
                    tool_name,
                    format!(
                        "parameter '{}' must be of type {}",
                        param.name,
                        param.param_type.as_str()
                    ),
                ));
            }
            _ => {}
        }
    }
    Ok(())
}
