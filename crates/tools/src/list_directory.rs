//! `list_directory`: newline-joined entry names, directories suffixed `/`.

use crate::sandbox::Sandbox;
use async_trait::async_trait;
use kiln_core::{ParamSpec, ParamType, Permission, Tool, ToolContext, ToolError};
use serde::Deserialize;
use std::sync::Arc;

const NAME: &str = "list_directory";

#[derive(Deserialize)]
struct Args {
    path: String,
}

pub struct ListDirectoryTool {
    sandbox: Arc<Sandbox>,
}

impl ListDirectoryTool {
    pub fn new(sandbox: Arc<Sandbox>) -> Self {
        Self { sandbox }
    }
}

#[async_trait]
impl Tool for ListDirectoryTool {
    fn name(&self) -> &str {
        NAME
    }

    fn description(&self) -> &str {
        "List files and directories in a directory"
    }

    fn parameters(&self) -> Vec<ParamSpec> {
        vec![ParamSpec::required("path", ParamType::String, "Path to the directory")]
    }

    fn permission(&self) -> Permission {
        Permission::READ
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<String, ToolError> {
        let args: Args = serde_json::from_value(arguments)
            .map_err(|e| ToolError::invalid_arguments(NAME, e.to_string()))?;
        let path = self.sandbox.check_path(NAME, &ctx.resolve(&args.path))?;

        let mut reader = tokio::fs::read_dir(&path)
            .await
            .map_err(|e| ToolError::execution(NAME, e))?;
        let mut names = Vec::new();
        while let Some(entry) = reader
            .next_entry()
            .await
            .map_err(|e| ToolError::execution(NAME, e))?
        {
            let mut name = entry.file_name().to_string_lossy().into_owned();
            if entry.file_type().await.is_ok_and(|t| t.is_dir()) {
                name.push('/');
            }
            names.push(name);
        }
        names.sort();
        Ok(names.join("\n"))
    }
}
