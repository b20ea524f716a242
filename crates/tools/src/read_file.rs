//! `read_file`: return a file's contents.

use crate::sandbox::Sandbox;
use async_trait::async_trait;
use kiln_core::{ParamSpec, ParamType, Permission, Tool, ToolContext, ToolError};
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

const NAME: &str = "read_file";

#[derive(Deserialize)]
struct Args {
    path: String,
}

pub struct ReadFileTool {
    sandbox: Arc<Sandbox>,
}

impl ReadFileTool {
    pub fn new(sandbox: Arc<Sandbox>) -> Self {
        Self { sandbox }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        NAME
    }

    fn description(&self) -> &str {
        "Read the contents of a file"
    }

    fn parameters(&self) -> Vec<ParamSpec> {
        vec![ParamSpec::required(
            "path",
            ParamType::String,
            "Path to the file (relative paths resolve against the working directory)",
        )]
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

        debug!(path = %path.display(), "Reading file");
        tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| ToolError::execution(NAME, e))
    }
}
