//! `write_file`: replace a file's contents, keeping a `.backup` copy of the
//! previous version.

use crate::sandbox::Sandbox;
use async_trait::async_trait;
use kiln_core::{ParamSpec, ParamType, Permission, Tool, ToolContext, ToolError};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

const NAME: &str = "write_file";

#[derive(Deserialize)]
struct Args {
    path: String,
    content: String,
    #[serde(default)]
    reason: Option<String>,
}

pub struct WriteFileTool {
    sandbox: Arc<Sandbox>,
}

impl WriteFileTool {
    pub fn new(sandbox: Arc<Sandbox>) -> Self {
        Self { sandbox }
    }
}

/// `<path>.backup`
pub fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".backup");
    PathBuf::from(name)
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        NAME
    }

    fn description(&self) -> &str {
        "Write or update a file with new content (the previous version is kept as <path>.backup)"
    }

    fn parameters(&self) -> Vec<ParamSpec> {
        vec![
            ParamSpec::required("path", ParamType::String, "Path to the file"),
            ParamSpec::required("content", ParamType::String, "Complete new content of the file"),
            ParamSpec::optional("reason", ParamType::String, "Why this change is being made"),
        ]
    }

    fn permission(&self) -> Permission {
        Permission::WRITE
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<String, ToolError> {
        let args: Args = serde_json::from_value(arguments)
            .map_err(|e| ToolError::invalid_arguments(NAME, e.to_string()))?;
        let path = self.sandbox.check_path(NAME, &ctx.resolve(&args.path))?;

        let mut backed_up = None;
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            let backup = backup_path(&path);
            tokio::fs::copy(&path, &backup)
                .await
                .map_err(|e| ToolError::execution(NAME, e))?;
            backed_up = Some(backup);
        }

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ToolError::execution(NAME, e))?;
        }
        tokio::fs::write(&path, args.content.as_bytes())
            .await
            .map_err(|e| ToolError::execution(NAME, e))?;

        info!(
            path = %path.display(),
            bytes = args.content.len(),
            reason = args.reason.as_deref().unwrap_or(""),
            "File written"
        );
        Ok(match backed_up {
            Some(backup) => format!(
                "File successfully updated: {} (backup: {})",
                path.display(),
                backup.display()
            ),
            None => format!("File successfully created: {}", path.display()),
        })
    }
}
