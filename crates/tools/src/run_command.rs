//! `run_command`: execute an allow-listed program through `sh -c`.
//!
//! Requires the execute permission, so it is absent from the registry
//! unless configuration grants it.

use crate::sandbox::Sandbox;
use async_trait::async_trait;
use kiln_core::{ParamSpec, ParamType, Permission, Tool, ToolContext, ToolError};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

const NAME: &str = "run_command";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Deserialize)]
struct Args {
    command: String,
}

pub struct RunCommandTool {
    sandbox: Arc<Sandbox>,
    timeout: Duration,
}

impl RunCommandTool {
    pub fn new(sandbox: Arc<Sandbox>) -> Self {
        Self {
            sandbox,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl Tool for RunCommandTool {
    fn name(&self) -> &str {
        NAME
    }

    fn description(&self) -> &str {
        "Run a whitelisted shell command in the working directory and return its output"
    }

    fn parameters(&self) -> Vec<ParamSpec> {
        vec![ParamSpec::required("command", ParamType::String, "The command line to run")]
    }

    fn permission(&self) -> Permission {
        Permission::EXECUTE
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<String, ToolError> {
        let args: Args = serde_json::from_value(arguments)
            .map_err(|e| ToolError::invalid_arguments(NAME, e.to_string()))?;
        let command = args.command.trim();

        if !self.sandbox.is_command_allowed(command) {
            return Err(ToolError::PermissionDenied {
                tool_name: NAME.into(),
                reason: format!("Command '{command}' is not allowed"),
            });
        }

        debug!(command = %command, "Executing command");
        let mut cmd = Command::new("sh");
        cmd.args(["-c", command]).kill_on_drop(true);
        if let Some(dir) = &ctx.working_dir {
            cmd.current_dir(dir);
        }

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| {
                ToolError::execution(
                    NAME,
                    std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        format!("command timed out after {}s", self.timeout.as_secs()),
                    ),
                )
            })?
            .map_err(|e| ToolError::execution(NAME, e))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let text = if output.status.success() {
            if stderr.is_empty() {
                stdout.into_owned()
            } else {
                format!("{stdout}\n[stderr]: {stderr}")
            }
        } else {
            let code = output.status.code().unwrap_or(-1);
            warn!(command = %command, exit_code = code, "Command failed");
            format!("[exit code: {code}]\n{stdout}\n{stderr}")
        };
        Ok(text.trim().to_string())
    }
}
