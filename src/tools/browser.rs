//! Browser tool - wraps the agent-browser CLI
//!
//! One browser session per tool instance. Page state is shared between
//! calls, so invocations are serialised by a mutex.

use std::process::Stdio;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::process::Command;
use tokio::sync::Mutex;

use crate::core::{Result, StepwiseError, ToolResult};
use crate::tools::tool::{optional_str, required_str, Tool};

const BROWSER_CLI: &str = "agent-browser";

/// Browser automation via the agent-browser CLI
pub struct BrowserUseTool {
    program: String,
    /// Session name for isolation
    session_name: String,
    /// Whether to run in headed mode
    headed: bool,
    /// Held for the whole duration of one action
    lock: Mutex<()>,
}

impl BrowserUseTool {
    pub fn new(session_name: impl Into<String>, headed: bool) -> Self {
        Self {
            program: BROWSER_CLI.to_string(),
            session_name: session_name.into(),
            headed,
            lock: Mutex::new(()),
        }
    }

    /// Check if agent-browser is installed
    pub async fn is_available() -> bool {
        Command::new(BROWSER_CLI)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }

    /// Run an agent-browser command
    async fn run_command(&self, args: &[&str]) -> Result<String> {
        let mut cmd = Command::new(&self.program);
        cmd.args(["--session", &self.session_name]);

        if self.headed {
            cmd.arg("--headed");
        }

        cmd.args(args);
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        // The registry drops the future on timeout; take the child with it
        cmd.kill_on_drop(true);

        let output = cmd.output().await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StepwiseError::tool(
                    "agent-browser not found. Install with: npm install -g agent-browser && agent-browser install",
                )
            } else {
                StepwiseError::tool(format!("Failed to run agent-browser: {}", e))
            }
        })?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(StepwiseError::tool(format!(
                "agent-browser command failed: {}",
                stderr.trim()
            )))
        }
    }

    async fn snapshot(&self) -> Result<String> {
        self.run_command(&["snapshot", "-i", "--json"]).await
    }

    async fn dispatch(&self, action: &str, args: &Value) -> Result<ToolResult> {
        match action {
            "navigate" => {
                let url = required_str(args, "url")?;
                self.run_command(&["open", url]).await?;
                // Best effort: some pages never go network-idle
                let _ = self.run_command(&["wait", "--load", "networkidle"]).await;
                let snapshot = self.snapshot().await?;
                Ok(ToolResult::success(format!(
                    "Navigated to {}. Page snapshot:\n{}",
                    url, snapshot
                )))
            }
            "click" => {
                let element = required_str(args, "ref")?;
                self.run_command(&["click", element]).await?;
                let snapshot = self.snapshot().await?;
                Ok(ToolResult::success(format!(
                    "Clicked {}. Updated page:\n{}",
                    element, snapshot
                )))
            }
            "fill" => {
                let element = required_str(args, "ref")?;
                let text = required_str(args, "text")?;
                self.run_command(&["fill", element, text]).await?;
                Ok(ToolResult::success(format!("Filled {} with '{}'", element, text)))
            }
            "get_text" => {
                let element = required_str(args, "ref")?;
                let output = self.run_command(&["get", "text", element]).await?;
                Ok(ToolResult::success(output.trim()))
            }
            "snapshot" => Ok(ToolResult::success(self.snapshot().await?)),
            "screenshot" => {
                let mut cmd_args = vec!["screenshot"];
                let path = optional_str(args, "path");
                if let Some(p) = path {
                    cmd_args.push(p);
                }
                if args.get("full_page").and_then(Value::as_bool).unwrap_or(false) {
                    cmd_args.push("--full");
                }
                self.run_command(&cmd_args).await?;
                Ok(ToolResult::success(match path {
                    Some(p) => format!("Screenshot saved to {}", p),
                    None => "Screenshot captured".to_string(),
                }))
            }
            "close" => {
                self.run_command(&["close"]).await?;
                Ok(ToolResult::success("Browser closed"))
            }
            other => Err(StepwiseError::tool(format!(
                "Unknown browser action '{}'",
                other
            ))),
        }
    }
}

#[async_trait]
impl Tool for BrowserUseTool {
    fn name(&self) -> &str {
        "browser_use"
    }

    fn description(&self) -> &str {
        "Interact with a web browser: navigate to URLs, read the page snapshot, click or fill elements by their ref (e.g. e5), read text, take screenshots, and close the session. Each action that changes the page returns an updated snapshot."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": ["navigate", "click", "fill", "get_text", "snapshot", "screenshot", "close"],
                    "description": "The browser action to perform"
                },
                "url": {
                    "type": "string",
                    "description": "URL for 'navigate'"
                },
                "ref": {
                    "type": "string",
                    "description": "Element ref from the latest snapshot for 'click', 'fill' and 'get_text'"
                },
                "text": {
                    "type": "string",
                    "description": "Text for 'fill'"
                },
                "path": {
                    "type": "string",
                    "description": "File path for 'screenshot'"
                },
                "full_page": {
                    "type": "boolean",
                    "description": "Capture the full page for 'screenshot'"
                }
            },
            "required": ["action"]
        })
    }

    async fn execute(&self, args: Value) -> Result<ToolResult> {
        let action = required_str(&args, "action")?;
        let _guard = self.lock.lock().await;
        tracing::debug!(session = %self.session_name, action, "Browser action");
        self.dispatch(action, &args).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_creation() {
        let tool = BrowserUseTool::new("test-session", false);
        assert_eq!(tool.session_name, "test-session");
        assert!(!tool.headed);
        assert_eq!(tool.definition().function.name, "browser_use");
    }

    #[tokio::test]
    async fn test_unknown_action_rejected_before_spawning() {
        let tool = BrowserUseTool::new("test-session", false);
        let err = tool.execute(json!({"action": "teleport"})).await.unwrap_err();
        assert!(err.to_string().contains("teleport"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_abandoned_action_kills_the_cli() {
        use std::os::unix::fs::PermissionsExt;
        use std::time::Duration;

        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("finished");
        let script = dir.path().join("fake-browser");
        std::fs::write(
            &script,
            format!("#!/bin/sh\nsleep 1\ntouch '{}'\n", marker.display()),
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let mut tool = BrowserUseTool::new("test-session", false);
        tool.program = script.display().to_string();
        let action = tool.execute(json!({"action": "snapshot"}));
        assert!(tokio::time::timeout(Duration::from_millis(200), action)
            .await
            .is_err());

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!marker.exists());
    }
}
