//! Python execution tool
//!
//! Runs a snippet with the system `python3` and reports what it printed.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::process::Command;

use crate::core::{Result, StepwiseError, ToolResult};
use crate::tools::tool::{required_str, Tool};

/// Executes Python code in a subprocess
pub struct PythonExecute {
    interpreter: String,
    timeout: Duration,
}

impl PythonExecute {
    pub fn new(timeout: Duration) -> Self {
        Self {
            interpreter: "python3".to_string(),
            timeout,
        }
    }

    /// Use a different interpreter binary
    pub fn with_interpreter(mut self, interpreter: impl Into<String>) -> Self {
        self.interpreter = interpreter.into();
        self
    }
}

#[async_trait]
impl Tool for PythonExecute {
    fn name(&self) -> &str {
        "python_execute"
    }

    fn description(&self) -> &str {
        "Executes Python code string. Note: Only print outputs are visible, function return values are not captured. Use print statements to see results."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "code": {
                    "type": "string",
                    "description": "The Python code to execute."
                }
            },
            "required": ["code"]
        })
    }

    async fn execute(&self, args: Value) -> Result<ToolResult> {
        let code = required_str(&args, "code")?;

        let mut cmd = Command::new(&self.interpreter);
        cmd.arg("-c")
            .arg(code)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(output) => output.map_err(|e| {
                StepwiseError::tool(format!("Failed to run {}: {}", self.interpreter, e))
            })?,
            Err(_) => {
                return Ok(ToolResult::failure(format!(
                    "Execution timed out after {}s",
                    self.timeout.as_secs_f64()
                )))
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if output.status.success() {
            Ok(ToolResult::success(stdout))
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let error = match stderr.trim() {
                "" => format!("Process exited with {}", output.status),
                text => text.to_string(),
            };
            let mut result = ToolResult::failure(error);
            if !stdout.is_empty() {
                result.output = Some(stdout);
            }
            Ok(result)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_interpreter_is_error() {
        let tool = PythonExecute::new(Duration::from_secs(5))
            .with_interpreter("definitely-not-a-python-binary");
        assert!(tool.execute(json!({"code": "print(1)"})).await.is_err());
    }

    #[tokio::test]
    async fn test_missing_code_argument() {
        let tool = PythonExecute::new(Duration::from_secs(5));
        assert!(tool.execute(json!({})).await.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_silent_nonzero_exit_is_an_error() {
        let tool = PythonExecute::new(Duration::from_secs(5)).with_interpreter("sh");
        let result = tool.execute(json!({"code": "echo partial; exit 3"})).await.unwrap();
        assert!(result.is_error());
        assert!(result.error.unwrap().contains("3"));
        assert_eq!(result.output.as_deref(), Some("partial\n"));
    }
}
