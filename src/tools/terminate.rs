//! Terminate tool
//!
//! Ends the agent loop once the model decides the request is handled.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::core::{Result, StepwiseError, ToolResult};
use crate::tools::tool::{optional_str, Tool};

pub const TERMINATE_TOOL: &str = "terminate";

/// Terminal tool that finishes the interaction
#[derive(Debug, Clone, Copy, Default)]
pub struct Terminate;

#[async_trait]
impl Tool for Terminate {
    fn name(&self) -> &str {
        TERMINATE_TOOL
    }

    fn description(&self) -> &str {
        "Terminate the interaction when the request is met OR if the assistant cannot proceed further with the task."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "status": {
                    "type": "string",
                    "description": "The finish status of the interaction.",
                    "enum": ["success", "failure"]
                }
            }
        })
    }

    async fn execute(&self, args: Value) -> Result<ToolResult> {
        let status = optional_str(&args, "status").unwrap_or("success");
        if status != "success" && status != "failure" {
            return Err(StepwiseError::tool(format!(
                "Invalid status '{}': expected 'success' or 'failure'",
                status
            )));
        }
        Ok(ToolResult::success(format!(
            "The interaction has been completed with status: {}",
            status
        )))
    }

    fn is_terminal(&self) -> bool {
        true
    }
}
