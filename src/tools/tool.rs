//! Tool contract
//!
//! Every capability the agent can invoke implements `Tool`. The registry
//! only ever sees this interface.

use async_trait::async_trait;
use serde_json::Value;

use crate::core::{Result, ToolDefinition, ToolResult};

/// A named, schema-described capability
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name the model uses to call the tool
    fn name(&self) -> &str;

    /// What the tool does, shown to the model
    fn description(&self) -> &str;

    /// JSON Schema of the arguments object
    fn parameters_schema(&self) -> Value;

    /// Run the tool with already-parsed arguments
    ///
    /// Returning `Err` is fine: the registry turns it into an error result.
    async fn execute(&self, args: Value) -> Result<ToolResult>;

    /// Whether a successful call ends the agent loop
    fn is_terminal(&self) -> bool {
        false
    }

    /// Schema descriptor sent with model requests
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::function(self.name(), self.description(), self.parameters_schema())
    }
}

/// Read a required string argument
pub fn required_str<'a>(args: &'a Value, key: &str) -> Result<&'a str> {
    args.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| crate::core::StepwiseError::tool(format!("Missing '{}' argument", key)))
}

/// Read an optional string argument
pub fn optional_str<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key).and_then(Value::as_str)
}
