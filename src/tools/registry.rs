//! Tool registry - manages and dispatches tool calls
//!
//! Central hub for registering tools and routing tool calls to handlers.
//! Registration happens at startup; afterwards the registry is shared
//! read-only behind an `Arc`.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde_json::Value;

use crate::core::{Config, Result, StepwiseError, ToolDefinition, ToolResult};
use crate::tools::browser::BrowserUseTool;
use crate::tools::file_saver::FileSaver;
use crate::tools::python_execute::PythonExecute;
use crate::tools::terminate::Terminate;
use crate::tools::tool::Tool;
use crate::tools::web_search::WebSearch;

/// Registry of available tools
pub struct ToolRegistry {
    /// Tools in registration order
    tools: Vec<Arc<dyn Tool>>,
    /// Name to position in `tools`
    index: HashMap<String, usize>,
    /// Upper bound for a single invocation
    timeout: Option<Duration>,
}

impl ToolRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            tools: Vec::new(),
            index: HashMap::new(),
            timeout: None,
        }
    }

    /// Bound every invocation by `timeout`
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Registry with the built-in general purpose tools
    ///
    /// The file saver is passed in so the caller can start a new session
    /// folder per request.
    pub fn with_defaults(config: &Config, file_saver: Arc<FileSaver>) -> Result<Self> {
        let mut registry = Self::new().with_timeout(config.tool_timeout());
        registry.register(Arc::new(PythonExecute::new(config.tool_timeout())))?;
        if config.search.enabled {
            registry.register(Arc::new(WebSearch::new(
                &config.search.endpoint,
                config.search.max_results,
                config.tool_timeout(),
            )?))?;
        }
        if config.browser.enabled {
            registry.register(Arc::new(BrowserUseTool::new(
                &config.browser.session_name,
                config.browser.headed,
            )))?;
        }
        registry.register(file_saver)?;
        registry.register(Arc::new(Terminate))?;
        Ok(registry)
    }

    /// Register a tool under its declared name
    ///
    /// Fails instead of shadowing an existing tool.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<()> {
        let name = tool.name().to_string();
        if self.index.contains_key(&name) {
            return Err(StepwiseError::DuplicateTool(name));
        }
        tracing::debug!(tool = %name, "Registered tool");
        self.index.insert(name, self.tools.len());
        self.tools.push(tool);
        Ok(())
    }

    /// Schema descriptors for every tool, in registration order
    pub fn describe_all(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.definition()).collect()
    }

    /// Look up a tool by name
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.index.get(name).map(|&i| &self.tools[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Whether `name` is a registered terminal tool
    pub fn is_terminal(&self, name: &str) -> bool {
        self.get(name).is_some_and(|t| t.is_terminal())
    }

    /// Tool names in registration order
    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Invoke a tool by name
    ///
    /// Never fails: unknown tools, tool errors, panics and timeouts all come
    /// back as a `ToolResult` with `error` set.
    pub async fn invoke(&self, name: &str, args: Value) -> ToolResult {
        let tool = match self.get(name) {
            Some(tool) => Arc::clone(tool),
            None => {
                tracing::warn!(tool = %name, "Unknown tool requested");
                return ToolResult::failure(StepwiseError::UnknownTool(name.to_string()).to_string());
            }
        };

        let call = AssertUnwindSafe(tool.execute(args)).catch_unwind();
        let outcome = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    tracing::warn!(tool = %name, "Tool timed out after {:?}", limit);
                    return ToolResult::failure(format!(
                        "Tool '{}' timed out after {}s",
                        name,
                        limit.as_secs_f64()
                    ));
                }
            },
            None => call.await,
        };

        match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                tracing::warn!(tool = %name, error = %e, "Tool failed");
                ToolResult::failure(format!("Tool '{}' encountered a problem: {}", name, e))
            }
            Err(panic) => {
                let reason = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                tracing::error!(tool = %name, "Tool panicked: {}", reason);
                ToolResult::failure(format!("Tool '{}' crashed: {}", name, reason))
            }
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
