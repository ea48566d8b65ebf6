//! Custom error types for stepwise
//!
//! Provides a unified error handling system across all modules.

use thiserror::Error;

/// Main error type for stepwise operations
#[derive(Error, Debug)]
pub enum StepwiseError {
    /// Retryable model endpoint failure (rate limit, network blip, 5xx, timeout)
    #[error("Transient gateway error: {0}")]
    TransientGateway(String),

    /// Non-retryable model endpoint failure (auth, malformed request)
    #[error("Fatal gateway error: {0}")]
    FatalGateway(String),

    /// All retry attempts were used up
    #[error("Model call failed after {attempts} attempt(s): {last_cause}")]
    GatewayExhausted { attempts: u32, last_cause: String },

    /// Request could not be trimmed below the token budget
    #[error("Request needs ~{needed} tokens but the budget is {budget}")]
    TokenBudgetExceeded { needed: usize, budget: usize },

    /// Tool execution errors
    #[error("Tool execution error: {0}")]
    ToolInvocation(String),

    /// Model-emitted tool arguments that could not be repaired
    #[error("Malformed arguments for tool '{tool}': {reason}")]
    MalformedToolArguments { tool: String, reason: String },

    /// A tool with this name is already registered
    #[error("Tool '{0}' is already registered")]
    DuplicateTool(String),

    /// No tool with this name is registered
    #[error("Unknown tool '{0}'")]
    UnknownTool(String),

    /// Generated plan is cyclic, empty, or references undefined steps
    #[error("Invalid plan: {0}")]
    PlanValidation(String),

    /// Operation not allowed in the agent's current state
    #[error("Invalid agent state: {0}")]
    InvalidState(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON parsing errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error for other cases
    #[error("{0}")]
    Other(String),
}

/// Convenience Result type for stepwise operations
pub type Result<T> = std::result::Result<T, StepwiseError>;

impl StepwiseError {
    /// Create a transient gateway error
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::TransientGateway(msg.into())
    }

    /// Create a fatal gateway error
    pub fn fatal(msg: impl Into<String>) -> Self {
        Self::FatalGateway(msg.into())
    }

    /// Create a tool execution error
    pub fn tool(msg: impl Into<String>) -> Self {
        Self::ToolInvocation(msg.into())
    }

    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a plan validation error
    pub fn plan(msg: impl Into<String>) -> Self {
        Self::PlanValidation(msg.into())
    }

    /// Create an invalid state error
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    /// Create a malformed arguments error
    pub fn malformed(tool: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedToolArguments {
            tool: tool.into(),
            reason: reason.into(),
        }
    }

    /// Whether the gateway may retry after this error
    pub fn is_transient(&self) -> bool {
        match self {
            Self::TransientGateway(_) => true,
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }
}
