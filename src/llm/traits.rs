//! Model endpoint trait for abstracting different backends
//!
//! The gateway only ever talks to a `ModelEndpoint`, so any OpenAI-compatible
//! server (or a scripted double in tests) can sit behind it.

use async_trait::async_trait;

use crate::core::{Message, Result, ToolCall, ToolChoice, ToolDefinition};

/// One request to the model endpoint
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// Model identifier
    pub model: String,
    /// Messages in conversation order, system messages first
    pub messages: Vec<Message>,
    /// Tool schemas offered to the model
    pub tools: Option<Vec<ToolDefinition>>,
    /// Tool selection mode, only sent together with `tools`
    pub tool_choice: Option<ToolChoice>,
    /// Sampling temperature
    pub temperature: Option<f32>,
    /// Maximum tokens to generate
    pub max_tokens: Option<u32>,
}

impl CompletionRequest {
    /// Whether the request offers any tools
    pub fn has_tools(&self) -> bool {
        self.tools.as_ref().is_some_and(|t| !t.is_empty())
    }

    /// Names of the offered tools
    pub fn tool_names(&self) -> Vec<&str> {
        self.tools
            .iter()
            .flatten()
            .map(|t| t.function.name.as_str())
            .collect()
    }
}

/// Response from the model endpoint
#[derive(Debug, Clone, Default)]
pub struct Completion {
    /// Text content of the response
    pub content: Option<String>,
    /// Any tool calls the model wants to make, in emitted order
    pub tool_calls: Vec<ToolCall>,
    /// Token usage information
    pub usage: Option<TokenUsage>,
    /// Model that generated the response
    pub model: String,
}

impl Completion {
    /// A plain text completion
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Default::default()
        }
    }

    /// A completion that only selects tools
    pub fn tools(tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls,
            ..Default::default()
        }
    }

    /// Non-empty text content, if any
    pub fn text_content(&self) -> Option<&str> {
        self.content.as_deref().filter(|c| !c.trim().is_empty())
    }
}

/// Token usage information
#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Trait for model endpoints
///
/// Implementations map their failures onto `TransientGateway` (worth
/// retrying) or `FatalGateway` (never retried).
#[async_trait]
pub trait ModelEndpoint: Send + Sync {
    /// Send one request and return the parsed response
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion>;

    /// Get the endpoint name
    fn name(&self) -> &str;
}
