//! LLM module - language model access
//!
//! Provides the endpoint abstraction, an OpenAI-compatible client, and the
//! gateway that adds budgeting and bounded retries on top.

pub mod gateway;
pub mod openai;
pub mod retry;
pub mod traits;

pub use gateway::{estimate_tokens, fit_to_budget, GatewaySettings, ModelGateway};
pub use openai::OpenAiClient;
pub use retry::RetryPolicy;
pub use traits::{Completion, CompletionRequest, ModelEndpoint, TokenUsage};
