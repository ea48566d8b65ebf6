//! Model gateway
//!
//! Every model call in the crate goes through `ModelGateway`: it fits the
//! conversation into the token budget, shapes the request, and applies the
//! bounded retry policy around the endpoint.

use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;

use crate::core::{Config, Message, Result, Role, StepwiseError, ToolChoice, ToolDefinition};
use crate::llm::openai::OpenAiClient;
use crate::llm::retry::RetryPolicy;
use crate::llm::traits::{Completion, CompletionRequest, ModelEndpoint};

/// Fixed per-message overhead used by the token estimate
const MESSAGE_OVERHEAD_TOKENS: usize = 4;

/// Request shaping and retry settings
#[derive(Debug, Clone)]
pub struct GatewaySettings {
    pub model: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// Estimated token budget for one request
    pub token_budget: usize,
    /// Timeout applied to each attempt
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
}

impl GatewaySettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            model: config.llm.model.clone(),
            temperature: Some(config.llm.temperature),
            max_tokens: Some(config.llm.max_tokens),
            token_budget: config.llm.token_budget,
            request_timeout: config.request_timeout(),
            retry: RetryPolicy::from_config(config),
        }
    }
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// What a response must contain to count as a success
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expect {
    Text,
    ToolCall,
    Anything,
}

/// Mediates all calls to the language model
#[derive(Clone)]
pub struct ModelGateway {
    endpoint: Arc<dyn ModelEndpoint>,
    settings: GatewaySettings,
}

impl ModelGateway {
    pub fn new(endpoint: Arc<dyn ModelEndpoint>, settings: GatewaySettings) -> Self {
        Self { endpoint, settings }
    }

    /// Gateway backed by the OpenAI-compatible client
    pub fn from_config(config: &Config) -> Result<Self> {
        let client = OpenAiClient::from_config(config)?;
        Ok(Self::new(
            Arc::new(client),
            GatewaySettings::from_config(config),
        ))
    }

    pub fn settings(&self) -> &GatewaySettings {
        &self.settings
    }

    pub fn endpoint_name(&self) -> &str {
        self.endpoint.name()
    }

    /// Plain completion without tools
    pub async fn ask(&self, messages: &[Message], system_messages: &[Message]) -> Result<String> {
        let request = CompletionRequest {
            model: self.settings.model.clone(),
            messages: self.format_messages(messages, system_messages)?,
            tools: None,
            tool_choice: None,
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_tokens,
        };

        let completion = self.send_with_retry(&request, Expect::Text).await?;
        Ok(completion.content.unwrap_or_default())
    }

    /// Completion that may select tools
    ///
    /// With `ToolChoice::Required` a response without tool calls fails
    /// validation and is retried like a transient failure.
    pub async fn ask_with_tools(
        &self,
        messages: &[Message],
        system_messages: &[Message],
        tools: &[ToolDefinition],
        tool_choice: ToolChoice,
    ) -> Result<Completion> {
        if tool_choice == ToolChoice::Required && tools.is_empty() {
            return Err(StepwiseError::fatal(
                "tool_choice 'required' needs at least one tool",
            ));
        }

        let request = CompletionRequest {
            model: self.settings.model.clone(),
            messages: self.format_messages(messages, system_messages)?,
            tools: Some(tools.to_vec()),
            tool_choice: Some(tool_choice),
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_tokens,
        };

        let expect = match tool_choice {
            ToolChoice::Required => Expect::ToolCall,
            _ => Expect::Anything,
        };
        self.send_with_retry(&request, expect).await
    }

    /// System messages followed by the conversation, trimmed to the budget
    pub fn format_messages(
        &self,
        messages: &[Message],
        system_messages: &[Message],
    ) -> Result<Vec<Message>> {
        fit_to_budget(system_messages, messages, self.settings.token_budget)
    }

    async fn send_with_retry(
        &self,
        request: &CompletionRequest,
        expect: Expect,
    ) -> Result<Completion> {
        let policy = &self.settings.retry;
        let timeout = self.settings.request_timeout;
        let mut failures: u32 = 0;

        loop {
            let attempt = failures + 1;
            tracing::debug!(
                endpoint = self.endpoint.name(),
                attempt,
                max_attempts = policy.max_attempts,
                messages = request.messages.len(),
                tools = request.tool_names().len(),
                "Calling model"
            );

            let outcome = match tokio::time::timeout(timeout, self.endpoint.complete(request)).await
            {
                Ok(Ok(completion)) => validate(completion, expect),
                Ok(Err(e)) => Err(e),
                Err(_) => Err(StepwiseError::transient(format!(
                    "Model call timed out after {}s",
                    timeout.as_secs_f64()
                ))),
            };

            match outcome {
                Ok(completion) => {
                    if let Some(ref usage) = completion.usage {
                        tracing::debug!(
                            prompt_tokens = usage.prompt_tokens,
                            completion_tokens = usage.completion_tokens,
                            "Model usage"
                        );
                    }
                    if attempt > 1 {
                        tracing::info!(attempt, "Model call succeeded after retry");
                    }
                    return Ok(completion);
                }
                Err(e) if !e.is_transient() => {
                    tracing::error!(attempt, error = %e, "Model call failed, not retrying");
                    return Err(e);
                }
                Err(e) => {
                    failures += 1;
                    if failures >= policy.max_attempts {
                        tracing::error!(
                            attempts = failures,
                            error = %e,
                            "Model call failed, retries exhausted"
                        );
                        return Err(StepwiseError::GatewayExhausted {
                            attempts: failures,
                            last_cause: e.to_string(),
                        });
                    }

                    let delay = policy.delay_for(failures);
                    tracing::warn!(
                        attempt,
                        max_attempts = policy.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient model failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

fn validate(completion: Completion, expect: Expect) -> Result<Completion> {
    match expect {
        Expect::ToolCall if completion.tool_calls.is_empty() => Err(StepwiseError::transient(
            "Tool call required but none provided",
        )),
        Expect::Text if completion.text_content().is_none() => {
            Err(StepwiseError::transient("Empty response from model"))
        }
        _ => Ok(completion),
    }
}

/// Rough token estimate: four characters per token plus message overhead
pub fn estimate_tokens(messages: &[Message]) -> usize {
    messages.iter().map(estimate_message_tokens).sum()
}

fn estimate_message_tokens(message: &Message) -> usize {
    let mut chars = message.text().chars().count();
    for call in &message.tool_calls {
        chars += call.name.chars().count() + call.arguments.chars().count();
    }
    chars.div_ceil(4) + MESSAGE_OVERHEAD_TOKENS
}

/// Index where the most recent exchange starts
///
/// That is the last assistant turn with everything that follows it. Before
/// the model has spoken the whole request is the recent exchange, so the
/// task and the next-step hint appended after it are kept together.
fn recent_exchange_start(messages: &[Message]) -> usize {
    messages
        .iter()
        .rposition(|m| m.role == Role::Assistant)
        .unwrap_or(0)
}

/// Droppable groups before `end`: an assistant turn with tool calls and its
/// tool results go together; system messages are never part of a group.
fn droppable_groups(messages: &[Message], end: usize) -> Vec<Range<usize>> {
    let mut groups = Vec::new();
    let mut i = 0;
    while i < end {
        match messages[i].role {
            Role::System => i += 1,
            Role::Assistant if messages[i].has_tool_calls() => {
                let start = i;
                i += 1;
                while i < end && messages[i].role == Role::Tool {
                    i += 1;
                }
                groups.push(start..i);
            }
            _ => {
                groups.push(i..i + 1);
                i += 1;
            }
        }
    }
    groups
}

/// Drop the oldest non-system messages until the request fits `budget`
///
/// Order is preserved; system messages and the most recent exchange are
/// always kept.
pub fn fit_to_budget(
    system_messages: &[Message],
    messages: &[Message],
    budget: usize,
) -> Result<Vec<Message>> {
    let mut total = estimate_tokens(system_messages) + estimate_tokens(messages);
    let mut keep = vec![true; messages.len()];

    if total > budget {
        let protected = recent_exchange_start(messages);
        let mut dropped = 0;
        for group in droppable_groups(messages, protected) {
            if total <= budget {
                break;
            }
            for idx in group {
                keep[idx] = false;
                total -= estimate_message_tokens(&messages[idx]);
                dropped += 1;
            }
        }

        if total > budget {
            return Err(StepwiseError::TokenBudgetExceeded {
                needed: total,
                budget,
            });
        }
        tracing::debug!(dropped, total, budget, "Trimmed request to token budget");
    }

    Ok(system_messages
        .iter()
        .cloned()
        .chain(
            messages
                .iter()
                .zip(keep)
                .filter(|(_, keep)| *keep)
                .map(|(m, _)| m.clone()),
        )
        .collect())
}
