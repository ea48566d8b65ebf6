//! OpenAI-compatible chat completions client
//!
//! Works against any server exposing `POST {base_url}/chat/completions`
//! (OpenAI, Azure-style proxies, Ollama's `/v1`, vLLM, ...).

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

use crate::core::{Config, Message, Result, StepwiseError, ToolCall, ToolDefinition};
use crate::llm::traits::{Completion, CompletionRequest, ModelEndpoint, TokenUsage};

/// OpenAI-compatible API client
#[derive(Clone)]
pub struct OpenAiClient {
    client: Client,
    url: String,
    api_key: Option<String>,
}

/// Chat completions request body
#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<&'a [ToolDefinition]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

/// Message in the wire format
#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
}

/// Tool call in the wire format
#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireToolCall {
    #[serde(default)]
    id: String,
    #[serde(rename = "type", default = "function_type")]
    call_type: String,
    function: WireFunction,
}

fn function_type() -> String {
    "function".to_string()
}

/// Function in a wire tool call; arguments stay a raw string
#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

/// Chat completions response body
#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    model: String,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: WireMessage,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}

impl OpenAiClient {
    /// Create a new client from configuration
    pub fn from_config(config: &Config) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            client,
            url: config.completions_url(),
            api_key: config.llm.api_key.clone(),
        })
    }

    /// Create a client for a custom completions URL
    pub fn with_url(url: impl Into<String>, api_key: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()?;

        Ok(Self {
            client,
            url: url.into(),
            api_key,
        })
    }

    /// Convert internal Message to the wire format
    fn to_wire_message(msg: &Message) -> WireMessage {
        let tool_calls = if msg.tool_calls.is_empty() {
            None
        } else {
            Some(
                msg.tool_calls
                    .iter()
                    .map(|tc| WireToolCall {
                        id: tc.id.clone(),
                        call_type: function_type(),
                        function: WireFunction {
                            name: tc.name.clone(),
                            arguments: tc.arguments.clone(),
                        },
                    })
                    .collect(),
            )
        };

        WireMessage {
            role: msg.role.as_str().to_string(),
            content: msg.content.clone(),
            tool_calls,
            tool_call_id: msg.tool_call_id.clone(),
            name: msg.name.clone(),
        }
    }

    /// Convert a response body to a Completion
    fn to_completion(response: ChatResponse) -> Result<Completion> {
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| StepwiseError::transient("Response contained no choices"))?;

        let wire_calls = choice.message.tool_calls.unwrap_or_default();
        // Some servers omit ids; results must still be matchable, so filled
        // in ids stay clear of the ones the server did send
        let mut taken: HashSet<String> = wire_calls
            .iter()
            .filter(|tc| !tc.id.is_empty())
            .map(|tc| tc.id.clone())
            .collect();
        let tool_calls = wire_calls
            .into_iter()
            .enumerate()
            .map(|(i, tc)| {
                let id = if tc.id.is_empty() {
                    let mut n = i;
                    while taken.contains(&format!("call_{}", n)) {
                        n += 1;
                    }
                    let id = format!("call_{}", n);
                    taken.insert(id.clone());
                    id
                } else {
                    tc.id
                };
                ToolCall::new(id, tc.function.name, tc.function.arguments)
            })
            .collect();

        Ok(Completion {
            content: choice.message.content,
            tool_calls,
            usage: response.usage.map(|u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            }),
            model: response.model,
        })
    }
}

/// Map an unsuccessful HTTP status onto the gateway error taxonomy
pub fn classify_status(status: StatusCode, body: &str) -> StepwiseError {
    let message = format!("API error ({}): {}", status, truncate(body, 500));
    let transient = status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::CONFLICT
        || status.is_server_error();

    if transient {
        StepwiseError::transient(message)
    } else {
        StepwiseError::fatal(message)
    }
}

/// Map a transport failure onto the gateway error taxonomy
fn classify_transport(err: reqwest::Error, url: &str) -> StepwiseError {
    if err.is_connect() {
        StepwiseError::transient(format!("Cannot connect to {}: {}", url, err))
    } else if err.is_timeout() {
        StepwiseError::transient(format!("Request to {} timed out", url))
    } else if err.is_builder() {
        StepwiseError::fatal(format!("Invalid request: {}", err))
    } else {
        StepwiseError::transient(format!("Transport error: {}", err))
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let head: String = text.chars().take(max_chars).collect();
        format!("{}...", head)
    }
}

#[async_trait]
impl ModelEndpoint for OpenAiClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion> {
        let body = ChatRequest {
            model: &request.model,
            messages: request.messages.iter().map(Self::to_wire_message).collect(),
            tools: request.tools.as_deref().filter(|t| !t.is_empty()),
            tool_choice: if request.has_tools() {
                request.tool_choice.map(|c| c.as_str())
            } else {
                None
            },
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };

        tracing::trace!(
            "Request body: {}",
            truncate(&serde_json::to_string(&body)?, 2000)
        );

        let mut builder = self.client.post(&self.url).json(&body);
        if let Some(ref key) = self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| classify_transport(e, &self.url))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &error_text));
        }

        let response_text = response
            .text()
            .await
            .map_err(|e| classify_transport(e, &self.url))?;
        tracing::trace!("Response body: {}", truncate(&response_text, 2000));

        let chat_response: ChatResponse = serde_json::from_str(&response_text)
            .map_err(|e| StepwiseError::fatal(format!("Failed to parse response: {}", e)))?;

        Self::to_completion(chat_response)
    }

    fn name(&self) -> &str {
        "openai-compatible"
    }
}
