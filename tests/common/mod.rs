//! Shared test doubles: scripted and routed model endpoints, simple tools

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use stepwise::core::{Result, StepwiseError, ToolCall, ToolResult};
use stepwise::llm::{
    Completion, CompletionRequest, GatewaySettings, ModelEndpoint, ModelGateway, RetryPolicy,
};
use stepwise::tools::{Terminate, Tool, ToolRegistry};

/// One canned endpoint reply
#[derive(Debug, Clone)]
pub enum Reply {
    Ok(Completion),
    Transient(String),
    Fatal(String),
}

impl Reply {
    pub fn text(content: &str) -> Self {
        Reply::Ok(Completion::text(content))
    }

    pub fn call(id: &str, name: &str, arguments: &str) -> Self {
        Reply::Ok(Completion::tools(vec![ToolCall::new(id, name, arguments)]))
    }

    pub fn calls(calls: Vec<ToolCall>) -> Self {
        Reply::Ok(Completion::tools(calls))
    }

    fn into_result(self) -> Result<Completion> {
        match self {
            Reply::Ok(completion) => Ok(completion),
            Reply::Transient(msg) => Err(StepwiseError::transient(msg)),
            Reply::Fatal(msg) => Err(StepwiseError::fatal(msg)),
        }
    }
}

/// Endpoint that answers from a fixed script, in order
#[derive(Default)]
pub struct ScriptedEndpoint {
    replies: Mutex<VecDeque<Reply>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedEndpoint {
    pub fn new(replies: Vec<Reply>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelEndpoint for ScriptedEndpoint {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion> {
        self.requests.lock().unwrap().push(request.clone());
        let reply = self.replies.lock().unwrap().pop_front();
        reply
            .unwrap_or_else(|| Reply::Fatal("script exhausted".to_string()))
            .into_result()
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

type Route = dyn Fn(&CompletionRequest) -> Reply + Send + Sync;

/// Endpoint that decides each reply from the request, safe under concurrency
pub struct RoutedEndpoint {
    route: Box<Route>,
    calls: AtomicUsize,
}

impl RoutedEndpoint {
    pub fn new(route: impl Fn(&CompletionRequest) -> Reply + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            route: Box::new(route),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelEndpoint for RoutedEndpoint {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.route)(request).into_result()
    }

    fn name(&self) -> &str {
        "routed"
    }
}

/// Routed endpoint that takes `delay` per call and records peak overlap
pub struct TrackingEndpoint {
    route: Box<Route>,
    delay: Duration,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl TrackingEndpoint {
    pub fn new(
        delay: Duration,
        route: impl Fn(&CompletionRequest) -> Reply + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            route: Box::new(route),
            delay,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Most calls that were ever in flight at once
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelEndpoint for TrackingEndpoint {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        (self.route)(request).into_result()
    }

    fn name(&self) -> &str {
        "tracking"
    }
}

/// Endpoint that never answers in time
pub struct SlowEndpoint(pub Duration);

#[async_trait]
impl ModelEndpoint for SlowEndpoint {
    async fn complete(&self, _request: &CompletionRequest) -> Result<Completion> {
        tokio::time::sleep(self.0).await;
        Ok(Completion::text("too late"))
    }

    fn name(&self) -> &str {
        "slow"
    }
}

/// Gateway without backoff delays
pub fn gateway(endpoint: Arc<dyn ModelEndpoint>, max_attempts: u32) -> ModelGateway {
    let settings = GatewaySettings {
        model: "test-model".to_string(),
        temperature: Some(0.0),
        max_tokens: Some(512),
        token_budget: 100_000,
        request_timeout: Duration::from_secs(5),
        retry: RetryPolicy::immediate(max_attempts),
    };
    ModelGateway::new(endpoint, settings)
}

/// Echoes its `text` argument
pub struct Echo;

#[async_trait]
impl Tool for Echo {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echo the text argument back"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {"text": {"type": "string"}},
            "required": ["text"]
        })
    }

    async fn execute(&self, args: Value) -> Result<ToolResult> {
        let text = args
            .get("text")
            .and_then(Value::as_str)
            .ok_or_else(|| StepwiseError::tool("missing text"))?;
        Ok(ToolResult::success(text))
    }
}

/// Registry with `echo` and `terminate`
pub fn registry() -> Arc<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(Echo)).unwrap();
    registry.register(Arc::new(Terminate)).unwrap();
    Arc::new(registry)
}

/// Registry with only `terminate`
pub fn terminate_only() -> Arc<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(Terminate)).unwrap();
    Arc::new(registry)
}
