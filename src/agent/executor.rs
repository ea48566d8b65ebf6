//! Execution agent
//!
//! One flat state machine driving the think → act loop. Behaviour is
//! composed from the pieces handed to [`AgentBuilder`] (prompts, tools,
//! gateway, limits) rather than from a type hierarchy.
//!
//! ```text
//! Idle --run()--> Running --(terminal tool | no action | stuck | step limit)--> Finished
//!                 Running --(gateway or internal fault)--> Error
//! Finished | Error --reset()--> Idle
//! ```

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::agent::memory::Memory;
use crate::agent::prompts::{output_dir_note, NEXT_STEP_PROMPT, SYSTEM_PROMPT};
use crate::agent::repair;
use crate::core::{Config, Message, Result, StepwiseError, ToolCall, ToolChoice, ToolResult};
use crate::llm::ModelGateway;
use crate::tools::ToolRegistry;

/// Lifecycle of an agent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Idle,
    Running,
    Finished,
    Error,
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AgentState::Idle => "idle",
            AgentState::Running => "running",
            AgentState::Finished => "finished",
            AgentState::Error => "error",
        };
        f.write_str(s)
    }
}

/// Why the last run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// A terminal tool completed; `success` is false when it reported
    /// `status: failure`
    Terminated { tool: String, success: bool },
    /// The model produced nothing to act on
    NoAction,
    /// Too many consecutive turns without a tool call
    Stuck { turns: usize },
    /// The step budget ran out
    StepLimit { max_steps: usize },
    /// The run failed with an unrecoverable error
    Errored(String),
}

impl RunOutcome {
    pub fn is_error(&self) -> bool {
        matches!(self, RunOutcome::Errored(_))
    }

    /// Whether the run finished the task it was given
    ///
    /// Hitting the step limit, the stuck guard, or a terminal tool that
    /// reported failure all leave the task undone.
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            RunOutcome::Terminated { success: true, .. } | RunOutcome::NoAction
        )
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutcome::Terminated {
                tool,
                success: true,
            } => write!(f, "finished: terminated by `{}`", tool),
            RunOutcome::Terminated {
                tool,
                success: false,
            } => write!(f, "finished: `{}` reported failure", tool),
            RunOutcome::NoAction => f.write_str("finished: no further action"),
            RunOutcome::Stuck { turns } => write!(
                f,
                "finished: stuck after {} turns without a tool call",
                turns
            ),
            RunOutcome::StepLimit { max_steps } => {
                write!(f, "stopped: step limit ({})", max_steps)
            }
            RunOutcome::Errored(reason) => write!(f, "errored: {}", reason),
        }
    }
}

/// Builder for [`Agent`]
///
/// Cheap to clone, so the planner keeps one template and builds a fresh
/// agent per step.
#[derive(Clone)]
pub struct AgentBuilder {
    name: String,
    system_prompt: String,
    next_step_prompt: Option<String>,
    tools: Option<Arc<ToolRegistry>>,
    gateway: Option<ModelGateway>,
    tool_choice: ToolChoice,
    max_steps: usize,
    stuck_threshold: usize,
    max_messages: usize,
}

impl AgentBuilder {
    /// Create a new builder with the given name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            system_prompt: SYSTEM_PROMPT.to_string(),
            next_step_prompt: None,
            tools: None,
            gateway: None,
            tool_choice: ToolChoice::Auto,
            max_steps: 20,
            stuck_threshold: 3,
            max_messages: 0,
        }
    }

    /// General purpose agent settings taken from the config
    pub fn from_config(name: impl Into<String>, config: &Config) -> Self {
        let mut system_prompt = config
            .agent
            .system_prompt
            .clone()
            .unwrap_or_else(|| SYSTEM_PROMPT.to_string());
        system_prompt.push_str(&output_dir_note(
            &config.agent.output_dir.display().to_string(),
        ));

        Self::new(name)
            .system_prompt(system_prompt)
            .next_step_prompt(NEXT_STEP_PROMPT)
            .max_steps(config.agent.max_steps)
            .stuck_threshold(config.agent.stuck_threshold)
            .max_messages(config.agent.max_history)
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn next_step_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.next_step_prompt = Some(prompt.into());
        self
    }

    pub fn tools(mut self, tools: Arc<ToolRegistry>) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn gateway(mut self, gateway: ModelGateway) -> Self {
        self.gateway = Some(gateway);
        self
    }

    pub fn tool_choice(mut self, choice: ToolChoice) -> Self {
        self.tool_choice = choice;
        self
    }

    pub fn max_steps(mut self, max: usize) -> Self {
        self.max_steps = max;
        self
    }

    /// Consecutive turns without a tool call before the loop gives up
    pub fn stuck_threshold(mut self, turns: usize) -> Self {
        self.stuck_threshold = turns;
        self
    }

    /// Memory cap (0 = unbounded)
    pub fn max_messages(mut self, max: usize) -> Self {
        self.max_messages = max;
        self
    }

    /// Build the agent; a gateway is required
    pub fn build(self) -> Result<Agent> {
        let gateway = self
            .gateway
            .ok_or_else(|| StepwiseError::config("agent needs a model gateway"))?;
        if self.max_steps == 0 {
            return Err(StepwiseError::config("max_steps must be at least 1"));
        }

        Ok(Agent {
            name: self.name,
            system_prompt: self.system_prompt,
            next_step_prompt: self.next_step_prompt,
            tools: self
                .tools
                .unwrap_or_else(|| Arc::new(ToolRegistry::new())),
            gateway,
            tool_choice: self.tool_choice,
            max_steps: self.max_steps,
            stuck_threshold: self.stuck_threshold.max(1),
            state: AgentState::Idle,
            memory: Memory::with_capacity_limit(self.max_messages),
            current_step: 0,
            pending: Vec::new(),
            idle_turns: 0,
            terminated_by: None,
            stop: None,
            outcome: None,
            step_log: Vec::new(),
        })
    }
}

/// Think/act agent
pub struct Agent {
    name: String,
    system_prompt: String,
    next_step_prompt: Option<String>,
    tools: Arc<ToolRegistry>,
    gateway: ModelGateway,
    tool_choice: ToolChoice,
    max_steps: usize,
    stuck_threshold: usize,

    state: AgentState,
    memory: Memory,
    current_step: usize,
    /// Tool calls selected by the last think, consumed by act
    pending: Vec<ToolCall>,
    /// Consecutive turns without any tool call
    idle_turns: usize,
    /// Terminal tool that completed this run, with its reported success
    terminated_by: Option<(String, bool)>,
    /// Why `step()` last asked to stop
    stop: Option<RunOutcome>,
    outcome: Option<RunOutcome>,
    /// One line per executed step
    step_log: Vec<String>,
}

impl Agent {
    pub fn builder(name: impl Into<String>) -> AgentBuilder {
        AgentBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> AgentState {
        self.state
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    pub fn current_step(&self) -> usize {
        self.current_step
    }

    pub fn max_steps(&self) -> usize {
        self.max_steps
    }

    /// How the last run ended, if it has ended
    pub fn outcome(&self) -> Option<&RunOutcome> {
        self.outcome.as_ref()
    }

    /// Run the loop on `request` and return the summary
    ///
    /// Only an idle agent can run; call [`Agent::reset`] to reuse a
    /// finished or failed one.
    pub async fn run(&mut self, request: Option<&str>) -> Result<String> {
        if self.state != AgentState::Idle {
            return Err(StepwiseError::invalid_state(format!(
                "cannot run agent '{}' while it is {}",
                self.name, self.state
            )));
        }

        if let Some(request) = request {
            self.memory.push(Message::user(request));
        }
        self.state = AgentState::Running;
        tracing::info!(agent = %self.name, max_steps = self.max_steps, "Agent started");

        match self.run_loop().await {
            Ok(outcome) => {
                tracing::info!(agent = %self.name, steps = self.current_step, "{}", outcome);
                self.outcome = Some(outcome);
                self.state = AgentState::Finished;
                Ok(self.summary())
            }
            Err(e) => {
                tracing::error!(agent = %self.name, step = self.current_step, error = %e, "Agent failed");
                self.outcome = Some(RunOutcome::Errored(e.to_string()));
                self.state = AgentState::Error;
                Err(e)
            }
        }
    }

    async fn run_loop(&mut self) -> Result<RunOutcome> {
        while self.current_step < self.max_steps {
            self.current_step += 1;
            tracing::info!(
                agent = %self.name,
                "Executing step {}/{}",
                self.current_step,
                self.max_steps
            );

            if !self.step().await? {
                return Ok(self.stop.take().unwrap_or(RunOutcome::NoAction));
            }
        }
        Ok(RunOutcome::StepLimit {
            max_steps: self.max_steps,
        })
    }

    /// One think/act iteration; returns whether the loop should continue
    pub async fn step(&mut self) -> Result<bool> {
        if !self.think().await? {
            self.record_step("Thinking complete - no action needed");
            self.stop = Some(RunOutcome::NoAction);
            return Ok(false);
        }

        let result = self.act().await?;
        self.record_step(&result);

        if let Some((tool, success)) = self.terminated_by.clone() {
            self.stop = Some(RunOutcome::Terminated { tool, success });
            return Ok(false);
        }
        if self.idle_turns >= self.stuck_threshold {
            tracing::warn!(
                agent = %self.name,
                turns = self.idle_turns,
                "No tool calls for several turns, stopping"
            );
            self.stop = Some(RunOutcome::Stuck {
                turns: self.idle_turns,
            });
            return Ok(false);
        }
        Ok(true)
    }

    fn record_step(&mut self, result: &str) {
        self.step_log
            .push(format!("Step {}: {}", self.current_step, result));
    }

    /// Ask the model for the next action
    ///
    /// Returns true when the response has a tool call or non-empty text.
    pub async fn think(&mut self) -> Result<bool> {
        let mut messages = self.memory.messages();
        if let Some(ref hint) = self.next_step_prompt {
            messages.push(Message::user(hint.clone()));
        }
        let system = [Message::system(self.system_prompt.clone())];

        let completion = self
            .gateway
            .ask_with_tools(
                &messages,
                &system,
                &self.tools.describe_all(),
                self.tool_choice,
            )
            .await?;

        let content = completion.text_content().map(str::to_string);
        let mut calls = completion.tool_calls;

        if let Some(ref text) = content {
            tracing::info!(agent = %self.name, "Thoughts: {}", text);
        }
        tracing::info!(agent = %self.name, tools = calls.len(), "Selected tools");

        if self.tool_choice == ToolChoice::None && !calls.is_empty() {
            tracing::warn!(
                agent = %self.name,
                "Model tried to use tools when they weren't available, ignoring"
            );
            calls.clear();
        }
        if !calls.is_empty() {
            tracing::debug!(
                agent = %self.name,
                "Tools being prepared: {:?}",
                calls.iter().map(|c| c.name.as_str()).collect::<Vec<_>>()
            );
        }

        if calls.is_empty() {
            self.idle_turns += 1;
        } else {
            self.idle_turns = 0;
        }

        let proceed = !calls.is_empty() || content.is_some();
        if proceed {
            let message = if calls.is_empty() {
                Message::assistant(content.unwrap_or_default())
            } else {
                Message::from_tool_calls(content, calls.clone())
            };
            self.memory.push(message);
        }
        self.pending = calls;
        Ok(proceed)
    }

    /// Execute the tool calls selected by the last think, in emitted order
    pub async fn act(&mut self) -> Result<String> {
        if self.pending.is_empty() {
            return Ok(self
                .memory
                .last()
                .map(|m| m.text().to_string())
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| "No content or commands to execute".to_string()));
        }

        let calls = std::mem::take(&mut self.pending);
        let mut observations = Vec::with_capacity(calls.len());

        for call in calls {
            let (result, status) = self.execute_call(&call).await;
            let observation = observe(&call.name, &result);
            tracing::info!(
                agent = %self.name,
                tool = %call.name,
                failed = result.is_error(),
                "Tool completed"
            );

            if !result.is_error() && self.tools.is_terminal(&call.name) {
                let success = status.as_deref() != Some("failure");
                tracing::info!(agent = %self.name, tool = %call.name, success, "Terminal tool ended the run");
                self.terminated_by = Some((call.name.clone(), success));
            }

            self.memory.push(Message::tool(
                observation.clone(),
                call.id.clone(),
                call.name.clone(),
            ));
            observations.push(observation);
        }

        Ok(observations.join("\n\n"))
    }

    /// Invoke one call; also returns the `status` argument it carried
    async fn execute_call(&self, call: &ToolCall) -> (ToolResult, Option<String>) {
        let args = match repair::parse_arguments(&call.name, &call.arguments) {
            Ok(map) => map,
            Err(e) => {
                tracing::warn!(
                    agent = %self.name,
                    tool = %call.name,
                    arguments = %call.arguments,
                    "Could not parse tool arguments"
                );
                return (ToolResult::failure(e.to_string()), None);
            }
        };
        let status = args
            .get("status")
            .and_then(Value::as_str)
            .map(str::to_string);

        tracing::info!(agent = %self.name, tool = %call.name, "Activating tool");
        (self.tools.invoke(&call.name, Value::Object(args)).await, status)
    }

    /// Back to idle with empty memory; safe to call repeatedly
    pub fn reset(&mut self) {
        self.state = AgentState::Idle;
        self.memory.clear();
        self.current_step = 0;
        self.pending.clear();
        self.idle_turns = 0;
        self.terminated_by = None;
        self.stop = None;
        self.outcome = None;
        self.step_log.clear();
    }

    /// Step lines followed by how the run ended
    pub fn summary(&self) -> String {
        let mut lines = self.step_log.clone();
        match self.outcome {
            Some(ref outcome) => lines.push(outcome.to_string()),
            None if lines.is_empty() => lines.push("No steps executed".to_string()),
            None => {}
        }
        lines.join("\n")
    }
}

/// Text fed back to the model for one tool result
fn observe(tool: &str, result: &ToolResult) -> String {
    if result.is_error() {
        result.to_string()
    } else if result.is_empty() {
        format!("Cmd `{}` completed with no output", tool)
    } else {
        format!("Observed output of cmd `{}` executed:\n{}", tool, result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observation_format() {
        assert_eq!(
            observe("python_execute", &ToolResult::success("4\n")),
            "Observed output of cmd `python_execute` executed:\n4\n"
        );
        assert_eq!(
            observe("file_saver", &ToolResult::empty()),
            "Cmd `file_saver` completed with no output"
        );
        assert_eq!(
            observe("x", &ToolResult::failure("boom")),
            "Error: boom"
        );
    }

    #[test]
    fn test_outcome_display() {
        assert_eq!(
            RunOutcome::StepLimit { max_steps: 5 }.to_string(),
            "stopped: step limit (5)"
        );
        let done = RunOutcome::Terminated {
            tool: "terminate".into(),
            success: true,
        };
        assert!(done.to_string().starts_with("finished:"));
        assert!(done.is_success());
        let gave_up = RunOutcome::Terminated {
            tool: "terminate".into(),
            success: false,
        };
        assert_eq!(gave_up.to_string(), "finished: `terminate` reported failure");
        assert!(!gave_up.is_success());
        assert!(!RunOutcome::Stuck { turns: 3 }.is_success());
        assert!(!RunOutcome::StepLimit { max_steps: 2 }.is_success());
        assert!(RunOutcome::Errored("x".into()).is_error());
    }

    #[test]
    fn test_builder_requires_gateway() {
        assert!(AgentBuilder::new("a").build().is_err());
    }

    #[test]
    fn test_builder_from_config() {
        let mut config = Config::default();
        config.agent.max_steps = 7;
        let builder = AgentBuilder::from_config("main", &config);
        assert_eq!(builder.max_steps, 7);
        assert!(builder.system_prompt.contains("Output Directory"));
        assert!(builder.next_step_prompt.is_some());
    }
}
