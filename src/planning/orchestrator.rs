//! Plan orchestrator
//!
//! Asks the model to decompose a goal into a plan, then drives one fresh
//! execution agent per step. Independent ready steps run together in a
//! wave; the orchestrator is the only writer of step status and applies
//! results after each wave completes.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use serde_json::{json, Value};

use crate::agent::prompts::{PLANNING_SYSTEM_PROMPT, RECOVERY_SYSTEM_PROMPT};
use crate::agent::{repair, AgentBuilder, RunOutcome};
use crate::core::{
    Config, Message, Result, StepwiseError, ToolChoice, ToolDefinition,
};
use crate::llm::{Completion, ModelGateway};
use crate::planning::plan::{Plan, PlanStep, StepStatus};

pub const PROPOSE_PLAN_TOOL: &str = "propose_plan";
pub const DECIDE_RECOVERY_TOOL: &str = "decide_recovery";

/// Attempts at generating a valid plan
const PLAN_GENERATION_ATTEMPTS: usize = 2;

/// Lets a caller stop a running plan
///
/// Aborting stops new waves from being dispatched; steps already running
/// finish normally.
#[derive(Debug, Clone, Default)]
pub struct PlanAbortHandle(Arc<AtomicBool>);

impl PlanAbortHandle {
    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// What to do about a failed step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recovery {
    Retry,
    Skip,
    Abort(String),
}

/// Final status of a plan execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanStatus {
    Completed,
    Aborted { reason: String },
}

/// Result of `execute_plan`
#[derive(Debug, Clone)]
pub struct PlanReport {
    pub goal: String,
    pub status: PlanStatus,
    pub steps: Vec<PlanStep>,
}

impl PlanReport {
    fn new(plan: &Plan, status: PlanStatus) -> Self {
        Self {
            goal: plan.goal.clone(),
            status,
            steps: plan.steps.clone(),
        }
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self.status, PlanStatus::Aborted { .. })
    }

    pub fn step(&self, id: &str) -> Option<&PlanStep> {
        self.steps.iter().find(|s| s.id == id)
    }
}

impl fmt::Display for PlanReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let done = self
            .steps
            .iter()
            .filter(|s| s.status == StepStatus::Done)
            .count();
        match self.status {
            PlanStatus::Completed => writeln!(
                f,
                "Plan completed: {}/{} steps done",
                done,
                self.steps.len()
            )?,
            PlanStatus::Aborted { ref reason } => writeln!(
                f,
                "Plan aborted: {} ({}/{} steps done)",
                reason,
                done,
                self.steps.len()
            )?,
        }
        writeln!(f, "Goal: {}", self.goal)?;
        for step in &self.steps {
            write!(f, "\n[{}] {}: {}", step.status, step.id, step.description)?;
            if let Some(ref result) = step.result {
                for line in result.lines() {
                    write!(f, "\n    {}", line)?;
                }
            }
        }
        Ok(())
    }
}

/// Creates plans and drives agents through them
pub struct PlanOrchestrator {
    gateway: ModelGateway,
    /// Template every step agent is built from
    agent_template: AgentBuilder,
    max_concurrency: usize,
    max_step_retries: u32,
    abort: PlanAbortHandle,
}

impl PlanOrchestrator {
    pub fn new(gateway: ModelGateway, agent_template: AgentBuilder) -> Self {
        Self {
            gateway,
            agent_template,
            max_concurrency: 4,
            max_step_retries: 2,
            abort: PlanAbortHandle::default(),
        }
    }

    pub fn from_config(config: &Config, gateway: ModelGateway, agent_template: AgentBuilder) -> Self {
        Self::new(gateway, agent_template)
            .max_concurrency(config.plan.max_concurrency)
            .max_step_retries(config.plan.max_step_retries)
    }

    /// Ready steps run at once per wave (at least 1)
    pub fn max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max.max(1);
        self
    }

    /// Retries allowed per step before abort is forced
    pub fn max_step_retries(mut self, max: u32) -> Self {
        self.max_step_retries = max;
        self
    }

    pub fn abort_handle(&self) -> PlanAbortHandle {
        self.abort.clone()
    }

    /// Ask the model for a plan
    ///
    /// An invalid proposal is sent back with the reason once; a second
    /// invalid proposal fails with `PlanValidation`.
    pub async fn create_plan(&self, goal: &str) -> Result<Plan> {
        let tools = [propose_plan_tool()];
        let system = [Message::system(PLANNING_SYSTEM_PROMPT)];
        let mut messages = vec![Message::user(format!(
            "Create a plan for this goal:\n{}",
            goal
        ))];
        let mut last_error = None;

        for attempt in 1..=PLAN_GENERATION_ATTEMPTS {
            let completion = self
                .gateway
                .ask_with_tools(&messages, &system, &tools, ToolChoice::Required)
                .await?;

            match plan_from_completion(goal, &completion) {
                Ok(plan) => {
                    tracing::info!(attempt, steps = plan.steps.len(), "Plan created");
                    tracing::debug!("{}", plan.render());
                    return Ok(plan);
                }
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "Rejected generated plan");
                    messages.push(Message::user(format!(
                        "The previous plan was rejected: {}\nPropose a corrected plan.",
                        e
                    )));
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| StepwiseError::plan("no plan was proposed")))
    }

    /// Run the plan to completion or abort
    ///
    /// A step is done only when its agent finished the task; an error, the
    /// step limit, the stuck guard, or a terminal `failure` status all count
    /// as a failed step. Step failures and aborts are reported in the
    /// returned `PlanReport`; only an invalid plan surfaces as `Err`.
    pub async fn execute_plan(&self, plan: &mut Plan) -> Result<PlanReport> {
        plan.validate()?;
        let mut wave = 0;

        loop {
            if self.abort.is_aborted() {
                tracing::warn!("Plan aborted by caller");
                return Ok(PlanReport::new(
                    plan,
                    PlanStatus::Aborted {
                        reason: "aborted by caller".to_string(),
                    },
                ));
            }

            plan.refresh_readiness();
            let ready: Vec<usize> = plan
                .ready_steps()
                .into_iter()
                .take(self.max_concurrency)
                .collect();

            if ready.is_empty() {
                let status = if plan.is_finished() {
                    PlanStatus::Completed
                } else {
                    PlanStatus::Aborted {
                        reason: "no runnable steps remain".to_string(),
                    }
                };
                tracing::info!(?status, "Plan execution ended");
                return Ok(PlanReport::new(plan, status));
            }

            wave += 1;
            let requests: Vec<(usize, String)> = ready
                .iter()
                .map(|&i| (i, step_request(plan, i)))
                .collect();
            for &i in &ready {
                let step = &mut plan.steps[i];
                step.status = StepStatus::Running;
                step.attempts += 1;
            }
            tracing::info!(
                wave,
                steps = ?ready.iter().map(|&i| plan.steps[i].id.as_str()).collect::<Vec<_>>(),
                "Dispatching plan wave"
            );

            let runs = requests.into_iter().map(|(i, request)| {
                let builder = self
                    .agent_template
                    .clone()
                    .name(format!("step-{}", plan.steps[i].id));
                async move {
                    let outcome = match builder.build() {
                        Ok(mut agent) => match agent.run(Some(&request)).await {
                            Ok(summary) if agent.outcome().is_some_and(RunOutcome::is_success) => {
                                Ok(summary)
                            }
                            Ok(summary) => Err(summary),
                            Err(e) => Err(e.to_string()),
                        },
                        Err(e) => Err(e.to_string()),
                    };
                    (i, outcome)
                }
            });
            let outcomes = join_all(runs).await;

            let mut failed = Vec::new();
            for (i, outcome) in outcomes {
                let step = &mut plan.steps[i];
                match outcome {
                    Ok(summary) => {
                        tracing::info!(step = %step.id, "Step done");
                        step.status = StepStatus::Done;
                        step.result = Some(summary);
                    }
                    Err(reason) => {
                        tracing::warn!(step = %step.id, attempt = step.attempts, %reason, "Step failed");
                        step.status = StepStatus::Failed;
                        step.result = Some(reason);
                        failed.push(i);
                    }
                }
            }

            for i in failed {
                match self.decide_recovery(plan, i).await {
                    Recovery::Retry => {
                        tracing::info!(step = %plan.steps[i].id, "Retrying step");
                        plan.steps[i].status = StepStatus::Pending;
                    }
                    Recovery::Skip => {
                        tracing::info!(step = %plan.steps[i].id, "Skipping step");
                        plan.steps[i].status = StepStatus::Skipped;
                    }
                    Recovery::Abort(reason) => {
                        tracing::warn!(step = %plan.steps[i].id, %reason, "Aborting plan");
                        return Ok(PlanReport::new(plan, PlanStatus::Aborted { reason }));
                    }
                }
            }
        }
    }

    /// Decide how to continue after step `index` failed
    async fn decide_recovery(&self, plan: &Plan, index: usize) -> Recovery {
        let step = &plan.steps[index];
        if step.attempts > self.max_step_retries {
            return Recovery::Abort(format!(
                "step '{}' failed after {} attempt(s)",
                step.id, step.attempts
            ));
        }

        let error = step.result.as_deref().unwrap_or("unknown error");
        let messages = [Message::user(format!(
            "Goal: {}\n\n{}\nStep '{}' ({}) failed on attempt {} of {}:\n{}\n\nSteps depending on it: {}\nHow should the plan continue?",
            plan.goal,
            plan.render(),
            step.id,
            step.description,
            step.attempts,
            self.max_step_retries + 1,
            error,
            match plan.dependents(&step.id) {
                deps if deps.is_empty() => "none".to_string(),
                deps => deps.join(", "),
            }
        ))];
        let system = [Message::system(RECOVERY_SYSTEM_PROMPT)];

        let completion = match self
            .gateway
            .ask_with_tools(&messages, &system, &[decide_recovery_tool()], ToolChoice::Required)
            .await
        {
            Ok(completion) => completion,
            Err(e) => {
                return Recovery::Abort(format!(
                    "could not decide how to recover from step '{}': {}",
                    step.id, e
                ))
            }
        };

        let args = completion
            .tool_calls
            .iter()
            .find(|c| c.name == DECIDE_RECOVERY_TOOL)
            .and_then(|c| repair::parse_arguments(&c.name, &c.arguments).ok())
            .unwrap_or_default();
        let reason = args.get("reason").and_then(Value::as_str).unwrap_or("");

        match args.get("decision").and_then(Value::as_str) {
            Some("retry") => Recovery::Retry,
            Some("skip") => {
                let dependents = plan.dependents(&step.id);
                if dependents.is_empty() {
                    Recovery::Skip
                } else {
                    Recovery::Abort(format!(
                        "step '{}' failed and cannot be skipped: {} depend(s) on it",
                        step.id,
                        dependents.join(", ")
                    ))
                }
            }
            Some("abort") => Recovery::Abort(if reason.is_empty() {
                format!("step '{}' failed", step.id)
            } else {
                format!("step '{}' failed: {}", step.id, reason)
            }),
            other => Recovery::Abort(format!(
                "step '{}' failed and no valid recovery was chosen ({:?})",
                step.id, other
            )),
        }
    }
}

fn plan_from_completion(goal: &str, completion: &Completion) -> Result<Plan> {
    let call = completion
        .tool_calls
        .iter()
        .find(|c| c.name == PROPOSE_PLAN_TOOL)
        .ok_or_else(|| StepwiseError::plan("model did not call propose_plan"))?;
    let args = repair::parse_arguments(&call.name, &call.arguments)
        .map_err(|e| StepwiseError::plan(e.to_string()))?;
    Plan::from_proposal(goal, &args)
}

/// Sub-request handed to the agent running step `index`
fn step_request(plan: &Plan, index: usize) -> String {
    let step = &plan.steps[index];
    let mut request = format!(
        "Overall goal: {}\n\n{}\nCurrent step: {} - {}\n",
        plan.goal,
        plan.render(),
        step.id,
        step.description
    );

    let inputs: Vec<String> = step
        .depends_on
        .iter()
        .filter_map(|dep| plan.get(dep))
        .filter_map(|dep| {
            dep.result
                .as_ref()
                .map(|r| format!("### {} ({})\n{}", dep.id, dep.description, r))
        })
        .collect();
    if !inputs.is_empty() {
        request.push_str("\nResults of the steps this one depends on:\n");
        request.push_str(&inputs.join("\n\n"));
        request.push('\n');
    }

    request.push_str("\nComplete only the current step, then call `terminate`.");
    request
}

pub fn propose_plan_tool() -> ToolDefinition {
    ToolDefinition::function(
        PROPOSE_PLAN_TOOL,
        "Propose a plan: an ordered list of steps, each with a unique id, a description and the ids of the steps it depends on.",
        json!({
            "type": "object",
            "properties": {
                "steps": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "id": {"type": "string", "description": "Unique step id, e.g. s1"},
                            "description": {"type": "string", "description": "What the step should achieve"},
                            "depends_on": {
                                "type": "array",
                                "items": {"type": "string"},
                                "description": "Ids of steps that must finish first"
                            }
                        },
                        "required": ["id", "description"]
                    }
                }
            },
            "required": ["steps"]
        }),
    )
}

pub fn decide_recovery_tool() -> ToolDefinition {
    ToolDefinition::function(
        DECIDE_RECOVERY_TOOL,
        "Decide how the plan continues after a step failed.",
        json!({
            "type": "object",
            "properties": {
                "decision": {
                    "type": "string",
                    "enum": ["retry", "skip", "abort"]
                },
                "reason": {
                    "type": "string",
                    "description": "Short justification"
                }
            },
            "required": ["decision"]
        }),
    )
}
