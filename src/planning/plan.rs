//! Plan graph
//!
//! A plan is a DAG of steps kept in proposal order. Validation happens
//! once, when the plan is built; afterwards only step status changes.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::{Result, StepwiseError};

/// Status of a plan step
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    /// Waiting on dependencies
    #[default]
    Pending,
    /// All dependencies done
    Ready,
    Running,
    Done,
    Failed,
    /// Failed, and the planner chose to carry on without it
    Skipped,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::Ready => "ready",
            StepStatus::Running => "running",
            StepStatus::Done => "done",
            StepStatus::Failed => "failed",
            StepStatus::Skipped => "skipped",
        }
    }

    fn marker(&self) -> &'static str {
        match self {
            StepStatus::Pending | StepStatus::Ready => "[ ]",
            StepStatus::Running => "[→]",
            StepStatus::Done => "[✓]",
            StepStatus::Failed => "[✗]",
            StepStatus::Skipped => "[-]",
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single step in a plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    /// Unique identifier within the plan
    pub id: String,
    /// What this step should achieve
    pub description: String,
    /// Steps that must be done first
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub status: StepStatus,
    /// How many times the step has been started
    #[serde(default)]
    pub attempts: u32,
    /// Summary of the last run, or its error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

impl PlanStep {
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            depends_on: Vec::new(),
            status: StepStatus::Pending,
            attempts: 0,
            result: None,
        }
    }

    /// Add a dependency; repeats are ignored
    pub fn depends_on(mut self, id: impl Into<String>) -> Self {
        let id = id.into();
        if !self.depends_on.contains(&id) {
            self.depends_on.push(id);
        }
        self
    }
}

/// A goal decomposed into dependent steps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub goal: String,
    pub steps: Vec<PlanStep>,
}

impl Plan {
    /// Build and validate a plan
    pub fn new(goal: impl Into<String>, steps: Vec<PlanStep>) -> Result<Self> {
        let plan = Self {
            goal: goal.into(),
            steps,
        };
        plan.validate()?;
        Ok(plan)
    }

    /// Build a plan from `propose_plan` tool arguments
    pub fn from_proposal(goal: impl Into<String>, args: &Map<String, Value>) -> Result<Self> {
        let raw_steps = args
            .get("steps")
            .and_then(Value::as_array)
            .ok_or_else(|| StepwiseError::plan("proposal has no 'steps' array"))?;

        let mut steps = Vec::with_capacity(raw_steps.len());
        for (i, raw) in raw_steps.iter().enumerate() {
            let id = match raw.get("id") {
                Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
                Some(Value::Number(n)) => n.to_string(),
                _ => format!("s{}", i + 1),
            };
            let description = raw
                .get("description")
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|d| !d.is_empty())
                .ok_or_else(|| {
                    StepwiseError::plan(format!("step '{}' has no description", id))
                })?;

            let mut step = PlanStep::new(id, description);
            if let Some(deps) = raw.get("depends_on").and_then(Value::as_array) {
                for dep in deps {
                    let dep = match dep {
                        Value::String(s) => s.trim().to_string(),
                        Value::Number(n) => n.to_string(),
                        other => {
                            return Err(StepwiseError::plan(format!(
                                "step '{}' has a non-string dependency {}",
                                step.id, other
                            )))
                        }
                    };
                    step = step.depends_on(dep);
                }
            }
            steps.push(step);
        }

        Self::new(goal, steps)
    }

    /// Reject empty plans, duplicate or undefined ids, and cycles
    pub fn validate(&self) -> Result<()> {
        if self.steps.is_empty() {
            return Err(StepwiseError::plan("plan has no steps"));
        }

        let mut ids = HashSet::new();
        for step in &self.steps {
            if !ids.insert(step.id.as_str()) {
                return Err(StepwiseError::plan(format!("duplicate step id '{}'", step.id)));
            }
        }

        for step in &self.steps {
            for dep in &step.depends_on {
                if dep == &step.id {
                    return Err(StepwiseError::plan(format!(
                        "step '{}' depends on itself",
                        step.id
                    )));
                }
                if !ids.contains(dep.as_str()) {
                    return Err(StepwiseError::plan(format!(
                        "step '{}' depends on undefined step '{}'",
                        step.id, dep
                    )));
                }
            }
        }

        // Kahn's algorithm: whatever cannot be ordered sits on a cycle
        let mut in_degree: HashMap<&str, usize> = self
            .steps
            .iter()
            .map(|s| {
                let distinct: HashSet<&str> = s.depends_on.iter().map(String::as_str).collect();
                (s.id.as_str(), distinct.len())
            })
            .collect();
        let mut queue: VecDeque<&str> = self
            .steps
            .iter()
            .filter(|s| s.depends_on.is_empty())
            .map(|s| s.id.as_str())
            .collect();
        let mut ordered = 0;

        while let Some(id) = queue.pop_front() {
            ordered += 1;
            for step in self.steps.iter().filter(|s| s.depends_on.iter().any(|d| d == id)) {
                if let Some(degree) = in_degree.get_mut(step.id.as_str()) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(step.id.as_str());
                    }
                }
            }
        }

        if ordered < self.steps.len() {
            let mut cyclic: Vec<&str> = in_degree
                .into_iter()
                .filter(|(_, d)| *d > 0)
                .map(|(id, _)| id)
                .collect();
            cyclic.sort_unstable();
            return Err(StepwiseError::plan(format!(
                "dependency cycle between steps {}",
                cyclic.join(", ")
            )));
        }
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&PlanStep> {
        self.steps.iter().find(|s| s.id == id)
    }

    /// Promote pending steps whose dependencies are all done
    pub fn refresh_readiness(&mut self) {
        let done: HashSet<String> = self
            .steps
            .iter()
            .filter(|s| s.status == StepStatus::Done)
            .map(|s| s.id.clone())
            .collect();

        for step in &mut self.steps {
            if step.status == StepStatus::Pending && step.depends_on.iter().all(|d| done.contains(d))
            {
                step.status = StepStatus::Ready;
            }
        }
    }

    /// Indices of ready steps, in plan order
    pub fn ready_steps(&self) -> Vec<usize> {
        self.steps
            .iter()
            .enumerate()
            .filter(|(_, s)| s.status == StepStatus::Ready)
            .map(|(i, _)| i)
            .collect()
    }

    /// Ids of the steps that depend directly on `id`
    pub fn dependents(&self, id: &str) -> Vec<&str> {
        self.steps
            .iter()
            .filter(|s| s.depends_on.iter().any(|d| d == id))
            .map(|s| s.id.as_str())
            .collect()
    }

    /// Whether every step is done or skipped
    pub fn is_finished(&self) -> bool {
        self.steps
            .iter()
            .all(|s| matches!(s.status, StepStatus::Done | StepStatus::Skipped))
    }

    pub fn count(&self, status: StepStatus) -> usize {
        self.steps.iter().filter(|s| s.status == status).count()
    }

    /// Status listing of every step
    pub fn render(&self) -> String {
        let mut out = format!("Plan: {}\n", self.goal);
        out.push_str(&format!(
            "Progress: {}/{} steps done\n",
            self.count(StepStatus::Done),
            self.steps.len()
        ));
        for step in &self.steps {
            out.push_str(&format!(
                "{} {}: {}",
                step.status.marker(),
                step.id,
                step.description
            ));
            if !step.depends_on.is_empty() {
                out.push_str(&format!(" (after {})", step.depends_on.join(", ")));
            }
            out.push('\n');
        }
        out
    }
}
