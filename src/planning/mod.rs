//! Planning - goal decomposition and dependency-aware execution

pub mod orchestrator;
pub mod plan;

pub use orchestrator::{
    PlanAbortHandle, PlanOrchestrator, PlanReport, PlanStatus, Recovery, DECIDE_RECOVERY_TOOL,
    PROPOSE_PLAN_TOOL,
};
pub use plan::{Plan, PlanStep, StepStatus};
