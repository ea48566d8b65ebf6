//! Planning flow tests
//!
//! Plan generation, wave execution over the dependency graph, and recovery
//! decisions, all against routed model endpoints.

mod common;

use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use common::{gateway, registry, Reply, RoutedEndpoint, ScriptedEndpoint, TrackingEndpoint};
use serde_json::json;
use stepwise::agent::Agent;
use stepwise::core::{Config, StepwiseError};
use stepwise::flow::{run_flow, AppContext, Flow};
use stepwise::llm::{CompletionRequest, ModelEndpoint};
use stepwise::planning::{
    Plan, PlanAbortHandle, PlanOrchestrator, PlanStatus, PlanStep, StepStatus,
    DECIDE_RECOVERY_TOOL, PROPOSE_PLAN_TOOL,
};

/// Id of the step an agent request is working on, if any
fn current_step(request: &CompletionRequest) -> Option<String> {
    request.messages.iter().find_map(|m| {
        m.text()
            .lines()
            .find_map(|line| line.strip_prefix("Current step: "))
            .and_then(|rest| rest.split(" - ").next())
            .map(str::to_string)
    })
}

fn is_planner_call(request: &CompletionRequest, tool: &str) -> bool {
    request.tool_names() == vec![tool]
}

fn decision(choice: &str) -> Reply {
    Reply::call(
        "d1",
        DECIDE_RECOVERY_TOOL,
        &json!({"decision": choice, "reason": "test"}).to_string(),
    )
}

fn finish_step() -> Reply {
    Reply::call("t1", "terminate", r#"{"status": "success"}"#)
}

fn orchestrator(endpoint: Arc<dyn ModelEndpoint>) -> PlanOrchestrator {
    let gateway = gateway(endpoint, 1);
    let template = Agent::builder("step")
        .gateway(gateway.clone())
        .tools(registry())
        .max_steps(3);
    PlanOrchestrator::new(gateway, template)
}

/// a and b are independent, c needs both
fn diamond() -> Plan {
    Plan::new(
        "ship it",
        vec![
            PlanStep::new("a", "build"),
            PlanStep::new("b", "write notes"),
            PlanStep::new("c", "publish").depends_on("a").depends_on("b"),
        ],
    )
    .unwrap()
}

#[tokio::test]
async fn test_abort_after_failure_leaves_remaining_steps_untouched() {
    let endpoint = RoutedEndpoint::new(|request| {
        if is_planner_call(request, DECIDE_RECOVERY_TOOL) {
            return decision("abort");
        }
        match current_step(request).as_deref() {
            Some("a") => Reply::Fatal("compiler exploded".to_string()),
            _ => finish_step(),
        }
    });
    let planner = orchestrator(endpoint.clone());
    let mut plan = diamond();

    let report = planner.execute_plan(&mut plan).await.unwrap();

    assert!(report.is_aborted());
    assert_eq!(report.step("a").unwrap().status, StepStatus::Failed);
    assert_eq!(report.step("b").unwrap().status, StepStatus::Done);
    assert_eq!(report.step("c").unwrap().status, StepStatus::Pending);
    assert_eq!(report.step("c").unwrap().attempts, 0);
    assert!(report
        .step("a")
        .unwrap()
        .result
        .as_deref()
        .unwrap()
        .contains("compiler exploded"));
    assert!(report.to_string().starts_with("Plan aborted: step 'a' failed: test"));
}

fn chain() -> Plan {
    Plan::new(
        "g",
        vec![
            PlanStep::new("a", "fetch"),
            PlanStep::new("b", "use").depends_on("a"),
        ],
    )
    .unwrap()
}

#[tokio::test]
async fn test_reported_failure_fails_the_step() {
    let endpoint = RoutedEndpoint::new(|request| {
        if is_planner_call(request, DECIDE_RECOVERY_TOOL) {
            return decision("abort");
        }
        match current_step(request).as_deref() {
            Some("a") => Reply::call("t1", "terminate", r#"{"status": "failure"}"#),
            _ => finish_step(),
        }
    });
    let planner = orchestrator(endpoint);
    let mut plan = chain();

    let report = planner.execute_plan(&mut plan).await.unwrap();

    assert!(report.is_aborted());
    let a = report.step("a").unwrap();
    assert_eq!(a.status, StepStatus::Failed);
    assert!(a.result.as_deref().unwrap().contains("reported failure"));
    assert_eq!(report.step("b").unwrap().status, StepStatus::Pending);
}

#[tokio::test]
async fn test_step_limit_fails_the_step() {
    let endpoint = RoutedEndpoint::new(|request| {
        if is_planner_call(request, DECIDE_RECOVERY_TOOL) {
            return decision("abort");
        }
        Reply::call("e1", "echo", r#"{"text": "still going"}"#)
    });
    let planner = orchestrator(endpoint);
    let mut plan = chain();

    let report = planner.execute_plan(&mut plan).await.unwrap();

    assert!(report.is_aborted());
    let a = report.step("a").unwrap();
    assert_eq!(a.status, StepStatus::Failed);
    assert!(a.result.as_deref().unwrap().contains("step limit (3)"));
    assert_eq!(report.step("b").unwrap().attempts, 0);
}

#[tokio::test]
async fn test_retries_are_capped() {
    let decisions = Arc::new(Mutex::new(0usize));
    let counter = Arc::clone(&decisions);
    let endpoint = RoutedEndpoint::new(move |request| {
        if is_planner_call(request, DECIDE_RECOVERY_TOOL) {
            *counter.lock().unwrap() += 1;
            return decision("retry");
        }
        Reply::Fatal("always broken".to_string())
    });
    let planner = orchestrator(endpoint).max_step_retries(2);
    let mut plan = Plan::new("g", vec![PlanStep::new("a", "flaky")]).unwrap();

    let report = planner.execute_plan(&mut plan).await.unwrap();

    let step = report.step("a").unwrap();
    assert_eq!(step.attempts, 3);
    assert_eq!(step.status, StepStatus::Failed);
    assert_eq!(*decisions.lock().unwrap(), 2);
    match report.status {
        PlanStatus::Aborted { ref reason } => {
            assert!(reason.contains("failed after 3 attempt(s)"))
        }
        PlanStatus::Completed => panic!("plan should have aborted"),
    }
}

#[tokio::test]
async fn test_skip_with_dependents_becomes_abort() {
    let endpoint = RoutedEndpoint::new(|request| {
        if is_planner_call(request, DECIDE_RECOVERY_TOOL) {
            return decision("skip");
        }
        match current_step(request).as_deref() {
            Some("a") => Reply::Fatal("nope".to_string()),
            _ => finish_step(),
        }
    });
    let planner = orchestrator(endpoint);
    let mut plan = Plan::new(
        "g",
        vec![
            PlanStep::new("a", "fetch"),
            PlanStep::new("b", "use").depends_on("a"),
        ],
    )
    .unwrap();

    let report = planner.execute_plan(&mut plan).await.unwrap();

    match report.status {
        PlanStatus::Aborted { ref reason } => assert!(reason.contains("cannot be skipped")),
        PlanStatus::Completed => panic!("skip must not strand dependents"),
    }
    assert_eq!(report.step("b").unwrap().status, StepStatus::Pending);
}

#[tokio::test]
async fn test_skip_without_dependents_lets_the_plan_complete() {
    let endpoint = RoutedEndpoint::new(|request| {
        if is_planner_call(request, DECIDE_RECOVERY_TOOL) {
            return decision("skip");
        }
        match current_step(request).as_deref() {
            Some("a") => Reply::Fatal("optional step failed".to_string()),
            _ => finish_step(),
        }
    });
    let planner = orchestrator(endpoint);
    let mut plan = Plan::new(
        "g",
        vec![
            PlanStep::new("a", "nice to have"),
            PlanStep::new("b", "draft"),
            PlanStep::new("c", "finalise").depends_on("b"),
        ],
    )
    .unwrap();

    let report = planner.execute_plan(&mut plan).await.unwrap();

    assert_eq!(report.status, PlanStatus::Completed);
    assert_eq!(report.step("a").unwrap().status, StepStatus::Skipped);
    assert_eq!(report.step("b").unwrap().status, StepStatus::Done);
    assert_eq!(report.step("c").unwrap().status, StepStatus::Done);
    assert!(report.to_string().starts_with("Plan completed: 2/3 steps done"));
}

#[tokio::test]
async fn test_dependent_step_runs_after_and_sees_results() {
    let seen = Arc::new(Mutex::new(Vec::<(String, String)>::new()));
    let log = Arc::clone(&seen);
    let endpoint = RoutedEndpoint::new(move |request| {
        if let Some(id) = current_step(request) {
            let first = request
                .messages
                .iter()
                .find(|m| m.text().contains("Current step: "))
                .map(|m| m.text().to_string())
                .unwrap_or_default();
            log.lock().unwrap().push((id, first));
        }
        finish_step()
    });
    let planner = orchestrator(endpoint);
    let mut plan = diamond();

    let report = planner.execute_plan(&mut plan).await.unwrap();
    assert_eq!(report.status, PlanStatus::Completed);

    let seen = seen.lock().unwrap();
    let order: Vec<&str> = seen.iter().map(|(id, _)| id.as_str()).collect();
    assert_eq!(order.len(), 3);
    assert_eq!(order[2], "c");

    let c_request = &seen[2].1;
    assert!(c_request.contains("Results of the steps this one depends on:"));
    assert!(c_request.contains("### a (build)"));
    assert!(c_request.contains("### b (write notes)"));
    assert!(!seen[0].1.contains("Results of the steps"));
}

#[tokio::test]
async fn test_abort_handle_stops_before_first_wave() {
    let endpoint = RoutedEndpoint::new(|_| finish_step());
    let planner = orchestrator(endpoint.clone());
    planner.abort_handle().abort();
    let mut plan = diamond();

    let report = planner.execute_plan(&mut plan).await.unwrap();

    assert_eq!(
        report.status,
        PlanStatus::Aborted {
            reason: "aborted by caller".to_string()
        }
    );
    assert_eq!(endpoint.calls(), 0);
    assert!(report
        .steps
        .iter()
        .all(|s| s.status == StepStatus::Pending && s.attempts == 0));
}

#[tokio::test]
async fn test_abort_during_a_wave_lets_it_finish_then_stops() {
    let slot: Arc<OnceLock<PlanAbortHandle>> = Arc::new(OnceLock::new());
    let handle = Arc::clone(&slot);
    let endpoint = RoutedEndpoint::new(move |request| {
        if current_step(request).as_deref() == Some("a") {
            if let Some(handle) = handle.get() {
                handle.abort();
            }
        }
        finish_step()
    });
    let planner = orchestrator(endpoint.clone());
    slot.set(planner.abort_handle()).unwrap();
    let mut plan = chain();

    let report = planner.execute_plan(&mut plan).await.unwrap();

    assert_eq!(
        report.status,
        PlanStatus::Aborted {
            reason: "aborted by caller".to_string()
        }
    );
    // The running step completed; the next wave was never dispatched
    assert_eq!(report.step("a").unwrap().status, StepStatus::Done);
    assert_eq!(report.step("b").unwrap().status, StepStatus::Pending);
    assert_eq!(report.step("b").unwrap().attempts, 0);
    assert_eq!(endpoint.calls(), 1);
}

#[tokio::test]
async fn test_waves_run_concurrently_within_the_bound() {
    let endpoint = TrackingEndpoint::new(Duration::from_millis(50), |_| finish_step());
    let planner = orchestrator(endpoint.clone()).max_concurrency(2);
    let mut plan = Plan::new(
        "g",
        (1..=5)
            .map(|i| PlanStep::new(format!("s{}", i), "independent work"))
            .collect(),
    )
    .unwrap();

    let report = planner.execute_plan(&mut plan).await.unwrap();

    assert_eq!(report.status, PlanStatus::Completed);
    assert!(report.steps.iter().all(|s| s.status == StepStatus::Done));
    assert_eq!(endpoint.calls(), 5);
    assert_eq!(endpoint.peak(), 2);
}

#[tokio::test]
async fn test_failed_recovery_call_aborts() {
    let endpoint = RoutedEndpoint::new(|request| {
        if is_planner_call(request, DECIDE_RECOVERY_TOOL) {
            return Reply::Fatal("model unavailable".to_string());
        }
        Reply::Fatal("step broke".to_string())
    });
    let planner = orchestrator(endpoint);
    let mut plan = Plan::new("g", vec![PlanStep::new("a", "only")]).unwrap();

    let report = planner.execute_plan(&mut plan).await.unwrap();

    match report.status {
        PlanStatus::Aborted { ref reason } => assert!(reason.contains("could not decide")),
        PlanStatus::Completed => panic!("plan should have aborted"),
    }
}

#[tokio::test]
async fn test_cyclic_proposal_is_sent_back_once() {
    let cyclic = json!({"steps": [
        {"id": "a", "description": "first", "depends_on": ["b"]},
        {"id": "b", "description": "second", "depends_on": ["a"]}
    ]});
    let valid = json!({"steps": [
        {"id": "a", "description": "first"},
        {"id": "b", "description": "second", "depends_on": ["a"]}
    ]});
    let endpoint = ScriptedEndpoint::new(vec![
        Reply::call("p1", PROPOSE_PLAN_TOOL, &cyclic.to_string()),
        Reply::call("p2", PROPOSE_PLAN_TOOL, &valid.to_string()),
    ]);
    let planner = orchestrator(endpoint.clone());

    let plan = planner.create_plan("two things").await.unwrap();

    assert_eq!(plan.steps.len(), 2);
    assert_eq!(plan.steps[1].depends_on, vec!["a".to_string()]);
    let requests = endpoint.requests();
    assert_eq!(requests.len(), 2);
    assert!(requests[1]
        .messages
        .last()
        .unwrap()
        .text()
        .contains("The previous plan was rejected: "));
    assert!(requests[1].messages.last().unwrap().text().contains("cycle"));
}

#[tokio::test]
async fn test_two_invalid_proposals_fail() {
    let empty = json!({"steps": []}).to_string();
    let endpoint = ScriptedEndpoint::new(vec![
        Reply::call("p1", PROPOSE_PLAN_TOOL, &empty),
        Reply::call("p2", PROPOSE_PLAN_TOOL, &empty),
    ]);
    let planner = orchestrator(endpoint.clone());

    let err = planner.create_plan("nothing").await.unwrap_err();

    assert!(matches!(err, StepwiseError::PlanValidation(_)));
    assert_eq!(endpoint.calls(), 2);
}

#[tokio::test]
async fn test_planning_flow_reports_aborted_plan_as_failure() {
    let endpoint = RoutedEndpoint::new(|request| {
        if is_planner_call(request, PROPOSE_PLAN_TOOL) {
            let plan = json!({"steps": [{"id": "a", "description": "doomed"}]});
            return Reply::call("p1", PROPOSE_PLAN_TOOL, &plan.to_string());
        }
        if is_planner_call(request, DECIDE_RECOVERY_TOOL) {
            return decision("abort");
        }
        Reply::Fatal("step broke".to_string())
    });
    let ctx = AppContext::with_parts(Config::default(), gateway(endpoint, 1), registry());

    let outcome = run_flow(&ctx, Flow::Planning, "do the doomed thing").await.unwrap();

    assert!(outcome.failed);
    assert!(outcome.summary.starts_with("Plan aborted:"));
    assert!(outcome.summary.contains("[failed] a: doomed"));
}
