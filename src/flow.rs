//! Runtime context and flows
//!
//! Everything a run needs is built once from a `Config` into an
//! [`AppContext`] and passed explicitly; nothing is process-global.

use std::sync::Arc;

use crate::agent::{AgentBuilder, RunOutcome};
use crate::core::{Config, FlowType, Result};
use crate::llm::ModelGateway;
use crate::planning::PlanOrchestrator;
use crate::tools::{FileSaver, ToolRegistry};

/// Which driver handles a request
pub type Flow = FlowType;

/// Shared runtime state for one process
#[derive(Clone)]
pub struct AppContext {
    pub config: Config,
    pub gateway: ModelGateway,
    pub tools: Arc<ToolRegistry>,
    /// Present when the default tools are in use
    file_saver: Option<Arc<FileSaver>>,
}

impl AppContext {
    /// Context with the OpenAI-compatible gateway and the default tools
    pub fn from_config(config: Config) -> Result<Self> {
        let gateway = ModelGateway::from_config(&config)?;
        Self::with_gateway(config, gateway)
    }

    /// Context with a caller-supplied gateway and the default tools
    pub fn with_gateway(config: Config, gateway: ModelGateway) -> Result<Self> {
        let file_saver = Arc::new(FileSaver::new(&config.agent.output_dir));
        let tools = ToolRegistry::with_defaults(&config, Arc::clone(&file_saver))?;
        Ok(Self {
            config,
            gateway,
            tools: Arc::new(tools),
            file_saver: Some(file_saver),
        })
    }

    /// Context with a caller-supplied gateway and tool set
    pub fn with_parts(config: Config, gateway: ModelGateway, tools: Arc<ToolRegistry>) -> Self {
        Self {
            config,
            gateway,
            tools,
            file_saver: None,
        }
    }

    /// Agent template wired to this context
    pub fn agent_builder(&self, name: &str) -> AgentBuilder {
        AgentBuilder::from_config(name, &self.config)
            .gateway(self.gateway.clone())
            .tools(Arc::clone(&self.tools))
    }

    pub fn planner(&self) -> PlanOrchestrator {
        PlanOrchestrator::from_config(
            &self.config,
            self.gateway.clone(),
            self.agent_builder("plan-step"),
        )
    }

    /// Start a new output session so each request keeps its files together
    pub fn begin_request(&self) {
        if let Some(ref saver) = self.file_saver {
            saver.reset_session();
        }
    }
}

/// Result of running one request through a flow
#[derive(Debug, Clone)]
pub struct FlowOutcome {
    pub summary: String,
    /// Whether the task was left undone or the plan was aborted
    pub failed: bool,
}

/// Run `request` through `flow`
///
/// Run failures are reported in the outcome; `Err` is reserved for
/// problems building the agent itself.
pub async fn run_flow(ctx: &AppContext, flow: Flow, request: &str) -> Result<FlowOutcome> {
    ctx.begin_request();
    tracing::info!(%flow, "Processing request");

    match flow {
        FlowType::Agent => {
            let mut agent = ctx.agent_builder("stepwise").build()?;
            match agent.run(Some(request)).await {
                Ok(summary) => Ok(FlowOutcome {
                    failed: !agent.outcome().is_some_and(RunOutcome::is_success),
                    summary,
                }),
                Err(_) => Ok(FlowOutcome {
                    summary: agent.summary(),
                    failed: true,
                }),
            }
        }
        FlowType::Planning => {
            let planner = ctx.planner();
            let mut plan = match planner.create_plan(request).await {
                Ok(plan) => plan,
                Err(e) => {
                    return Ok(FlowOutcome {
                        summary: format!("errored: could not create a plan: {}", e),
                        failed: true,
                    })
                }
            };
            match planner.execute_plan(&mut plan).await {
                Ok(report) => Ok(FlowOutcome {
                    failed: report.is_aborted(),
                    summary: report.to_string(),
                }),
                Err(e) => Ok(FlowOutcome {
                    summary: format!("{}\nerrored: {}", plan.render(), e),
                    failed: true,
                }),
            }
        }
    }
}
