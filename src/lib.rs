//! stepwise - LLM-driven task-execution agent
//!
//! A request goes in, the agent repeatedly asks a language model for the
//! next action, invokes the chosen tool, observes the result, and repeats
//! until the task is done.
//!
//! # Architecture
//!
//! - **Core**: Shared types, configuration, and error handling
//! - **LLM**: Model endpoint abstraction, gateway with retry and token budget
//! - **Tools**: Tool contract, registry, and built-in tools
//! - **Agent**: The think/act state machine and its memory
//! - **Planning**: Goal decomposition into a dependency graph of steps
//! - **Flow**: Explicit runtime context and flow selection
//! - **CLI**: Command-line interface and REPL
//!
//! # Usage
//!
//! ```rust,no_run
//! use stepwise::flow::{run_flow, AppContext, Flow};
//! use stepwise::Config;
//!
//! #[tokio::main]
//! async fn main() -> stepwise::Result<()> {
//!     let ctx = AppContext::from_config(Config::load()?)?;
//!     let outcome = run_flow(&ctx, Flow::Agent, "Write a haiku to haiku.txt").await?;
//!     println!("{}", outcome.summary);
//!     Ok(())
//! }
//! ```

pub mod agent;
pub mod cli;
pub mod core;
pub mod flow;
pub mod llm;
pub mod planning;
pub mod tools;

// Re-export commonly used items
pub use agent::{Agent, AgentBuilder, AgentState, RunOutcome};
pub use cli::Repl;
pub use core::{Config, Result, StepwiseError};
pub use flow::{AppContext, FlowOutcome};
pub use llm::ModelGateway;
pub use planning::{Plan, PlanOrchestrator, PlanReport};
pub use tools::{Tool, ToolRegistry};
