//! Agent module - the think/act execution agent
//!
//! Contains the agent state machine, its memory, prompt text, and the
//! repair layer for model-emitted tool arguments.

pub mod executor;
pub mod memory;
pub mod prompts;
pub mod repair;

pub use executor::{Agent, AgentBuilder, AgentState, RunOutcome};
pub use memory::Memory;
pub use repair::parse_arguments;
