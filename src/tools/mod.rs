//! Tools module - Tool implementations for the agent
//!
//! Contains the tool contract, the registry, and the built-in tools.

pub mod browser;
pub mod file_saver;
pub mod python_execute;
pub mod registry;
pub mod terminate;
pub mod tool;
pub mod web_search;

pub use browser::BrowserUseTool;
pub use file_saver::FileSaver;
pub use python_execute::PythonExecute;
pub use registry::ToolRegistry;
pub use terminate::{Terminate, TERMINATE_TOOL};
pub use tool::Tool;
pub use web_search::WebSearch;
