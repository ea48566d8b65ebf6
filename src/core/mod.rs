//! Core module - shared infrastructure for stepwise
//!
//! This module contains foundational types, configuration, and error handling
//! used throughout the application.

pub mod config;
pub mod error;
pub mod types;

pub use config::{Config, FlowType, SearchConfig};
pub use error::{Result, StepwiseError};
pub use types::*;
