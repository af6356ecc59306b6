// Core types and the workflow engine for Toolgraph

pub mod error;
pub mod events;
pub mod tools;
pub mod types;
pub mod workflow;

pub use error::{EngineError, ErrorKind, ToolError, ValidationError};
pub use types::*;
pub use workflow::WorkflowEngine;
