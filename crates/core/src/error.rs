//! Error types for graph compilation and tool invocation.

use serde::{Deserialize, Serialize};

/// Why a workflow description was rejected before any node ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    ParseError,
    DuplicateNodeId,
    UnknownTool,
    NoStartNode,
    AmbiguousStartNode,
    NoSinkNode,
    AmbiguousSinkNode,
    CycleDetected,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::ParseError => "ParseError",
            ErrorKind::DuplicateNodeId => "DuplicateNodeId",
            ErrorKind::UnknownTool => "UnknownTool",
            ErrorKind::NoStartNode => "NoStartNode",
            ErrorKind::AmbiguousStartNode => "AmbiguousStartNode",
            ErrorKind::NoSinkNode => "NoSinkNode",
            ErrorKind::AmbiguousSinkNode => "AmbiguousSinkNode",
            ErrorKind::CycleDetected => "CycleDetected",
        };
        f.write_str(name)
    }
}

/// Pre-run failure. Once a run has started no `EngineError` is produced.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {detail}")]
pub struct EngineError {
    pub kind: ErrorKind,
    pub detail: String,
}

impl EngineError {
    pub fn new(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    pub fn parse(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::ParseError, detail)
    }
}

/// Structural validation reports through the same type as the engine.
pub type ValidationError = EngineError;

/// Node-local failure returned by a tool. Never aborts a run.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ToolError {
    #[error("tool not found: {0}")]
    NotFound(String),

    #[error("missing required parameter: {0}")]
    MissingParameter(String),

    #[error("invalid parameter {name}: {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("request failed: {0}")]
    Request(String),

    #[error("{0}")]
    Failed(String),
}

impl ToolError {
    pub fn invalid(name: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::InvalidParameter {
            name: name.into(),
            reason: reason.to_string(),
        }
    }
}
