use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Unique identifier for one workflow execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a node, unique within one graph
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-node tool parameters. Ordered so diagnostics and schemas are stable.
pub type Parameters = BTreeMap<String, String>;

/// The payload threaded from node to node during one execution.
///
/// `primary` is what tools consume and produce by default; `api_key` and
/// `auxiliary_context` are side channels individual tools read or overwrite.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunState {
    pub primary: String,
    pub api_key: String,
    pub auxiliary_context: String,
}

impl RunState {
    pub fn new(input: impl Into<String>) -> Self {
        Self {
            primary: input.into(),
            ..Default::default()
        }
    }
}

/// Status of a node within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// Execution record of a single node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeExecution {
    pub id: NodeId,
    pub tool_name: String,
    pub status: NodeStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl NodeExecution {
    /// Record for a planned node that has not started yet
    pub fn pending(id: NodeId, tool_name: impl Into<String>) -> Self {
        Self {
            id,
            tool_name: tool_name.into(),
            status: NodeStatus::Pending,
            started_at: None,
            completed_at: None,
            error: None,
        }
    }

    pub fn start(&mut self) {
        self.status = NodeStatus::Processing;
        self.started_at = Some(Utc::now());
    }

    /// `Completed` without an error, `Failed` with one
    pub fn finish(&mut self, error: Option<String>) {
        self.status = if error.is_some() {
            NodeStatus::Failed
        } else {
            NodeStatus::Completed
        };
        self.error = error;
        self.completed_at = Some(Utc::now());
    }
}

/// Outcome of a finished run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub run_id: RunId,
    pub final_output: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    /// Node records in plan order
    pub nodes: Vec<NodeExecution>,
}

impl ExecutionResult {
    pub fn failed_nodes(&self) -> impl Iterator<Item = &NodeExecution> {
        self.nodes
            .iter()
            .filter(|n| n.status == NodeStatus::Failed)
    }
}
