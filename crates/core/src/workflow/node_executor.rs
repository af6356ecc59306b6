use super::dag::PlannedNode;
use crate::error::ToolError;
use crate::tools::{ToolContext, ToolOutput, ToolRegistry};
use crate::types::RunState;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;

/// Resolves a planned node's tool and invokes it under the per-node timeout
pub struct NodeExecutor {
    registry: Arc<ToolRegistry>,
    timeout: Duration,
}

impl NodeExecutor {
    pub fn new(registry: Arc<ToolRegistry>, timeout: Duration) -> Self {
        Self { registry, timeout }
    }

    pub async fn execute(
        &self,
        node: &PlannedNode,
        state: RunState,
    ) -> Result<ToolOutput, ToolError> {
        let tool = self
            .registry
            .get(&node.tool_name)
            .ok_or_else(|| ToolError::NotFound(node.tool_name.clone()))?;

        let ctx = ToolContext {
            node_id: node.id.clone(),
            timeout: self.timeout,
        };

        tracing::debug!("Invoking tool {} for node {}", node.tool_name, node.id);

        let start = Instant::now();
        let result = match timeout(self.timeout, tool.invoke(state, &node.parameters, &ctx)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!("Node {} timed out after {:?}", node.id, self.timeout);
                Err(ToolError::Timeout(self.timeout))
            }
        };

        tracing::debug!("Node {} finished in {:?}", node.id, start.elapsed());

        result
    }
}
