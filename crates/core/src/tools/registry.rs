// Tool contract and name-keyed registry

use crate::error::ToolError;
use crate::types::{NodeId, Parameters, RunState};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// A pluggable capability invoked by a node.
///
/// Tools receive the current run state and the node's parameters and return
/// the updated state plus the output that becomes `primary` downstream. They
/// validate their own parameters and report problems as `ToolError`.
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    /// Schema shown to workflow editors
    fn schema(&self) -> ToolSchema;

    async fn invoke(
        &self,
        state: RunState,
        parameters: &Parameters,
        ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError>;
}

/// Per-invocation context handed to a tool
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub node_id: NodeId,
    /// Upper bound for the whole invocation; network tools pass it on
    pub timeout: Duration,
}

/// What a successful invocation produces
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    pub state: RunState,
    pub output: String,
}

impl ToolOutput {
    pub fn new(state: RunState, output: impl Into<String>) -> Self {
        Self {
            state,
            output: output.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: Vec<ParameterSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    pub label: String,
    #[serde(rename = "type")]
    pub kind: ParameterKind,
}

impl ParameterSpec {
    pub fn text(name: &str, label: &str) -> Self {
        Self {
            name: name.to_string(),
            label: label.to_string(),
            kind: ParameterKind::Text,
        }
    }

    pub fn textarea(name: &str, label: &str) -> Self {
        Self {
            name: name.to_string(),
            label: label.to_string(),
            kind: ParameterKind::Textarea,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterKind {
    Text,
    Textarea,
}

/// Registry of available tools.
///
/// Built once at startup and then shared read-only behind an `Arc`.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    aliases: HashMap<String, String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            aliases: HashMap::new(),
        }
    }

    /// Register a tool under its schema name
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let schema = tool.schema();
        self.tools.insert(schema.name, tool);
    }

    /// Make `alias` resolve to the already registered tool `target`
    pub fn register_alias(&mut self, alias: impl Into<String>, target: &str) -> anyhow::Result<()> {
        if !self.tools.contains_key(target) {
            anyhow::bail!("cannot alias unknown tool {}", target);
        }
        self.aliases.insert(alias.into(), target.to_string());
        Ok(())
    }

    /// Get a tool by name or alias
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        let canonical = self.aliases.get(name).map(String::as_str).unwrap_or(name);
        self.tools.get(canonical).cloned()
    }

    /// Check if a tool exists
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name) || self.aliases.contains_key(name)
    }

    /// List all tool schemas, sorted by name
    pub fn list_schemas(&self) -> Vec<ToolSchema> {
        let mut schemas: Vec<ToolSchema> = self.tools.values().map(|t| t.schema()).collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&String> = self.tools.keys().collect();
        names.sort();
        f.debug_struct("ToolRegistry")
            .field("tools", &names)
            .field("aliases", &self.aliases.len())
            .finish()
    }
}
