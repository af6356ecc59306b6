use crate::error::EngineError;
use crate::types::{NodeId, Parameters};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

/// One pipeline step bound to a tool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub tool_name: String,
    #[serde(default)]
    pub parameters: Parameters,
}

impl Node {
    pub fn new(id: impl Into<String>, tool_name: impl Into<String>) -> Self {
        Self {
            id: NodeId::new(id),
            tool_name: tool_name.into(),
            parameters: Parameters::new(),
        }
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }
}

/// Directed dependency between two nodes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub source: NodeId,
    pub target: NodeId,
}

impl Edge {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: NodeId::new(source),
            target: NodeId::new(target),
        }
    }
}

/// Typed workflow graph.
///
/// Nodes keep their declaration order, which the planner uses to break ties.
/// Duplicate ids survive parsing so the validator can report them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Graph {
    nodes: Vec<Node>,
    edges: Vec<Edge>,
}

impl Graph {
    /// Parse a raw workflow description.
    ///
    /// Nodes may be given as `{id, tool_name, parameters}` or in the editor
    /// shape `{id, data: {label, parameters}}`.
    pub fn build(raw: &Value) -> Result<Self, EngineError> {
        let raw_nodes = raw
            .get("nodes")
            .and_then(Value::as_array)
            .ok_or_else(|| EngineError::parse("workflow description has no `nodes` array"))?;

        let nodes = raw_nodes
            .iter()
            .enumerate()
            .map(|(position, entry)| parse_node(position, entry))
            .collect::<Result<Vec<_>, _>>()?;

        let edges = match raw.get("edges") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(entries)) => entries
                .iter()
                .enumerate()
                .map(|(position, entry)| parse_edge(position, entry))
                .collect::<Result<Vec<_>, _>>()?,
            Some(_) => return Err(EngineError::parse("`edges` must be an array")),
        };

        Self::from_parts(nodes, edges)
    }

    /// Assemble a graph from typed parts, checking that every edge endpoint exists
    pub fn from_parts(nodes: Vec<Node>, edges: Vec<Edge>) -> Result<Self, EngineError> {
        let known: HashSet<&NodeId> = nodes.iter().map(|n| &n.id).collect();

        for edge in &edges {
            for endpoint in [&edge.source, &edge.target] {
                if !known.contains(endpoint) {
                    return Err(EngineError::parse(format!(
                        "edge {} -> {} references unknown node {}",
                        edge.source, edge.target, endpoint
                    )));
                }
            }
        }

        Ok(Self { nodes, edges })
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes with no incoming edge, in declaration order
    pub fn sources(&self) -> Vec<&NodeId> {
        let targets: HashSet<&NodeId> = self.edges.iter().map(|e| &e.target).collect();
        self.nodes
            .iter()
            .map(|n| &n.id)
            .filter(|id| !targets.contains(id))
            .collect()
    }

    /// Nodes with no outgoing edge, in declaration order
    pub fn sinks(&self) -> Vec<&NodeId> {
        let sources: HashSet<&NodeId> = self.edges.iter().map(|e| &e.source).collect();
        self.nodes
            .iter()
            .map(|n| &n.id)
            .filter(|id| !sources.contains(id))
            .collect()
    }

    /// Direct successors of a node, in edge order
    pub fn successors<'a>(&'a self, id: &'a NodeId) -> impl Iterator<Item = &'a NodeId> + 'a {
        self.edges
            .iter()
            .filter(move |e| &e.source == id)
            .map(|e| &e.target)
    }
}

fn parse_node(position: usize, entry: &Value) -> Result<Node, EngineError> {
    let id = non_empty_str(entry.get("id"))
        .ok_or_else(|| EngineError::parse(format!("node #{} is missing `id`", position)))?;

    let data = entry.get("data");
    let tool_name = non_empty_str(entry.get("tool_name"))
        .or_else(|| non_empty_str(data.and_then(|d| d.get("label"))))
        .ok_or_else(|| EngineError::parse(format!("node {} is missing `tool_name`", id)))?;

    let raw_parameters = entry
        .get("parameters")
        .or_else(|| data.and_then(|d| d.get("parameters")));

    let parameters = match raw_parameters {
        None | Some(Value::Null) => Parameters::new(),
        Some(Value::Object(map)) => map
            .iter()
            .filter_map(|(name, value)| stringify(value).map(|v| (name.clone(), v)))
            .collect(),
        Some(_) => {
            return Err(EngineError::parse(format!(
                "node {}: `parameters` must be an object",
                id
            )))
        }
    };

    Ok(Node {
        id: NodeId::new(id),
        tool_name: tool_name.to_string(),
        parameters,
    })
}

fn parse_edge(position: usize, entry: &Value) -> Result<Edge, EngineError> {
    let source = non_empty_str(entry.get("source"))
        .ok_or_else(|| EngineError::parse(format!("edge #{} is missing `source`", position)))?;
    let target = non_empty_str(entry.get("target"))
        .ok_or_else(|| EngineError::parse(format!("edge #{} is missing `target`", position)))?;

    Ok(Edge::new(source, target))
}

fn non_empty_str(value: Option<&Value>) -> Option<&str> {
    value.and_then(Value::as_str).filter(|s| !s.is_empty())
}

fn stringify(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}
