use super::graph::Graph;
use crate::error::{EngineError, ErrorKind, ValidationError};
use crate::tools::ToolRegistry;
use std::collections::{HashMap, HashSet};

/// Certifies a graph's structure before any tool is invoked.
///
/// Checks run in a fixed order and the first violation is returned:
/// duplicate ids, unknown tools, start node, cycles, sink node.
pub struct GraphValidator<'a> {
    registry: Option<&'a ToolRegistry>,
}

impl<'a> GraphValidator<'a> {
    /// Validator that also resolves every tool name against `registry`
    pub fn new(registry: &'a ToolRegistry) -> Self {
        Self {
            registry: Some(registry),
        }
    }

    /// Validator that only looks at the graph shape
    pub fn structural() -> Self {
        Self { registry: None }
    }

    pub fn validate(&self, graph: &Graph) -> Result<(), ValidationError> {
        check_unique_ids(graph)?;
        if let Some(registry) = self.registry {
            check_tools(graph, registry)?;
        }
        check_start_node(graph)?;
        check_acyclic(graph)?;
        check_sink_node(graph)?;
        Ok(())
    }
}

/// Full validation against a registry
pub fn validate(graph: &Graph, registry: &ToolRegistry) -> Result<(), ValidationError> {
    GraphValidator::new(registry).validate(graph)
}

fn check_unique_ids(graph: &Graph) -> Result<(), ValidationError> {
    let mut seen = HashSet::new();
    for node in graph.nodes() {
        if !seen.insert(&node.id) {
            return Err(EngineError::new(
                ErrorKind::DuplicateNodeId,
                format!("duplicate node id: {}", node.id),
            ));
        }
    }
    Ok(())
}

fn check_tools(graph: &Graph, registry: &ToolRegistry) -> Result<(), ValidationError> {
    match graph
        .nodes()
        .iter()
        .find(|n| !registry.contains(&n.tool_name))
    {
        Some(node) => Err(EngineError::new(
            ErrorKind::UnknownTool,
            format!("node {} uses unknown tool {}", node.id, node.tool_name),
        )),
        None => Ok(()),
    }
}

fn check_start_node(graph: &Graph) -> Result<(), ValidationError> {
    let sources = graph.sources();
    match sources.len() {
        0 => Err(EngineError::new(
            ErrorKind::NoStartNode,
            "no node without incoming edges",
        )),
        1 => Ok(()),
        _ => Err(EngineError::new(
            ErrorKind::AmbiguousStartNode,
            format!("multiple start nodes: {}", join_ids(&sources)),
        )),
    }
}

fn check_sink_node(graph: &Graph) -> Result<(), ValidationError> {
    let sinks = graph.sinks();
    match sinks.len() {
        0 => Err(EngineError::new(
            ErrorKind::NoSinkNode,
            "no node without outgoing edges",
        )),
        1 => Ok(()),
        _ => Err(EngineError::new(
            ErrorKind::AmbiguousSinkNode,
            format!("multiple end nodes: {}", join_ids(&sinks)),
        )),
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    OnStack,
    Done,
}

/// Depth-first search with an explicit recursion stack, started from every
/// node in declaration order so unreachable cycles are caught too.
fn check_acyclic(graph: &Graph) -> Result<(), ValidationError> {
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    for edge in graph.edges() {
        adjacency
            .entry(edge.source.as_str())
            .or_default()
            .push(edge.target.as_str());
    }

    let mut marks: HashMap<&str, Mark> = HashMap::new();

    for root in graph.nodes().iter().map(|n| n.id.as_str()) {
        if marks.contains_key(root) {
            continue;
        }

        // (node, index of the next child to visit)
        let mut stack: Vec<(&str, usize)> = vec![(root, 0)];
        marks.insert(root, Mark::OnStack);

        while let Some(frame) = stack.last_mut() {
            let (node, next_child) = *frame;
            let children = adjacency.get(node).map(Vec::as_slice).unwrap_or(&[]);

            match children.get(next_child) {
                Some(&child) => {
                    frame.1 += 1;
                    match marks.get(child) {
                        Some(Mark::OnStack) => {
                            return Err(EngineError::new(
                                ErrorKind::CycleDetected,
                                format!("cycle through edge {} -> {}", node, child),
                            ));
                        }
                        Some(Mark::Done) => {}
                        None => {
                            marks.insert(child, Mark::OnStack);
                            stack.push((child, 0));
                        }
                    }
                }
                None => {
                    marks.insert(node, Mark::Done);
                    stack.pop();
                }
            }
        }
    }

    Ok(())
}

fn join_ids(ids: &[&crate::types::NodeId]) -> String {
    ids.iter()
        .map(|id| id.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}
