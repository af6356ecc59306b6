use super::graph::{Graph, Node};
use crate::error::{EngineError, ErrorKind};
use crate::types::{NodeId, Parameters};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

/// One node's execution record, owned by the plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedNode {
    pub id: NodeId,
    pub tool_name: String,
    pub parameters: Parameters,
    /// Direct predecessors, deduplicated, in plan order
    pub predecessors: Vec<NodeId>,
    /// Predecessor whose output state this node starts from (the latest in
    /// plan order); `None` for the source
    pub input_from: Option<NodeId>,
}

/// Deterministic topological order of a validated graph
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionPlan {
    steps: Vec<PlannedNode>,
}

impl ExecutionPlan {
    pub fn steps(&self) -> &[PlannedNode] {
        &self.steps
    }

    pub fn order(&self) -> Vec<&NodeId> {
        self.steps.iter().map(|s| &s.id).collect()
    }

    pub fn position(&self, id: &NodeId) -> Option<usize> {
        self.steps.iter().position(|s| &s.id == id)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// DAG representation of a workflow graph
pub struct WorkflowDag<'g> {
    graph: DiGraph<&'g Node, ()>,
    indices: HashMap<&'g NodeId, NodeIndex>,
}

impl<'g> WorkflowDag<'g> {
    /// Build a DAG from a graph whose ids are already known to be unique.
    /// Node indices follow declaration order.
    pub fn from_graph(source: &'g Graph) -> Result<Self, EngineError> {
        let mut graph = DiGraph::with_capacity(source.len(), source.edges().len());
        let mut indices = HashMap::with_capacity(source.len());

        for node in source.nodes() {
            let index = graph.add_node(node);
            indices.insert(&node.id, index);
        }

        for edge in source.edges() {
            let (Some(&from), Some(&to)) = (indices.get(&edge.source), indices.get(&edge.target))
            else {
                return Err(EngineError::parse(format!(
                    "edge {} -> {} references unknown node",
                    edge.source, edge.target
                )));
            };
            graph.add_edge(from, to, ());
        }

        Ok(Self { graph, indices })
    }

    /// Kahn's algorithm. Among nodes that are ready at the same time the one
    /// declared first runs first.
    pub fn topological_order(&self) -> Result<Vec<NodeIndex>, EngineError> {
        let mut in_degree: Vec<usize> = self
            .graph
            .node_indices()
            .map(|n| self.graph.edges_directed(n, Direction::Incoming).count())
            .collect();

        let mut ready: BinaryHeap<Reverse<usize>> = in_degree
            .iter()
            .enumerate()
            .filter(|&(_, &degree)| degree == 0)
            .map(|(index, _)| Reverse(index))
            .collect();

        let mut order = Vec::with_capacity(in_degree.len());

        while let Some(Reverse(index)) = ready.pop() {
            let node = NodeIndex::new(index);
            order.push(node);

            for successor in self.graph.neighbors_directed(node, Direction::Outgoing) {
                let degree = &mut in_degree[successor.index()];
                *degree -= 1;
                if *degree == 0 {
                    ready.push(Reverse(successor.index()));
                }
            }
        }

        if order.len() != self.graph.node_count() {
            let stuck = self
                .graph
                .node_indices()
                .find(|n| !order.contains(n))
                .map(|n| self.graph[n].id.to_string())
                .unwrap_or_default();
            return Err(EngineError::new(
                ErrorKind::CycleDetected,
                format!("node {} is part of or behind a cycle", stuck),
            ));
        }

        Ok(order)
    }

    /// Get direct predecessors of a node
    pub fn dependencies(&self, id: &NodeId) -> Vec<NodeIndex> {
        self.indices
            .get(id)
            .map(|&index| {
                self.graph
                    .neighbors_directed(index, Direction::Incoming)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Build the per-node execution records in topological order
    pub fn plan(&self) -> Result<ExecutionPlan, EngineError> {
        let order = self.topological_order()?;

        let mut plan_position: HashMap<NodeIndex, usize> = HashMap::with_capacity(order.len());
        for (position, &index) in order.iter().enumerate() {
            plan_position.insert(index, position);
        }

        let steps = order
            .iter()
            .map(|&index| {
                let node = self.graph[index];

                let mut predecessors = self.dependencies(&node.id);
                predecessors.sort_by_key(|p| plan_position[p]);
                predecessors.dedup();

                let input_from = predecessors.last().map(|&p| self.graph[p].id.clone());

                PlannedNode {
                    id: node.id.clone(),
                    tool_name: node.tool_name.clone(),
                    parameters: node.parameters.clone(),
                    predecessors: predecessors
                        .iter()
                        .map(|&p| self.graph[p].id.clone())
                        .collect(),
                    input_from,
                }
            })
            .collect();

        Ok(ExecutionPlan { steps })
    }
}

/// Derive the execution plan of a validated graph
pub fn plan(graph: &Graph) -> Result<ExecutionPlan, EngineError> {
    WorkflowDag::from_graph(graph)?.plan()
}
