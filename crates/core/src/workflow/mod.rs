// Workflow graph compiler and execution engine

pub mod dag;
pub mod executor;
pub mod graph;
pub mod node_executor;
pub mod validate;

pub use dag::{plan, ExecutionPlan, PlannedNode, WorkflowDag};
pub use executor::{EngineConfig, UnknownToolPolicy, WorkflowEngine};
pub use graph::{Edge, Graph, Node};
pub use node_executor::NodeExecutor;
pub use validate::{validate, GraphValidator};
