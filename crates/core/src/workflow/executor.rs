use super::dag::{self, ExecutionPlan};
use super::graph::Graph;
use super::node_executor::NodeExecutor;
use super::validate::GraphValidator;
use crate::error::EngineError;
use crate::events::{EventKind, EventSink, LifecycleEvent};
use crate::tools::ToolRegistry;
use crate::types::{ExecutionResult, NodeExecution, NodeId, NodeStatus, RunId, RunState};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// How `execute` treats tool names the registry does not know
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownToolPolicy {
    /// Refuse to start the run (`UnknownTool`)
    Reject,
    /// Start the run; the node fails with an `error` event when reached
    #[default]
    Degrade,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Upper bound for every single tool invocation
    pub tool_timeout: Duration,
    pub unknown_tools: UnknownToolPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tool_timeout: Duration::from_secs(30),
            unknown_tools: UnknownToolPolicy::default(),
        }
    }
}

/// Compiles workflow descriptions and executes them.
///
/// Failure policy: once a run has started it always finishes. A node whose
/// tool fails, times out, is missing, or lacks parameters emits `error`, its
/// `primary` output is replaced by a diagnostic, and the following nodes still
/// run on that degraded payload. Do not turn this into fail-fast; callers rely
/// on every run ending with `execution_complete`.
///
/// Each call builds its own graph, plan and run state. Only the registry is
/// shared, read-only, between concurrent runs.
pub struct WorkflowEngine {
    registry: Arc<ToolRegistry>,
    node_executor: NodeExecutor,
    config: EngineConfig,
}

impl WorkflowEngine {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self::with_config(registry, EngineConfig::default())
    }

    pub fn with_config(registry: Arc<ToolRegistry>, config: EngineConfig) -> Self {
        let node_executor = NodeExecutor::new(registry.clone(), config.tool_timeout);
        Self {
            registry,
            node_executor,
            config,
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Parse, validate and plan a raw workflow description
    pub fn compile(&self, description: &serde_json::Value) -> Result<ExecutionPlan, EngineError> {
        let graph = Graph::build(description)?;
        self.compile_graph(&graph)
    }

    pub fn compile_graph(&self, graph: &Graph) -> Result<ExecutionPlan, EngineError> {
        let validator = match self.config.unknown_tools {
            UnknownToolPolicy::Reject => GraphValidator::new(&self.registry),
            UnknownToolPolicy::Degrade => GraphValidator::structural(),
        };
        validator.validate(graph)?;
        dag::plan(graph)
    }

    /// Compile `description` and run it against `input`.
    ///
    /// Only pre-run validation can fail; no event is emitted in that case.
    pub async fn execute(
        &self,
        description: &serde_json::Value,
        input: &str,
        sink: &dyn EventSink,
    ) -> Result<ExecutionResult, EngineError> {
        let plan = self.compile(description)?;
        Ok(self.run(&plan, input, sink).await)
    }

    /// Execute an already compiled plan
    pub async fn run(&self, plan: &ExecutionPlan, input: &str, sink: &dyn EventSink) -> ExecutionResult {
        let run_id = RunId::new();
        let started_at = chrono::Utc::now();

        tracing::info!(
            "Starting workflow execution: run_id={}, nodes={}",
            run_id,
            plan.len()
        );

        let mut events = EventEmitter::new(run_id, sink);
        let initial = RunState::new(input);

        // Output state of every finished node; successors start from a copy
        let mut snapshots: HashMap<&NodeId, RunState> = HashMap::with_capacity(plan.len());
        let mut executions: Vec<NodeExecution> = plan
            .steps()
            .iter()
            .map(|node| NodeExecution::pending(node.id.clone(), node.tool_name.clone()))
            .collect();
        let mut final_primary = initial.primary.clone();

        for (node, execution) in plan.steps().iter().zip(executions.iter_mut()) {
            let state = node
                .input_from
                .as_ref()
                .and_then(|id| snapshots.get(id))
                .cloned()
                .unwrap_or_else(|| initial.clone());

            execution.start();
            events.emit(EventKind::Processing {
                node_id: node.id.clone(),
            });

            let next = match self.node_executor.execute(node, state.clone()).await {
                Ok(output) => {
                    events.emit(EventKind::Completed {
                        node_id: node.id.clone(),
                    });
                    execution.finish(None);

                    let mut next = output.state;
                    next.primary = output.output;
                    next
                }
                Err(e) => {
                    let reason = e.to_string();
                    tracing::warn!(
                        "Node {} ({}) failed, continuing: {}",
                        node.id,
                        node.tool_name,
                        reason
                    );
                    events.emit(EventKind::Error {
                        node_id: node.id.clone(),
                        reason: reason.clone(),
                    });
                    let mut next = state;
                    next.primary = diagnostic(&node.id, &node.tool_name, &reason);
                    execution.finish(Some(reason));
                    next
                }
            };

            final_primary = next.primary.clone();
            snapshots.insert(&node.id, next);
        }

        events.emit(EventKind::ExecutionComplete {
            result: final_primary.clone(),
        });

        let completed_at = chrono::Utc::now();
        let failed = executions
            .iter()
            .filter(|e| e.status == NodeStatus::Failed)
            .count();

        tracing::info!(
            "Workflow execution completed: run_id={}, failed_nodes={}, duration_ms={}",
            run_id,
            failed,
            (completed_at - started_at).num_milliseconds()
        );

        ExecutionResult {
            run_id,
            final_output: final_primary,
            started_at,
            completed_at,
            nodes: executions,
        }
    }
}

/// Text that replaces a failed node's output
fn diagnostic(node_id: &NodeId, tool_name: &str, reason: &str) -> String {
    format!("Error in node {} ({}): {}", node_id, tool_name, reason)
}

/// Stamps events with the run id and sequence number and hands them to the
/// sink. Sink failures are logged, never propagated.
struct EventEmitter<'a> {
    run_id: RunId,
    sequence: u64,
    sink: &'a dyn EventSink,
}

impl<'a> EventEmitter<'a> {
    fn new(run_id: RunId, sink: &'a dyn EventSink) -> Self {
        Self {
            run_id,
            sequence: 0,
            sink,
        }
    }

    fn emit(&mut self, kind: EventKind) {
        let event = LifecycleEvent::new(self.run_id, self.sequence, kind);
        self.sequence += 1;

        if let Err(e) = self.sink.on_event(&event) {
            tracing::warn!(
                "Failed to deliver {} event for run {}: {}",
                event.kind.status(),
                self.run_id,
                e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, ToolError};
    use crate::events::MemorySink;
    use crate::tools::{
        FormatReportTool, PassThroughTool, Tool, ToolContext, ToolOutput, ToolSchema,
    };
    use crate::types::Parameters;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Appends its parameter `tag` to `primary`
    struct AppendTool;

    #[async_trait::async_trait]
    impl Tool for AppendTool {
        fn schema(&self) -> ToolSchema {
            schema("append")
        }

        async fn invoke(
            &self,
            state: RunState,
            parameters: &Parameters,
            _ctx: &ToolContext,
        ) -> Result<ToolOutput, ToolError> {
            let tag = parameters.get("tag").cloned().unwrap_or_default();
            let output = format!("{}{}", state.primary, tag);
            Ok(ToolOutput::new(state, output))
        }
    }

    /// Writes `primary` into the context side channel
    struct StashTool;

    #[async_trait::async_trait]
    impl Tool for StashTool {
        fn schema(&self) -> ToolSchema {
            schema("stash")
        }

        async fn invoke(
            &self,
            mut state: RunState,
            _parameters: &Parameters,
            _ctx: &ToolContext,
        ) -> Result<ToolOutput, ToolError> {
            state.auxiliary_context = state.primary.clone();
            let output = state.primary.clone();
            Ok(ToolOutput::new(state, output))
        }
    }

    /// Outputs the context side channel
    struct RecallTool;

    #[async_trait::async_trait]
    impl Tool for RecallTool {
        fn schema(&self) -> ToolSchema {
            schema("recall")
        }

        async fn invoke(
            &self,
            state: RunState,
            _parameters: &Parameters,
            _ctx: &ToolContext,
        ) -> Result<ToolOutput, ToolError> {
            let output = state.auxiliary_context.clone();
            Ok(ToolOutput::new(state, output))
        }
    }

    struct FailTool;

    #[async_trait::async_trait]
    impl Tool for FailTool {
        fn schema(&self) -> ToolSchema {
            schema("fail")
        }

        async fn invoke(
            &self,
            _state: RunState,
            _parameters: &Parameters,
            _ctx: &ToolContext,
        ) -> Result<ToolOutput, ToolError> {
            Err(ToolError::Failed("boom".to_string()))
        }
    }

    struct SlowTool;

    #[async_trait::async_trait]
    impl Tool for SlowTool {
        fn schema(&self) -> ToolSchema {
            schema("slow")
        }

        async fn invoke(
            &self,
            state: RunState,
            _parameters: &Parameters,
            _ctx: &ToolContext,
        ) -> Result<ToolOutput, ToolError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(ToolOutput::new(state, "too late"))
        }
    }

    /// Counts invocations
    struct CountingTool(Arc<AtomicUsize>);

    #[async_trait::async_trait]
    impl Tool for CountingTool {
        fn schema(&self) -> ToolSchema {
            schema("count")
        }

        async fn invoke(
            &self,
            state: RunState,
            _parameters: &Parameters,
            _ctx: &ToolContext,
        ) -> Result<ToolOutput, ToolError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            let output = state.primary.clone();
            Ok(ToolOutput::new(state, output))
        }
    }

    struct FailingSink;

    impl EventSink for FailingSink {
        fn on_event(&self, _event: &LifecycleEvent) -> anyhow::Result<()> {
            anyhow::bail!("transport down")
        }
    }

    fn schema(name: &str) -> ToolSchema {
        ToolSchema {
            name: name.to_string(),
            description: String::new(),
            parameters: vec![],
        }
    }

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(PassThroughTool));
        registry.register(Arc::new(FormatReportTool));
        registry.register(Arc::new(AppendTool));
        registry.register(Arc::new(StashTool));
        registry.register(Arc::new(RecallTool));
        registry.register(Arc::new(FailTool));
        registry.register(Arc::new(SlowTool));
        registry
            .register_alias("input_query_tool", "pass_through")
            .unwrap();
        registry
            .register_alias("output_report_tool", "format_report")
            .unwrap();
        registry
    }

    fn engine() -> WorkflowEngine {
        WorkflowEngine::new(Arc::new(registry()))
    }

    fn processing(id: &str) -> EventKind {
        EventKind::Processing {
            node_id: NodeId::new(id),
        }
    }

    fn completed(id: &str) -> EventKind {
        EventKind::Completed {
            node_id: NodeId::new(id),
        }
    }

    #[tokio::test]
    async fn test_linear_chain() {
        let description = json!({
            "nodes": [
                {"id": "A", "tool_name": "input_query_tool"},
                {"id": "B", "tool_name": "output_report_tool"}
            ],
            "edges": [{"source": "A", "target": "B"}]
        });
        let sink = MemorySink::new();

        let result = engine().execute(&description, "hello", &sink).await.unwrap();

        assert_eq!(result.final_output, "Final Report:\n\nhello");
        assert_eq!(
            sink.kinds(),
            vec![
                processing("A"),
                completed("A"),
                processing("B"),
                completed("B"),
                EventKind::ExecutionComplete {
                    result: "Final Report:\n\nhello".to_string()
                },
            ]
        );
        let sequences: Vec<u64> = sink.events().iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![0, 1, 2, 3, 4]);
        assert!(result.nodes.iter().all(|n| n.status == NodeStatus::Completed));
    }

    #[tokio::test]
    async fn test_unknown_tool_degrades() {
        let description = json!({
            "nodes": [{"id": "A", "tool_name": "nonexistent_tool"}],
            "edges": []
        });
        let sink = MemorySink::new();

        let result = engine().execute(&description, "hello", &sink).await.unwrap();

        assert!(result.final_output.contains("A"));
        assert!(result.final_output.contains("nonexistent_tool"));

        let kinds = sink.kinds();
        assert_eq!(kinds.len(), 3);
        assert_eq!(kinds[0], processing("A"));
        assert!(matches!(&kinds[1], EventKind::Error { node_id, .. } if node_id.as_str() == "A"));
        assert_eq!(
            kinds[2],
            EventKind::ExecutionComplete {
                result: result.final_output.clone()
            }
        );
        assert_eq!(result.nodes[0].status, NodeStatus::Failed);
    }

    #[tokio::test]
    async fn test_unknown_tool_rejected_when_strict() {
        let engine = WorkflowEngine::with_config(
            Arc::new(registry()),
            EngineConfig {
                unknown_tools: UnknownToolPolicy::Reject,
                ..Default::default()
            },
        );
        let description = json!({"nodes": [{"id": "A", "tool_name": "nonexistent_tool"}]});
        let sink = MemorySink::new();

        let err = engine.execute(&description, "x", &sink).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnknownTool);
        assert!(sink.events().is_empty());
    }

    #[tokio::test]
    async fn test_ambiguous_start_emits_nothing() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(CountingTool(counter.clone())));
        let engine = WorkflowEngine::new(Arc::new(registry));

        let description = json!({
            "nodes": [
                {"id": "A", "tool_name": "count"},
                {"id": "B", "tool_name": "count"}
            ],
            "edges": []
        });
        let sink = MemorySink::new();

        let err = engine.execute(&description, "x", &sink).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::AmbiguousStartNode);
        assert!(sink.events().is_empty());
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cycle_rejected() {
        let description = json!({
            "nodes": [
                {"id": "A", "tool_name": "pass_through"},
                {"id": "B", "tool_name": "pass_through"},
                {"id": "C", "tool_name": "pass_through"}
            ],
            "edges": [
                {"source": "A", "target": "B"},
                {"source": "B", "target": "C"},
                {"source": "C", "target": "B"}
            ]
        });

        let err = engine()
            .execute(&description, "x", &MemorySink::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::CycleDetected);
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_sink() {
        let description = json!({
            "nodes": [
                {"id": "A", "tool_name": "pass_through"},
                {"id": "B", "tool_name": "fail"},
                {"id": "C", "tool_name": "format_report"}
            ],
            "edges": [
                {"source": "A", "target": "B"},
                {"source": "B", "target": "C"}
            ]
        });
        let sink = MemorySink::new();

        let result = engine().execute(&description, "hello", &sink).await.unwrap();

        assert_eq!(
            result.final_output,
            "Final Report:\n\nError in node B (fail): boom"
        );
        let kinds = sink.kinds();
        assert_eq!(kinds[4], processing("C"));
        assert_eq!(kinds[5], completed("C"));
        assert!(matches!(kinds.last(), Some(EventKind::ExecutionComplete { .. })));
        assert_eq!(result.failed_nodes().count(), 1);
        assert_eq!(result.nodes[1].error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_failed_node_keeps_side_channels() {
        let description = json!({
            "nodes": [
                {"id": "A", "tool_name": "stash"},
                {"id": "B", "tool_name": "fail"},
                {"id": "C", "tool_name": "recall"}
            ],
            "edges": [
                {"source": "A", "target": "B"},
                {"source": "B", "target": "C"}
            ]
        });

        let result = engine()
            .execute(&description, "ctx", &MemorySink::new())
            .await
            .unwrap();

        // B failed, but the context A stashed still reaches C
        assert_eq!(result.final_output, "ctx");
    }

    #[tokio::test]
    async fn test_fan_out_forks_and_fan_in_takes_last_writer() {
        // A fans out to B and C; both feed D. C is declared first, so B runs
        // last and its state reaches D.
        let description = json!({
            "nodes": [
                {"id": "A", "tool_name": "append", "parameters": {"tag": "-a"}},
                {"id": "C", "tool_name": "append", "parameters": {"tag": "-c"}},
                {"id": "B", "tool_name": "append", "parameters": {"tag": "-b"}},
                {"id": "D", "tool_name": "append", "parameters": {"tag": "-d"}}
            ],
            "edges": [
                {"source": "A", "target": "B"},
                {"source": "A", "target": "C"},
                {"source": "B", "target": "D"},
                {"source": "C", "target": "D"}
            ]
        });
        let sink = MemorySink::new();

        let result = engine().execute(&description, "in", &sink).await.unwrap();

        // B saw A's snapshot, not C's output
        assert_eq!(result.final_output, "in-a-b-d");
        let order: Vec<&str> = result.nodes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(order, vec!["A", "C", "B", "D"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_a_node_failure() {
        let engine = WorkflowEngine::with_config(
            Arc::new(registry()),
            EngineConfig {
                tool_timeout: Duration::from_millis(50),
                ..Default::default()
            },
        );
        let description = json!({
            "nodes": [
                {"id": "A", "tool_name": "slow"},
                {"id": "B", "tool_name": "format_report"}
            ],
            "edges": [{"source": "A", "target": "B"}]
        });
        let sink = MemorySink::new();

        let result = engine.execute(&description, "x", &sink).await.unwrap();

        assert!(result.final_output.contains("timed out after 50ms"));
        assert!(matches!(
            &sink.kinds()[1],
            EventKind::Error { reason, .. } if reason.contains("timed out")
        ));
    }

    #[tokio::test]
    async fn test_sink_failure_does_not_abort() {
        let description = json!({
            "nodes": [
                {"id": "A", "tool_name": "pass_through"},
                {"id": "B", "tool_name": "format_report"}
            ],
            "edges": [{"source": "A", "target": "B"}]
        });

        let result = engine()
            .execute(&description, "hello", &FailingSink)
            .await
            .unwrap();
        assert_eq!(result.final_output, "Final Report:\n\nhello");
    }

    #[tokio::test]
    async fn test_repeated_runs_are_identical() {
        let description = json!({
            "nodes": [
                {"id": "A", "tool_name": "append", "parameters": {"tag": "1"}},
                {"id": "B", "tool_name": "fail"},
                {"id": "C", "tool_name": "append", "parameters": {"tag": "2"}}
            ],
            "edges": [
                {"source": "A", "target": "B"},
                {"source": "B", "target": "C"}
            ]
        });
        let engine = engine();

        let first_sink = MemorySink::new();
        let first = engine.execute(&description, "in", &first_sink).await.unwrap();
        let second_sink = MemorySink::new();
        let second = engine.execute(&description, "in", &second_sink).await.unwrap();

        assert_eq!(first.final_output, second.final_output);
        assert_eq!(first_sink.kinds(), second_sink.kinds());
        assert_ne!(first.run_id, second.run_id);
    }
}
