use crate::types::{NodeId, RunId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

/// A lifecycle notification emitted by the engine during a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub id: String,
    pub run_id: RunId,
    /// Position of the event within its run, starting at 0
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl LifecycleEvent {
    pub fn new(run_id: RunId, sequence: u64, kind: EventKind) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            run_id,
            sequence,
            timestamp: Utc::now(),
            kind,
        }
    }
}

/// What happened
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EventKind {
    Processing { node_id: NodeId },
    Completed { node_id: NodeId },
    Error { node_id: NodeId, reason: String },
    ExecutionComplete { result: String },
}

impl EventKind {
    pub fn node_id(&self) -> Option<&NodeId> {
        match self {
            EventKind::Processing { node_id }
            | EventKind::Completed { node_id }
            | EventKind::Error { node_id, .. } => Some(node_id),
            EventKind::ExecutionComplete { .. } => None,
        }
    }

    pub fn status(&self) -> &'static str {
        match self {
            EventKind::Processing { .. } => "processing",
            EventKind::Completed { .. } => "completed",
            EventKind::Error { .. } => "error",
            EventKind::ExecutionComplete { .. } => "execution_complete",
        }
    }
}

/// Observer port for lifecycle events.
///
/// Called synchronously from the run loop, so implementations must not block.
/// An `Err` is logged by the engine and otherwise ignored.
pub trait EventSink: Send + Sync {
    fn on_event(&self, event: &LifecycleEvent) -> anyhow::Result<()>;
}

/// Discards every event
pub struct NullSink;

impl EventSink for NullSink {
    fn on_event(&self, _event: &LifecycleEvent) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Writes events to the tracing subscriber
pub struct LoggingSink;

impl EventSink for LoggingSink {
    fn on_event(&self, event: &LifecycleEvent) -> anyhow::Result<()> {
        match &event.kind {
            EventKind::Error { node_id, reason } => {
                tracing::warn!("run={} node={} status=error: {}", event.run_id, node_id, reason)
            }
            EventKind::ExecutionComplete { .. } => {
                tracing::info!("run={} status=execution_complete", event.run_id)
            }
            kind => tracing::info!(
                "run={} node={} status={}",
                event.run_id,
                kind.node_id().map(NodeId::as_str).unwrap_or_default(),
                kind.status()
            ),
        }
        Ok(())
    }
}

/// Keeps every event in memory, in emission order
#[derive(Default)]
pub struct MemorySink {
    events: Mutex<Vec<LifecycleEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<LifecycleEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn kinds(&self) -> Vec<EventKind> {
        self.events().into_iter().map(|e| e.kind).collect()
    }
}

impl EventSink for MemorySink {
    fn on_event(&self, event: &LifecycleEvent) -> anyhow::Result<()> {
        self.events
            .lock()
            .map_err(|_| anyhow::anyhow!("memory sink poisoned"))?
            .push(event.clone());
        Ok(())
    }
}

/// Fans events out to any number of subscribers (e.g. WebSocket clients).
///
/// Slow subscribers lag and lose old events; the sender never waits.
pub struct BroadcastSink {
    tx: broadcast::Sender<LifecycleEvent>,
}

impl BroadcastSink {
    /// `capacity` is clamped to at least 1
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.tx.subscribe()
    }
}

impl EventSink for BroadcastSink {
    fn on_event(&self, event: &LifecycleEvent) -> anyhow::Result<()> {
        // Nobody listening is not a failure
        if self.tx.receiver_count() == 0 {
            return Ok(());
        }
        self.tx
            .send(event.clone())
            .map(|_| ())
            .map_err(|_| anyhow::anyhow!("no active event subscribers"))
    }
}

/// Forwards every event to each inner sink, even after one of them fails
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl EventSink for FanoutSink {
    fn on_event(&self, event: &LifecycleEvent) -> anyhow::Result<()> {
        let failures: Vec<String> = self
            .sinks
            .iter()
            .filter_map(|sink| sink.on_event(event).err())
            .map(|e| e.to_string())
            .collect();

        if failures.is_empty() {
            Ok(())
        } else {
            anyhow::bail!("{} sink(s) failed: {}", failures.len(), failures.join("; "))
        }
    }
}
