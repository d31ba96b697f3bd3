use crate::core::NodeValue;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use uuid::Uuid;

/// Which execution context produced a trace entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionContext {
    Signal,
    Data,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeEvent {
    /// The node finished all of its steps.
    StepComplete,
    /// The node's cleanup ran.
    Cleanup,
    /// A pending response was resolved by the owner instead of the feature.
    ResponseForced,
}

/// A single entry in the execution trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEntry {
    pub timestamp_ms: u64,
    pub run_id: Uuid,
    pub context: ExecutionContext,
    pub node: String,
    pub event: NodeEvent,
    pub result: NodeValue,
}

impl TraceEntry {
    pub fn now(
        run_id: Uuid,
        context: ExecutionContext,
        node: impl Into<String>,
        event: NodeEvent,
        result: NodeValue,
    ) -> Self {
        let timestamp_ms = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        Self {
            timestamp_ms,
            run_id,
            context,
            node: node.into(),
            event,
            result,
        }
    }
}

/// Trait for recording execution traces.
pub trait Telemetry: Send + Sync {
    fn record(&self, entry: TraceEntry);
    fn flush(&self);
}

/// Simple in-memory collector for traces.
#[derive(Default)]
pub struct MemoryTelemetry {
    traces: Mutex<Vec<TraceEntry>>,
}

impl MemoryTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_traces(&self) -> Vec<TraceEntry> {
        self.traces
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Node names of the matching entries, in recording order.
    pub fn nodes(&self, context: ExecutionContext, event: NodeEvent) -> Vec<String> {
        self.get_traces()
            .into_iter()
            .filter(|entry| entry.context == context && entry.event == event)
            .map(|entry| entry.node)
            .collect()
    }
}

impl Telemetry for MemoryTelemetry {
    fn record(&self, entry: TraceEntry) {
        self.traces
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(entry);
    }

    fn flush(&self) {
        // No-op for memory collector
    }
}
