//! Execution containers: one cursor over one feature tree per execution context.
//!
//! - [`SignalContainer`] walks the signal tree and drives hardware
//! - [`DataContainer`] walks the data tree as results arrive and owns cleanup

pub mod data;
pub mod signal;

pub use data::{DataContainer, Progress};
pub use signal::SignalContainer;

use crate::core::NodeValue;
use crate::core::telemetry::{ExecutionContext, NodeEvent, Telemetry, TraceEntry};
use crate::core::tree::{FeatureTree, NodeId};
use std::sync::Arc;
use uuid::Uuid;

/// Cursor over a tree in execution order.
///
/// A completed node hands over to its child sequence if it has one (the
/// sibling is resumed afterwards), otherwise to its sibling.
#[derive(Debug, Clone, Default)]
pub struct Traversal {
    cursor: Option<NodeId>,
    resume: Vec<NodeId>,
}

impl Traversal {
    pub fn start<N>(tree: &FeatureTree<N>) -> Self {
        Self {
            cursor: tree.root(),
            resume: Vec::new(),
        }
    }

    pub fn cursor(&self) -> Option<NodeId> {
        self.cursor
    }

    /// Moves past `id`, whose step just completed.
    pub fn step_past<N>(&mut self, tree: &FeatureTree<N>, id: NodeId) {
        self.cursor = match (tree.child(id), tree.sibling(id)) {
            (Some(child), sibling) => {
                self.resume.extend(sibling);
                Some(child)
            }
            (None, Some(sibling)) => Some(sibling),
            (None, None) => self.resume.pop(),
        };
    }
}

/// Forwards container events to an optional telemetry sink.
#[derive(Clone)]
pub(crate) struct Tracer {
    telemetry: Option<Arc<dyn Telemetry>>,
    run_id: Uuid,
    context: ExecutionContext,
}

impl Tracer {
    pub(crate) fn new(context: ExecutionContext) -> Self {
        Self {
            telemetry: None,
            run_id: Uuid::nil(),
            context,
        }
    }

    pub(crate) fn attach(&mut self, telemetry: Arc<dyn Telemetry>, run_id: Uuid) {
        self.telemetry = Some(telemetry);
        self.run_id = run_id;
    }

    pub(crate) fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub(crate) fn record(&self, node: &str, event: NodeEvent, result: NodeValue) {
        if let Some(telemetry) = &self.telemetry {
            telemetry.record(TraceEntry::now(self.run_id, self.context, node, event, result));
        }
    }
}
