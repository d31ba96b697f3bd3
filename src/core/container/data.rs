use crate::core::NodeValue;
use crate::core::container::{Tracer, Traversal};
use crate::core::error::CallbackError;
use crate::core::node::DataNode;
use crate::core::telemetry::{ExecutionContext, NodeEvent, Telemetry};
use crate::core::tree::{FeatureTree, NodeId};
use std::sync::Arc;
use uuid::Uuid;

/// What one [`DataContainer::step`] achieved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// A callback step ran; calling again may make more progress.
    Advanced,
    /// Waiting on data or on a response; call again once something arrives.
    Blocked,
    /// The run ended on this call: every node has been cleaned up.
    Completed,
    /// The run had already ended before this call.
    Idle,
}

/// Walks the data tree as results arrive and guarantees that every node's
/// `cleanup` runs exactly once.
///
/// The cursor rotates over the live nodes, those with steps left to run or a
/// response left to drain. Past the end of the tree it wraps back to the root
/// while any node is live. Once none is, every node still holding resources
/// gets its terminal signal and the run completes.
pub struct DataContainer {
    tree: FeatureTree<DataNode>,
    traversal: Traversal,
    cleanup_set: Vec<NodeId>,
    ending: bool,
    finished: bool,
    reported: bool,
    tracer: Tracer,
}

impl DataContainer {
    pub fn new(tree: FeatureTree<DataNode>) -> Self {
        let traversal = Traversal::start(&tree);
        let cleanup_set = tree.preorder();
        Self {
            tree,
            traversal,
            cleanup_set,
            ending: false,
            finished: false,
            reported: false,
            tracer: Tracer::new(ExecutionContext::Data),
        }
    }

    pub fn with_telemetry(mut self, telemetry: Arc<dyn Telemetry>, run_id: Uuid) -> Self {
        self.tracer.attach(telemetry, run_id);
        self
    }

    pub fn run_id(&self) -> Uuid {
        self.tracer.run_id()
    }

    pub fn tree(&self) -> &FeatureTree<DataNode> {
        &self.tree
    }

    /// Nodes that receive the terminal signal when the run ends.
    pub fn cleanup_set(&self) -> &[NodeId] {
        &self.cleanup_set
    }

    /// Nodes with steps left to run or a response left to drain, in tree order.
    pub fn live(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.cleanup_set
            .iter()
            .copied()
            .filter(move |&id| self.tree[id].is_live())
    }

    pub fn cursor(&self) -> Option<NodeId> {
        if self.ending {
            return None;
        }
        self.traversal.cursor()
    }

    pub fn current(&self) -> Option<&DataNode> {
        self.cursor().map(|id| &self.tree[id])
    }

    /// The first node whose cleanup waits for its response, if any.
    pub fn deferred(&self) -> Option<&DataNode> {
        self.cleanup_set
            .iter()
            .map(|&id| &self.tree[id])
            .find(|node| node.cleanup_deferred())
    }

    /// True once [`abort`](Self::abort) was called or the run wound down.
    pub fn is_ending(&self) -> bool {
        self.ending
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Runs the data side forward; returns `true` exactly once, when the run completes.
    pub fn advance(&mut self) -> Result<bool, CallbackError> {
        Ok(self.step()? == Progress::Completed)
    }

    /// Runs at most one callback step of the live node under the cursor.
    ///
    /// Never blocks. A node whose `pre_main` gate is closed, or whose
    /// response has not arrived, keeps the cursor and is polled again on the
    /// next call. A callback error still cleans up every node before it is
    /// returned.
    pub fn step(&mut self) -> Result<Progress, CallbackError> {
        if self.finished {
            return Ok(self.completion());
        }
        let Some(id) = self.next_live() else {
            self.conclude()?;
            return Ok(self.report());
        };
        match self.step_node(id) {
            Ok(progress) => Ok(progress),
            Err(err) => {
                self.fail(id);
                Err(err)
            }
        }
    }

    /// Asks the current node to finish; the rest of the run carries on.
    ///
    /// A node without an outstanding response is cleaned up immediately. A
    /// node awaiting its response stays live until the rotation comes back
    /// to it and the response drains, and is cleaned up then. Either way the
    /// cursor moves on to the next live node. Ending the last live node ends
    /// the run.
    pub fn request_end(&mut self) -> Result<(), CallbackError> {
        if self.finished {
            return Ok(());
        }
        let Some(id) = self.next_live() else {
            return self.conclude();
        };

        let node = &mut self.tree[id];
        log::info!("data node '{}' ({}) asked to finish", node.name(), id);
        let ended = node.request_end();
        if node.is_marked_for_removal() {
            self.tracer.record(node.name(), NodeEvent::Cleanup, NodeValue::Null);
        }
        if let Err(err) = ended {
            self.fail(id);
            return Err(err);
        }

        self.traversal.step_past(&self.tree, id);
        if self.next_live().is_none() {
            self.conclude()?;
        }
        Ok(())
    }

    /// Ends the run: every live node is asked to finish at once.
    ///
    /// Nodes without an outstanding response are cleaned up immediately; a
    /// node awaiting its response is cleaned up once that response drains or
    /// is forced. Calling this again is harmless.
    pub fn abort(&mut self) -> Result<(), CallbackError> {
        if self.finished {
            return Ok(());
        }
        if !self.ending {
            log::info!("data run {} aborted", self.tracer.run_id());
            self.ending = true;
        }
        let first = self.traversal.cursor();
        self.end_all(first)
    }

    /// Resolves a pending response with `value` without polling the feature.
    ///
    /// Any cleanup deferred on that response runs now. Returns whether a
    /// response was pending.
    pub fn force_response(&mut self, value: NodeValue) -> Result<bool, CallbackError> {
        let Some(id) = self
            .cleanup_set
            .iter()
            .copied()
            .find(|&id| self.tree[id].awaiting_response())
        else {
            return Ok(false);
        };

        let node = &mut self.tree[id];
        let forced = node.force_response(value);
        let cleaned = node.is_marked_for_removal();
        let name = node.name().to_string();
        self.tracer.record(&name, NodeEvent::ResponseForced, NodeValue::Null);
        if cleaned {
            self.tracer.record(&name, NodeEvent::Cleanup, NodeValue::Null);
        }
        if let Err(err) = forced {
            self.fail(id);
            return Err(err);
        }

        if self.traversal.cursor() == Some(id) {
            self.traversal.step_past(&self.tree, id);
        }
        if self.next_live().is_none() {
            self.conclude()?;
        }
        Ok(true)
    }

    /// Moves the cursor onto the next live node, wrapping back to the root
    /// once past the end of the tree.
    fn next_live(&mut self) -> Option<NodeId> {
        let mut wrapped = false;
        loop {
            match self.traversal.cursor() {
                Some(id) if self.tree[id].is_live() => return Some(id),
                Some(id) => self.traversal.step_past(&self.tree, id),
                None if !wrapped && self.live().next().is_some() => {
                    log::debug!("data run {} wrapping back to the root", self.tracer.run_id());
                    self.traversal = Traversal::start(&self.tree);
                    wrapped = true;
                }
                None => return None,
            }
        }
    }

    fn step_node(&mut self, id: NodeId) -> Result<Progress, CallbackError> {
        if self.tree[id].cleanup_deferred() {
            return self.drain_ended(id);
        }

        let node = &mut self.tree[id];
        let ran_main;
        let outcome = if node.awaiting_response() {
            ran_main = false;
            node.advance(true)?
        } else {
            let Some(first) = node.advance(false)? else {
                return Ok(Progress::Blocked);
            };
            ran_main = true;
            if node.awaiting_response() {
                node.advance(true)?
            } else {
                Some(first)
            }
        };
        let outcome = outcome.unwrap_or_default();

        if !outcome.complete {
            if ran_main || !node.awaiting_response() {
                return Ok(Progress::Advanced);
            }
            return Ok(Progress::Blocked);
        }

        let name = node.name().to_string();
        log::debug!("data node '{}' ({}) complete", name, id);
        self.tracer.record(
            &name,
            NodeEvent::StepComplete,
            outcome.result.unwrap_or(NodeValue::Null),
        );
        self.traversal.step_past(&self.tree, id);
        self.move_on()
    }

    /// Polls the response an ended node still waits for. While it is
    /// pending the cursor moves on to the next live node.
    fn drain_ended(&mut self, id: NodeId) -> Result<Progress, CallbackError> {
        let node = &mut self.tree[id];
        node.advance(true)?;
        let cleaned = node.is_marked_for_removal();
        if cleaned {
            self.tracer.record(node.name(), NodeEvent::Cleanup, NodeValue::Null);
        }
        self.traversal.step_past(&self.tree, id);
        if cleaned {
            return self.move_on();
        }
        match self.next_live() {
            Some(next) if next != id => Ok(Progress::Advanced),
            _ => Ok(Progress::Blocked),
        }
    }

    fn move_on(&mut self) -> Result<Progress, CallbackError> {
        if self.next_live().is_some() {
            return Ok(Progress::Advanced);
        }
        self.conclude()?;
        Ok(self.report())
    }

    /// No node is live: every node still holding resources gets its terminal signal.
    fn conclude(&mut self) -> Result<(), CallbackError> {
        self.ending = true;
        if let Err(err) = self.end_all(None) {
            // a failed run never reports completion
            self.reported = true;
            return Err(err);
        }
        Ok(())
    }

    fn end_all(&mut self, first: Option<NodeId>) -> Result<(), CallbackError> {
        let mut failure = None;
        let order = first.into_iter().chain(self.cleanup_set.iter().copied());
        for id in order.collect::<Vec<_>>() {
            let node = &mut self.tree[id];
            if node.is_marked_for_removal() {
                continue;
            }
            let outcome = node.request_end();
            if node.is_marked_for_removal() {
                self.tracer.record(node.name(), NodeEvent::Cleanup, NodeValue::Null);
            }
            if let Err(err) = outcome {
                log::error!("cleanup failed: {}", err);
                failure.get_or_insert(err);
            }
        }
        self.check_drained();
        failure.map_or(Ok(()), Err)
    }

    /// A callback failed: clean up the failing node, then every other node.
    fn fail(&mut self, id: NodeId) {
        log::error!("data run {} aborted after a callback error", self.tracer.run_id());
        self.ending = true;
        let node = &mut self.tree[id];
        if !node.is_marked_for_removal() {
            let cleaned = match node.request_end() {
                Ok(true) => Ok(()),
                Ok(false) => node.force_response(NodeValue::Null).map(|_| ()),
                Err(err) => Err(err),
            };
            if node.is_marked_for_removal() {
                self.tracer.record(node.name(), NodeEvent::Cleanup, NodeValue::Null);
            }
            if let Err(err) = cleaned {
                log::error!("cleanup of failed node '{}' also failed: {}", err.node, err);
            }
        }
        if let Err(err) = self.end_all(None) {
            log::error!("cleanup during abort failed: {}", err);
        }
        self.reported = true;
    }

    fn check_drained(&mut self) -> bool {
        if !self.finished
            && self
                .cleanup_set
                .iter()
                .all(|&id| self.tree[id].is_marked_for_removal())
        {
            self.finished = true;
            log::info!("data run {} finished", self.tracer.run_id());
        }
        self.finished
    }

    fn report(&mut self) -> Progress {
        if self.finished {
            return self.completion();
        }
        Progress::Blocked
    }

    fn completion(&mut self) -> Progress {
        if self.reported {
            return Progress::Idle;
        }
        self.reported = true;
        Progress::Completed
    }
}
