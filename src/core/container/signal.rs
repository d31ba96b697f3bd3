use crate::core::NodeValue;
use crate::core::container::{Tracer, Traversal};
use crate::core::error::CallbackError;
use crate::core::node::SignalNode;
use crate::core::telemetry::{ExecutionContext, NodeEvent, Telemetry};
use crate::core::tree::{FeatureTree, NodeId};
use std::sync::Arc;
use uuid::Uuid;

/// Walks the signal tree, one node step per [`advance`](SignalContainer::advance).
pub struct SignalContainer {
    tree: FeatureTree<SignalNode>,
    traversal: Traversal,
    aborting: bool,
    finished: bool,
    reported: bool,
    tracer: Tracer,
}

impl SignalContainer {
    pub fn new(tree: FeatureTree<SignalNode>) -> Self {
        let traversal = Traversal::start(&tree);
        Self {
            tree,
            traversal,
            aborting: false,
            finished: false,
            reported: false,
            tracer: Tracer::new(ExecutionContext::Signal),
        }
    }

    pub fn with_telemetry(mut self, telemetry: Arc<dyn Telemetry>, run_id: Uuid) -> Self {
        self.tracer.attach(telemetry, run_id);
        self
    }

    pub fn run_id(&self) -> Uuid {
        self.tracer.run_id()
    }

    pub fn tree(&self) -> &FeatureTree<SignalNode> {
        &self.tree
    }

    pub fn cursor(&self) -> Option<NodeId> {
        if self.finished {
            return None;
        }
        self.traversal.cursor()
    }

    pub fn current(&self) -> Option<&SignalNode> {
        self.cursor().map(|id| &self.tree[id])
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// The current node expects `advance(true)`: a response or a settle is outstanding.
    pub fn is_waiting(&self) -> bool {
        self.current().is_some_and(SignalNode::is_waiting)
    }

    /// Runs one step of the node under the cursor.
    ///
    /// Returns `true` exactly once, on the call that exhausts the tree (or
    /// stops it after [`abort`](SignalContainer::abort)). A callback error
    /// stops the container and is returned to the caller.
    pub fn advance(&mut self) -> Result<bool, CallbackError> {
        if self.finished {
            return Ok(self.report());
        }
        let Some(id) = self.traversal.cursor() else {
            return Ok(self.finish());
        };
        if self.aborting && !self.tree[id].is_waiting() {
            return Ok(self.finish());
        }

        let node = &mut self.tree[id];
        let wait_for_response = node.is_waiting();
        let outcome = match node.advance(wait_for_response) {
            Ok(outcome) => outcome,
            Err(err) => {
                log::error!("signal run {} stopped: {}", self.tracer.run_id(), err);
                self.finished = true;
                self.reported = true;
                return Err(err);
            }
        };
        if !outcome.complete {
            return Ok(false);
        }
        let result = outcome.result.unwrap_or(NodeValue::Null);
        Ok(self.complete(id, result))
    }

    /// Stops traversal once the current node's in-flight step resolves.
    pub fn abort(&mut self) {
        if !self.finished && !self.aborting {
            log::info!("signal run {} aborting", self.tracer.run_id());
            self.aborting = true;
        }
    }

    /// Resolves the current node's outstanding response with `value`.
    ///
    /// Returns whether a response was pending.
    pub fn force_response(&mut self, value: NodeValue) -> bool {
        let Some(id) = self.cursor() else {
            return false;
        };
        let node = &mut self.tree[id];
        let Some(outcome) = node.force_response(value) else {
            return false;
        };
        let result = outcome.result.unwrap_or(NodeValue::Null);
        self.tracer
            .record(self.tree[id].name(), NodeEvent::ResponseForced, result.clone());
        self.complete(id, result);
        true
    }

    fn complete(&mut self, id: NodeId, result: NodeValue) -> bool {
        let name = self.tree[id].name();
        log::debug!("signal node '{}' ({}) complete", name, id);
        self.tracer.record(name, NodeEvent::StepComplete, result);
        if self.aborting {
            return self.finish();
        }
        self.traversal.step_past(&self.tree, id);
        if self.traversal.cursor().is_none() {
            return self.finish();
        }
        false
    }

    fn finish(&mut self) -> bool {
        if !self.finished {
            self.finished = true;
            log::info!("signal run {} finished", self.tracer.run_id());
        }
        self.report()
    }

    fn report(&mut self) -> bool {
        let first = !self.reported;
        self.reported = true;
        first
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::FeatureError;
    use crate::core::node::{NodeOptions, SignalLogic};
    use crate::core::telemetry::MemoryTelemetry;
    use serde_json::json;
    use std::sync::Mutex;

    type Log = Arc<Mutex<Vec<String>>>;

    struct Step {
        label: &'static str,
        log: Log,
        acks_after: usize,
        polls: usize,
    }

    impl SignalLogic for Step {
        fn main(&mut self) -> Result<NodeValue, FeatureError> {
            self.log.lock().unwrap().push(format!("{}.main", self.label));
            Ok(json!(self.label))
        }

        fn response(&mut self) -> Result<Option<NodeValue>, FeatureError> {
            self.polls += 1;
            self.log.lock().unwrap().push(format!("{}.response", self.label));
            Ok((self.polls >= self.acks_after).then(|| json!("ok")))
        }
    }

    fn step(tree: &mut FeatureTree<SignalNode>, log: &Log, label: &'static str, options: NodeOptions) -> NodeId {
        let logic = Step {
            label,
            log: log.clone(),
            acks_after: 2,
            polls: 0,
        };
        tree.insert(SignalNode::new(label, options, logic))
    }

    /// a(response) with child b -> c -> d
    fn staged_tree(log: &Log) -> FeatureTree<SignalNode> {
        let mut tree = FeatureTree::new();
        let a = step(&mut tree, log, "a", NodeOptions::default().needs_response());
        let b = step(&mut tree, log, "b", NodeOptions::default());
        let c = step(&mut tree, log, "c", NodeOptions::default().device_related());
        let d = step(&mut tree, log, "d", NodeOptions::default());
        tree.set_child(a, Some(b));
        tree.set_sibling(b, Some(c));
        tree.set_sibling(c, Some(d));
        tree.set_root(Some(a));
        tree
    }

    #[test]
    fn test_response_unlocks_child_sequence() {
        let log = Log::default();
        let telemetry = Arc::new(MemoryTelemetry::new());
        let mut container = SignalContainer::new(staged_tree(&log)).with_telemetry(telemetry.clone(), Uuid::new_v4());

        let mut completions = 0;
        for _ in 0..20 {
            if container.advance().unwrap() {
                completions += 1;
            }
        }
        assert_eq!(completions, 1);
        assert!(container.is_finished());
        assert_eq!(
            *log.lock().unwrap(),
            vec!["a.main", "a.response", "a.response", "b.main", "c.main", "d.main"]
        );
        assert_eq!(
            telemetry.nodes(ExecutionContext::Signal, NodeEvent::StepComplete),
            vec!["a", "b", "c", "d"]
        );
    }

    #[test]
    fn test_empty_tree_finishes_on_first_advance() {
        let mut container = SignalContainer::new(FeatureTree::new());
        assert!(container.advance().unwrap());
        assert!(!container.advance().unwrap());
    }

    #[test]
    fn test_abort_waits_for_in_flight_response() {
        let log = Log::default();
        let mut container = SignalContainer::new(staged_tree(&log));
        assert!(!container.advance().unwrap());
        assert!(container.is_waiting());

        container.abort();
        assert!(!container.advance().unwrap());
        assert!(container.advance().unwrap());
        assert!(container.is_finished());
        assert_eq!(*log.lock().unwrap(), vec!["a.main", "a.response", "a.response"]);
    }

    #[test]
    fn test_abort_between_steps_stops_immediately() {
        let log = Log::default();
        let mut container = SignalContainer::new(staged_tree(&log));
        for _ in 0..4 {
            container.advance().unwrap();
        }
        assert_eq!(container.current().map(SignalNode::name), Some("c"));
        container.abort();
        assert!(container.advance().unwrap());
        assert!(!log.lock().unwrap().contains(&"c.main".to_string()));
    }

    #[test]
    fn test_force_response_moves_cursor_on() {
        let log = Log::default();
        let mut container = SignalContainer::new(staged_tree(&log));
        container.advance().unwrap();
        assert!(container.force_response(json!({"error": "timeout"})));
        assert_eq!(container.current().map(SignalNode::name), Some("b"));
        assert!(!container.force_response(json!(null)));
    }

    #[test]
    fn test_callback_error_stops_container() {
        struct Broken;
        impl SignalLogic for Broken {
            fn main(&mut self) -> Result<NodeValue, FeatureError> {
                Err("daq underrun".into())
            }
        }
        let mut tree = FeatureTree::new();
        let id = tree.insert(SignalNode::new("waveform", NodeOptions::default(), Broken));
        tree.set_root(Some(id));
        let mut container = SignalContainer::new(tree);

        let err = container.advance().unwrap_err();
        assert_eq!(err.node, "waveform");
        assert!(container.is_finished());
        assert!(!container.advance().unwrap());
    }
}
