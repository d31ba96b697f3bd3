use crate::core::NodeValue;
use crate::core::error::{CallbackError, CallbackPhase, FeatureError};
use crate::core::node::{NodeCore, NodeOptions, NodeState, StepOutcome};

/// The result-consuming half of a feature.
///
/// `pre_main` is the only suspension point of the data context and must not
/// block: report `false` and the node is polled again on a later advance.
pub trait DataLogic: Send + 'static {
    fn init(&mut self) -> Result<(), FeatureError> {
        Ok(())
    }

    /// Is the data this node consumes available yet?
    fn pre_main(&mut self) -> Result<bool, FeatureError> {
        Ok(true)
    }

    fn main(&mut self) -> Result<NodeValue, FeatureError>;

    fn response(&mut self) -> Result<Option<NodeValue>, FeatureError> {
        Ok(Some(NodeValue::Null))
    }

    fn end(&mut self) -> Result<bool, FeatureError> {
        Ok(true)
    }

    /// Terminal teardown. The engine calls it at most once per node.
    fn cleanup(&mut self) -> Result<(), FeatureError> {
        Ok(())
    }
}

/// A node of the data tree.
pub struct DataNode {
    pub core: NodeCore,
    logic: Box<dyn DataLogic>,
    marked_for_removal: bool,
    end_requested: bool,
}

impl std::fmt::Debug for DataNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataNode")
            .field("core", &self.core)
            .field("marked_for_removal", &self.marked_for_removal)
            .field("end_requested", &self.end_requested)
            .finish_non_exhaustive()
    }
}

impl DataNode {
    pub fn new<L: DataLogic>(name: impl Into<String>, options: NodeOptions, logic: L) -> Self {
        Self::from_boxed(name, options, Box::new(logic))
    }

    pub fn from_boxed(name: impl Into<String>, options: NodeOptions, logic: Box<dyn DataLogic>) -> Self {
        Self {
            core: NodeCore::new(name, options),
            logic,
            marked_for_removal: false,
            end_requested: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.core.name
    }

    pub fn options(&self) -> NodeOptions {
        self.core.options
    }

    pub fn state(&self) -> NodeState {
        self.core.state
    }

    pub fn is_initialized(&self) -> bool {
        self.core.state.is_initialized()
    }

    pub fn awaiting_response(&self) -> bool {
        self.core.state == NodeState::AwaitingResponse
    }

    /// Set once `cleanup` has been invoked; the node never runs again.
    pub fn is_marked_for_removal(&self) -> bool {
        self.marked_for_removal
    }

    /// Cleanup was requested but waits for an outstanding response.
    pub fn cleanup_deferred(&self) -> bool {
        self.end_requested && !self.marked_for_removal
    }

    /// Still has steps to run or a response to drain.
    pub fn is_live(&self) -> bool {
        !self.marked_for_removal && self.core.state != NodeState::Complete
    }

    /// Moves the node forward by at most one callback step.
    ///
    /// Returns `Ok(None)` when `pre_main` reports that no data is ready; the
    /// node stays where it is and should be advanced again later.
    pub fn advance(&mut self, wait_for_response: bool) -> Result<Option<StepOutcome>, CallbackError> {
        if self.marked_for_removal {
            return Ok(Some(StepOutcome {
                result: None,
                complete: true,
            }));
        }
        if let Some(cached) = self.core.cached() {
            return Ok(Some(cached));
        }

        match self.core.state {
            NodeState::Idle | NodeState::Complete => {
                self.logic
                    .init()
                    .map_err(self.core.wrap(CallbackPhase::Init))?;
                self.core.state = NodeState::Running;
                self.run_main()
            }
            NodeState::Running | NodeState::Settling => self.run_main(),
            NodeState::AwaitingResponse => {
                if !wait_for_response {
                    return Ok(Some(StepOutcome::pending()));
                }
                let response = self
                    .logic
                    .response()
                    .map_err(self.core.wrap(CallbackPhase::Response))?;
                match response {
                    Some(value) => self.drain(value).map(Some),
                    None => Ok(Some(StepOutcome::pending())),
                }
            }
        }
    }

    /// Asks the node to finish.
    ///
    /// Runs `cleanup` right away unless a response is outstanding, in which
    /// case cleanup runs when that response drains. Returns whether cleanup
    /// has happened.
    pub fn request_end(&mut self) -> Result<bool, CallbackError> {
        if self.marked_for_removal {
            return Ok(true);
        }
        self.end_requested = true;
        if self.awaiting_response() {
            log::debug!("cleanup of data node '{}' deferred until its response drains", self.core.name);
            return Ok(false);
        }
        self.cleanup()?;
        Ok(true)
    }

    /// Resolves an outstanding response with `value` without polling the
    /// feature, then runs any deferred cleanup.
    pub fn force_response(&mut self, value: NodeValue) -> Result<Option<StepOutcome>, CallbackError> {
        if !self.awaiting_response() {
            return Ok(None);
        }
        log::warn!("forcing response of data node '{}'", self.core.name);
        let outcome = self.core.conclude(value, true, false);
        if self.end_requested {
            self.cleanup()?;
        }
        Ok(Some(outcome))
    }

    fn run_main(&mut self) -> Result<Option<StepOutcome>, CallbackError> {
        let ready = self
            .logic
            .pre_main()
            .map_err(self.core.wrap(CallbackPhase::PreMain))?;
        if !ready {
            return Ok(None);
        }
        let result = self
            .logic
            .main()
            .map_err(self.core.wrap(CallbackPhase::Main))?;
        if self.core.options.needs_response {
            self.core.state = NodeState::AwaitingResponse;
            return Ok(Some(StepOutcome::pending()));
        }
        self.finish_step(result).map(Some)
    }

    fn drain(&mut self, value: NodeValue) -> Result<StepOutcome, CallbackError> {
        let outcome = self.finish_step(value)?;
        if self.end_requested {
            self.cleanup()?;
        }
        Ok(outcome)
    }

    fn finish_step(&mut self, result: NodeValue) -> Result<StepOutcome, CallbackError> {
        let done = if self.core.options.is_multi_step() {
            self.logic.end().map_err(self.core.wrap(CallbackPhase::End))?
        } else {
            true
        };
        Ok(self.core.conclude(result, done, false))
    }

    fn cleanup(&mut self) -> Result<(), CallbackError> {
        self.marked_for_removal = true;
        if self.core.state.is_initialized() {
            self.core.state = NodeState::Complete;
        }
        log::debug!("cleaning up data node '{}'", self.core.name);
        self.logic
            .cleanup()
            .map_err(self.core.wrap(CallbackPhase::Cleanup))
    }
}
