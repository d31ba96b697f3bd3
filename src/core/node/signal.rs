use crate::core::NodeValue;
use crate::core::error::{CallbackError, CallbackPhase, FeatureError};
use crate::core::node::{NodeCore, NodeOptions, NodeState, StepOutcome};

/// The hardware-facing half of a feature.
///
/// Implementations issue device commands from `main` and report their
/// acknowledgment from `response`. Only `main` is required.
pub trait SignalLogic: Send + 'static {
    /// Runs once each time the node is entered.
    fn init(&mut self) -> Result<(), FeatureError> {
        Ok(())
    }

    /// Performs one step.
    fn main(&mut self) -> Result<NodeValue, FeatureError>;

    /// Polls for confirmation of the last `main`.
    ///
    /// `Ok(None)` means the acknowledgment has not arrived yet; the node will
    /// be polled again on a later `advance(true)`.
    fn response(&mut self) -> Result<Option<NodeValue>, FeatureError> {
        Ok(Some(NodeValue::Null))
    }

    /// Reports whether every step of a multi-step node is done.
    fn end(&mut self) -> Result<bool, FeatureError> {
        Ok(true)
    }
}

/// A node of the signal tree.
pub struct SignalNode {
    pub core: NodeCore,
    logic: Box<dyn SignalLogic>,
}

impl std::fmt::Debug for SignalNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalNode").field("core", &self.core).finish_non_exhaustive()
    }
}

impl SignalNode {
    pub fn new<L: SignalLogic>(name: impl Into<String>, options: NodeOptions, logic: L) -> Self {
        Self::from_boxed(name, options, Box::new(logic))
    }

    pub fn from_boxed(
        name: impl Into<String>,
        options: NodeOptions,
        logic: Box<dyn SignalLogic>,
    ) -> Self {
        Self {
            core: NodeCore::new(name, options),
            logic,
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

    pub fn is_waiting(&self) -> bool {
        self.core.state.is_waiting()
    }

    /// Device and response nodes treat `wait_for_response` as a request to
    /// collect an acknowledgment, never as a request to issue a command.
    fn gated(&self) -> bool {
        self.core.options.device_related || self.core.options.needs_response
    }

    /// Moves the node forward by at most one callback step.
    pub fn advance(&mut self, wait_for_response: bool) -> Result<StepOutcome, CallbackError> {
        if let Some(cached) = self.core.cached() {
            return Ok(cached);
        }

        match self.core.state {
            NodeState::Idle | NodeState::Complete => {
                self.logic
                    .init()
                    .map_err(self.core.wrap(CallbackPhase::Init))?;
                self.core.state = NodeState::Running;
                if wait_for_response && self.gated() {
                    return Ok(StepOutcome::pending());
                }
                self.run_main()
            }
            NodeState::Running => {
                if wait_for_response && self.gated() {
                    return Ok(StepOutcome::pending());
                }
                self.run_main()
            }
            NodeState::Settling => {
                if wait_for_response {
                    self.core.state = NodeState::Running;
                }
                Ok(StepOutcome::pending())
            }
            NodeState::AwaitingResponse => {
                if !wait_for_response {
                    return Ok(StepOutcome::pending());
                }
                let response = self
                    .logic
                    .response()
                    .map_err(self.core.wrap(CallbackPhase::Response))?;
                match response {
                    Some(value) => self.finish_step(value, false),
                    None => Ok(StepOutcome::pending()),
                }
            }
        }
    }

    /// Resolves an outstanding response with `value` without polling the feature.
    ///
    /// Returns `None` when the node was not awaiting a response.
    pub fn force_response(&mut self, value: NodeValue) -> Option<StepOutcome> {
        if self.core.state != NodeState::AwaitingResponse {
            return None;
        }
        log::warn!("forcing response of signal node '{}'", self.core.name);
        Some(self.core.conclude(value, true, false))
    }

    fn run_main(&mut self) -> Result<StepOutcome, CallbackError> {
        let result = self
            .logic
            .main()
            .map_err(self.core.wrap(CallbackPhase::Main))?;
        if self.core.options.needs_response {
            self.core.state = NodeState::AwaitingResponse;
            return Ok(StepOutcome::pending());
        }
        let settle = self.core.options.device_related;
        self.finish_step(result, settle)
    }

    fn finish_step(&mut self, result: NodeValue, settle: bool) -> Result<StepOutcome, CallbackError> {
        let done = if self.core.options.is_multi_step() {
            self.logic.end().map_err(self.core.wrap(CallbackPhase::End))?
        } else {
            true
        };
        Ok(self.core.conclude(result, done, settle))
    }
}
