//! Feature nodes: the units of work walked by the execution containers.
//!
//! Every node carries a [`NodeCore`] with its name, options and lifecycle
//! [`NodeState`], plus boxed feature callbacks:
//! - [`SignalNode`] drives a [`SignalLogic`] (init / main / response / end)
//! - [`DataNode`] drives a [`DataLogic`] (init / pre_main / main / response / end / cleanup)

pub mod data;
pub mod signal;

pub use data::{DataLogic, DataNode};
pub use signal::{SignalLogic, SignalNode};

use crate::core::NodeValue;
use crate::core::error::{CallbackError, CallbackPhase, FeatureError};
use serde::{Deserialize, Serialize};

/// Whether a node finishes after one `main` call or repeats until `end` holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeKind {
    #[default]
    #[serde(alias = "one-step")]
    SingleStep,
    MultiStep,
}

/// Static behaviour flags of a node, fixed at build time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NodeOptions {
    pub kind: NodeKind,
    /// Step boundaries wait on a hardware acknowledgment.
    pub device_related: bool,
    /// `main` must be confirmed by `response` before the node moves on.
    pub needs_response: bool,
}

impl NodeOptions {
    pub fn multi_step(mut self) -> Self {
        self.kind = NodeKind::MultiStep;
        self
    }

    pub fn device_related(mut self) -> Self {
        self.device_related = true;
        self
    }

    pub fn needs_response(mut self) -> Self {
        self.needs_response = true;
        self
    }

    /// Returns these options with every field set in `overrides` replaced.
    pub fn apply(self, overrides: &NodeOverrides) -> Self {
        Self {
            kind: overrides.node_type.unwrap_or(self.kind),
            device_related: overrides.device_related.unwrap_or(self.device_related),
            needs_response: overrides.needs_response.unwrap_or(self.needs_response),
        }
    }

    pub fn is_multi_step(&self) -> bool {
        self.kind == NodeKind::MultiStep
    }
}

/// Per-step overrides of a feature type's default [`NodeOptions`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_type: Option<NodeKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_related: Option<bool>,
    #[serde(default, alias = "need_response", skip_serializing_if = "Option::is_none")]
    pub needs_response: Option<bool>,
}

impl NodeOverrides {
    pub fn is_empty(&self) -> bool {
        self.node_type.is_none() && self.device_related.is_none() && self.needs_response.is_none()
    }
}

/// Lifecycle of a node within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum NodeState {
    /// Not initialised yet.
    #[default]
    Idle,
    /// Initialised; the next step may call `main`.
    Running,
    /// A device-related step finished and the hardware must settle before the next `main`.
    Settling,
    /// `main` ran and the node waits for `response` to confirm it.
    AwaitingResponse,
    /// `end` held; the node is done.
    Complete,
}

impl NodeState {
    pub fn is_initialized(&self) -> bool {
        matches!(
            self,
            NodeState::Running | NodeState::Settling | NodeState::AwaitingResponse
        )
    }

    /// True when the next useful call is `advance(true)`.
    pub fn is_waiting(&self) -> bool {
        matches!(self, NodeState::Settling | NodeState::AwaitingResponse)
    }
}

/// What a single `advance` call produced.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StepOutcome {
    /// The value of the `main` (or `response`) callback that ran, if any.
    pub result: Option<NodeValue>,
    /// The node has finished all of its steps.
    pub complete: bool,
}

impl StepOutcome {
    pub fn pending() -> Self {
        Self::default()
    }

    fn stepped(result: NodeValue, complete: bool) -> Self {
        Self {
            result: Some(result),
            complete,
        }
    }
}

/// Bookkeeping shared by signal and data nodes.
#[derive(Debug, Clone)]
pub struct NodeCore {
    pub name: String,
    pub options: NodeOptions,
    pub state: NodeState,
    last_result: Option<NodeValue>,
}

impl NodeCore {
    pub fn new(name: impl Into<String>, options: NodeOptions) -> Self {
        Self {
            name: name.into(),
            options,
            state: NodeState::Idle,
            last_result: None,
        }
    }

    /// A finished single-step node answers from its cache instead of running again.
    fn cached(&self) -> Option<StepOutcome> {
        if self.state == NodeState::Complete && !self.options.is_multi_step() {
            return Some(StepOutcome {
                result: self.last_result.clone(),
                complete: true,
            });
        }
        None
    }

    /// Records the result of one step; `done` is the value of `end` for multi-step nodes.
    fn conclude(&mut self, result: NodeValue, done: bool, settle: bool) -> StepOutcome {
        if done {
            self.state = NodeState::Complete;
            self.last_result = Some(result.clone());
            log::debug!("node '{}' complete", self.name);
        } else if settle {
            self.state = NodeState::Settling;
        } else {
            self.state = NodeState::Running;
        }
        StepOutcome::stepped(result, done)
    }

    fn wrap(&self, phase: CallbackPhase) -> impl FnOnce(FeatureError) -> CallbackError + '_ {
        move |source| CallbackError::new(self.name.clone(), phase, source)
    }
}
