//! # acqtree
//!
//! A feature execution engine for microscope acquisitions: two synchronized,
//! tree-shaped state machines that sequence a procedure ("move stage, expose
//! camera, wait, repeat, save") across a *signal* context that drives
//! hardware and a *data* context that consumes the frames it produces.
//!
//! ## Features
//!
//! - **Isomorphic Trees**: one specification builds a signal tree and a data tree of the same shape
//! - **Cooperative Waiting**: responses and data gates are polled, never blocked on
//! - **Exactly-once Cleanup**: every data node is torn down once, even on abort or failure
//! - **Sync & Async Owners**: drive a run by hand with [`Controller`], or on tokio tasks with [`Runner`]
//!
//! ## Quick Start
//!
//! ```rust
//! use acqtree::prelude::*;
//!
//! struct Snap;
//!
//! impl SignalLogic for Snap {
//!     fn main(&mut self) -> Result<NodeValue, FeatureError> {
//!         // trigger the camera here
//!         Ok(NodeValue::Null)
//!     }
//! }
//!
//! struct Save {
//!     frames: FrameQueue,
//! }
//!
//! impl DataLogic for Save {
//!     fn pre_main(&mut self) -> Result<bool, FeatureError> {
//!         Ok(!self.frames.is_empty())
//!     }
//!
//!     fn main(&mut self) -> Result<NodeValue, FeatureError> {
//!         let frame = self.frames.pop().ok_or("frame went missing")?;
//!         Ok(NodeValue::from(frame.id))
//!     }
//! }
//!
//! let registry = FeatureRegistry::new().with(
//!     FeatureType::new("snap", |_, _| Ok(Snap))
//!         .with_data(|_, context| Ok(Save { frames: context.frames().clone() })),
//! );
//!
//! let spec = FeatureSpec::parse(r#"[[{"name": "snap"}, {"name": "snap"}]]"#)?;
//! let mut controller = Controller::new(registry);
//! controller.start(&spec)?;
//! while !controller.poll_signal()? {}
//! controller.on_data_ready(Frame::new(1))?;
//! controller.on_data_ready(Frame::new(2))?;
//! assert!(controller.is_finished());
//! # Ok::<(), acqtree::EngineError>(())
//! ```
//!
//! ## Module Organization
//!
//! - [`prelude`]: Everything needed to define features and run them (import with `use acqtree::prelude::*`)
//! - [`feature_prelude`]: Only what a feature implementation needs

// ============================================================================
// Core Module
// ============================================================================

mod core;

// ============================================================================
// Public Re-exports - Granular Imports
// ============================================================================

// Core types
pub use crate::core::NodeValue;
pub use crate::core::error::{CallbackError, CallbackPhase, EngineError, FeatureError, SpecificationError};

// Nodes and trees
pub use crate::core::node::{
    DataLogic, DataNode, NodeCore, NodeKind, NodeOptions, NodeOverrides, NodeState, SignalLogic,
    SignalNode, StepOutcome,
};
pub use crate::core::tree::{FeatureTree, NodeId};

// Execution containers
pub use crate::core::container::{DataContainer, Progress, SignalContainer, Traversal};

// From specification to trees
pub use crate::core::builder::TreeBuilder;
pub use crate::core::registry::{FeatureArgs, FeatureRegistry, FeatureType, ParamKind, ParamSpec};
pub use crate::core::spec::{FeatureSpec, StepDescriptor, StepEntry};
pub use crate::core::validation::{ValidationIssue, ValidationResult, validate};

// Run owners
pub use crate::core::config::{ControllerConfig, timeout_response};
pub use crate::core::controller::Controller;
pub use crate::core::frames::{FeatureContext, Frame, FrameQueue, SharedState};
pub use crate::core::runner::{RunHandle, RunSummary, Runner};

// Telemetry
pub use crate::core::telemetry::{ExecutionContext, MemoryTelemetry, NodeEvent, Telemetry, TraceEntry};

// ============================================================================
// Prelude Modules - Convenient Bulk Imports
// ============================================================================

/// The main prelude: features, specifications and both run owners.
///
/// # Example
/// ```rust
/// use acqtree::prelude::*;
/// ```
pub mod prelude {
    pub use super::{
        // Run owners
        Controller,
        ControllerConfig,
        // Features
        DataLogic,
        EngineError,
        FeatureArgs,
        FeatureContext,
        FeatureError,
        FeatureRegistry,
        // Specifications
        FeatureSpec,
        FeatureType,
        Frame,
        FrameQueue,
        NodeOptions,
        NodeValue,
        ParamKind,
        ParamSpec,
        RunHandle,
        Runner,
        SignalLogic,
        StepDescriptor,
        StepEntry,
    };
}

/// Prelude for feature implementations.
///
/// Use this in crates that only provide feature types and never start runs.
///
/// # Example
/// ```rust
/// use acqtree::feature_prelude::*;
/// ```
pub mod feature_prelude {
    pub use super::{
        DataLogic, FeatureArgs, FeatureContext, FeatureError, FeatureType, FrameQueue, NodeOptions,
        NodeValue, ParamKind, ParamSpec, SharedState, SignalLogic,
    };
}

// ============================================================================
// Re-export commonly used external types for convenience
// ============================================================================

pub use serde_json::Value as JsonValue;

// ============================================================================
// Library Metadata
// ============================================================================

/// The version of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// The name of this crate.
pub const NAME: &str = env!("CARGO_PKG_NAME");
