use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// The error a feature callback reports back to the engine.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct FeatureError(pub String);

impl FeatureError {
    pub fn new(message: impl Into<String>) -> Self {
        FeatureError(message.into())
    }
}

impl From<String> for FeatureError {
    fn from(message: String) -> Self {
        FeatureError(message)
    }
}

impl From<&str> for FeatureError {
    fn from(message: &str) -> Self {
        FeatureError(message.to_string())
    }
}

/// The lifecycle callback that was running when a feature failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallbackPhase {
    Init,
    PreMain,
    Main,
    Response,
    End,
    Cleanup,
}

impl std::fmt::Display for CallbackPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CallbackPhase::Init => "init",
            CallbackPhase::PreMain => "pre_main",
            CallbackPhase::Main => "main",
            CallbackPhase::Response => "response",
            CallbackPhase::End => "end",
            CallbackPhase::Cleanup => "cleanup",
        };
        f.write_str(name)
    }
}

/// A feature callback failed while the engine was driving a node.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("node '{node}' failed in {phase}: {source}")]
pub struct CallbackError {
    pub node: String,
    pub phase: CallbackPhase,
    #[source]
    pub source: FeatureError,
}

impl CallbackError {
    pub fn new(node: impl Into<String>, phase: CallbackPhase, source: FeatureError) -> Self {
        Self {
            node: node.into(),
            phase,
            source,
        }
    }
}

/// A specification could not be parsed, validated or turned into trees.
#[derive(Debug, Error)]
pub enum SpecificationError {
    #[error("unknown feature type '{name}' at stage {stage}, step {step}")]
    UnknownFeature {
        name: String,
        stage: usize,
        step: usize,
    },

    #[error("cannot bind arguments for '{feature}': {reason}")]
    ArgumentMismatch { feature: String, reason: String },

    #[error("feature '{feature}' could not be instantiated: {source}")]
    Instantiation {
        feature: String,
        #[source]
        source: FeatureError,
    },

    #[error("specification contains no steps")]
    Empty,

    #[error("malformed specification text: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("specification file error: {0}")]
    Io(#[from] std::io::Error),
}

/// Everything that can stop an acquisition run.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Specification(#[from] SpecificationError),

    #[error(transparent)]
    Callback(#[from] CallbackError),

    #[error("no response from node '{node}' within {waited:?}")]
    ResponseTimeout { node: String, waited: Duration },

    #[error("no acquisition run has been started")]
    NotStarted,

    #[error("acquisition run {0} is still in progress")]
    AlreadyRunning(Uuid),

    #[error("invalid controller configuration: {0}")]
    Config(#[from] serde_json::Error),

    #[error("execution context terminated abnormally: {0}")]
    Join(String),
}
