//! The feature execution engine.
//!
//! Leaves first:
//! - [`node`]: feature nodes and their lifecycle state machine
//! - [`tree`]: the arena both trees live in
//! - [`container`]: the signal and data execution containers
//! - [`registry`], [`spec`], [`validation`], [`builder`]: from a specification to two trees
//! - [`controller`] and [`runner`]: owners of a run

pub mod builder;
pub mod config;
pub mod container;
pub mod controller;
pub mod error;
pub mod frames;
pub mod node;
pub mod registry;
pub mod runner;
pub mod spec;
pub mod telemetry;
pub mod tree;
pub mod validation;

/// The Alias for serde_json::Value, used for every callback result and argument
pub type NodeValue = serde_json::Value;
