use crate::core::NodeValue;
use crate::core::error::EngineError;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;

/// Tuning knobs of a [`Controller`](crate::core::controller::Controller) or
/// [`Runner`](crate::core::runner::Runner). Missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// How long a response may stay outstanding before it is forced.
    pub response_timeout_ms: u64,
    /// Pause between signal polls while a node waits on hardware.
    pub signal_poll_interval_ms: u64,
    /// Frames buffered for the data context before the oldest is dropped.
    pub frame_capacity: usize,
    /// Upper bound on data steps run for a single incoming frame.
    pub max_data_steps_per_frame: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            response_timeout_ms: 5000,
            signal_poll_interval_ms: 1,
            frame_capacity: 64,
            max_data_steps_per_frame: 256,
        }
    }
}

impl ControllerConfig {
    pub fn from_json(text: &str) -> Result<Self, EngineError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout_ms = millis(timeout);
        self
    }

    pub fn with_signal_poll_interval(mut self, interval: Duration) -> Self {
        self.signal_poll_interval_ms = millis(interval);
        self
    }

    pub fn with_frame_capacity(mut self, capacity: usize) -> Self {
        self.frame_capacity = capacity;
        self
    }

    pub fn with_max_data_steps_per_frame(mut self, steps: usize) -> Self {
        self.max_data_steps_per_frame = steps;
        self
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    pub fn signal_poll_interval(&self) -> Duration {
        Duration::from_millis(self.signal_poll_interval_ms)
    }
}

/// Whole milliseconds, saturating at `u64::MAX`.
fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// The value a timed-out response is forced to.
pub fn timeout_response(node: &str) -> NodeValue {
    json!({"error": "response timeout", "node": node})
}
