//! Domain state handed to feature factories.
//!
//! The engine itself never reads frames. Data-side features hold a
//! [`FrameQueue`] and open their `pre_main` gate once a frame is queued.

use crate::core::NodeValue;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

/// One camera frame, or any other result produced by the signal context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub id: u64,
    #[serde(default)]
    pub payload: NodeValue,
}

impl Frame {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            payload: NodeValue::Null,
        }
    }

    pub fn with_payload(id: u64, payload: NodeValue) -> Self {
        Self { id, payload }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A bounded FIFO of frames shared between the controller and data features.
#[derive(Debug, Clone)]
pub struct FrameQueue {
    frames: Arc<Mutex<VecDeque<Frame>>>,
    capacity: usize,
}

impl Default for FrameQueue {
    fn default() -> Self {
        Self::with_capacity(64)
    }
}

impl FrameQueue {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            frames: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity: capacity.max(1),
        }
    }

    /// Queues a frame; when full, the oldest frame is dropped and returned.
    pub fn push(&self, frame: Frame) -> Option<Frame> {
        let mut frames = lock(&self.frames);
        let dropped = if frames.len() >= self.capacity {
            frames.pop_front()
        } else {
            None
        };
        if let Some(old) = &dropped {
            log::warn!("frame queue full, dropping frame {}", old.id);
        }
        frames.push_back(frame);
        dropped
    }

    pub fn pop(&self) -> Option<Frame> {
        lock(&self.frames).pop_front()
    }

    pub fn peek_id(&self) -> Option<u64> {
        lock(&self.frames).front().map(|frame| frame.id)
    }

    pub fn len(&self) -> usize {
        lock(&self.frames).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.frames).is_empty()
    }

    pub fn clear(&self) {
        lock(&self.frames).clear();
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Key/value state through which the two halves of a feature can talk.
#[derive(Debug, Clone, Default)]
pub struct SharedState {
    values: Arc<Mutex<HashMap<String, NodeValue>>>,
}

impl SharedState {
    pub fn get(&self, key: &str) -> Option<NodeValue> {
        lock(&self.values).get(key).cloned()
    }

    pub fn insert(&self, key: impl Into<String>, value: NodeValue) -> Option<NodeValue> {
        lock(&self.values).insert(key.into(), value)
    }

    pub fn remove(&self, key: &str) -> Option<NodeValue> {
        lock(&self.values).remove(key)
    }

    pub fn clear(&self) {
        lock(&self.values).clear();
    }
}

/// Everything a feature factory may capture besides its own arguments.
#[derive(Debug, Clone, Default)]
pub struct FeatureContext {
    frames: FrameQueue,
    shared: SharedState,
}

impl FeatureContext {
    pub fn new(frames: FrameQueue) -> Self {
        Self {
            frames,
            shared: SharedState::default(),
        }
    }

    pub fn frames(&self) -> &FrameQueue {
        &self.frames
    }

    pub fn shared(&self) -> &SharedState {
        &self.shared
    }
}
