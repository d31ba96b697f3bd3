//! Recording features shared by the integration tests.
//!
//! Every callback appends `"<feature>.<callback>"` to a shared journal so
//! tests can assert on call order and counts.

#![allow(dead_code)]

use acqtree::prelude::*;
use serde_json::json;
use std::sync::{Arc, Mutex};

pub type Journal = Arc<Mutex<Vec<String>>>;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn journal() -> Journal {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn count(journal: &Journal, entry: &str) -> usize {
    journal.lock().unwrap().iter().filter(|e| e.as_str() == entry).count()
}

/// Entries ending in `.{callback}`, with the suffix stripped.
pub fn calls(journal: &Journal, callback: &str) -> Vec<String> {
    let suffix = format!(".{}", callback);
    journal
        .lock()
        .unwrap()
        .iter()
        .filter_map(|e| e.strip_suffix(&suffix).map(str::to_string))
        .collect()
}

fn note(journal: &Journal, name: &str, callback: &str) {
    journal.lock().unwrap().push(format!("{}.{}", name, callback));
}

/// Acknowledges every `acks_after`-th response poll; 0 never acknowledges.
struct Ack {
    acks_after: u64,
    polls: u64,
}

impl Ack {
    fn poll(&mut self) -> bool {
        self.polls += 1;
        if self.acks_after == 0 || self.polls < self.acks_after {
            return false;
        }
        self.polls = 0;
        true
    }
}

pub struct SignalRecorder {
    name: String,
    journal: Journal,
    steps: u64,
    mains: u64,
    ack: Ack,
}

impl SignalLogic for SignalRecorder {
    fn init(&mut self) -> Result<(), FeatureError> {
        self.mains = 0;
        note(&self.journal, &self.name, "init");
        Ok(())
    }

    fn main(&mut self) -> Result<NodeValue, FeatureError> {
        self.mains += 1;
        note(&self.journal, &self.name, "main");
        Ok(json!(self.mains))
    }

    fn response(&mut self) -> Result<Option<NodeValue>, FeatureError> {
        note(&self.journal, &self.name, "response");
        Ok(self.ack.poll().then(|| json!("ack")))
    }

    fn end(&mut self) -> Result<bool, FeatureError> {
        note(&self.journal, &self.name, "end");
        Ok(self.mains >= self.steps)
    }
}

pub struct DataRecorder {
    name: String,
    journal: Journal,
    frames: FrameQueue,
    steps: u64,
    mains: u64,
    ack: Ack,
}

impl DataLogic for DataRecorder {
    fn pre_main(&mut self) -> Result<bool, FeatureError> {
        Ok(!self.frames.is_empty())
    }

    fn main(&mut self) -> Result<NodeValue, FeatureError> {
        let frame = self.frames.pop().ok_or("gate opened without a frame")?;
        self.mains += 1;
        note(&self.journal, &self.name, "data");
        Ok(json!(frame.id))
    }

    fn response(&mut self) -> Result<Option<NodeValue>, FeatureError> {
        note(&self.journal, &self.name, "data_response");
        Ok(self.ack.poll().then(|| json!("written")))
    }

    fn end(&mut self) -> Result<bool, FeatureError> {
        Ok(self.mains >= self.steps)
    }

    fn cleanup(&mut self) -> Result<(), FeatureError> {
        note(&self.journal, &self.name, "cleanup");
        Ok(())
    }
}

/// A recording feature with both sides.
///
/// Args: `steps` (default 1), `acks_after` for the signal side (default 1),
/// `data_acks_after` for the data side (default 1, 0 never acknowledges).
pub fn recording(name: &str, options: NodeOptions, journal: &Journal) -> FeatureType {
    let signal_journal = journal.clone();
    let data_journal = journal.clone();
    let signal_name = name.to_string();
    let data_name = name.to_string();
    FeatureType::new(name, move |args, _| {
        Ok(SignalRecorder {
            name: signal_name.clone(),
            journal: signal_journal.clone(),
            steps: args.integer("steps").unwrap_or(1) as u64,
            mains: 0,
            ack: Ack {
                acks_after: args.integer("acks_after").unwrap_or(1) as u64,
                polls: 0,
            },
        })
    })
    .with_data(move |args, context| {
        Ok(DataRecorder {
            name: data_name.clone(),
            journal: data_journal.clone(),
            frames: context.frames().clone(),
            steps: args.integer("steps").unwrap_or(1) as u64,
            mains: 0,
            ack: Ack {
                acks_after: args.integer("data_acks_after").unwrap_or(1) as u64,
                polls: 0,
            },
        })
    })
    .param(ParamSpec::optional("steps", ParamKind::Integer, json!(1)))
    .param(ParamSpec::optional("acks_after", ParamKind::Integer, json!(1)))
    .param(ParamSpec::optional("data_acks_after", ParamKind::Integer, json!(1)))
    .options(options)
}

/// A recording feature with no data side.
pub fn signal_only(name: &str, journal: &Journal) -> FeatureType {
    let journal = journal.clone();
    let owned = name.to_string();
    FeatureType::new(name, move |_, _| {
        Ok(SignalRecorder {
            name: owned.clone(),
            journal: journal.clone(),
            steps: 1,
            mains: 0,
            ack: Ack {
                acks_after: 1,
                polls: 0,
            },
        })
    })
}
