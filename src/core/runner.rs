//! Both execution contexts of a run, each on its own tokio task.
//!
//! The signal context runs on the blocking pool because feature callbacks
//! talk to hardware synchronously. The data context is an async task woken
//! by frames from an mpsc channel. Neither touches the other's container;
//! an abort reaches both through a `watch` channel.

use crate::core::config::{ControllerConfig, timeout_response};
use crate::core::container::{DataContainer, Progress, SignalContainer};
use crate::core::controller::{ResponseClock, Run, data_waiting_on, force_data_timeout, run_data};
use crate::core::error::EngineError;
use crate::core::frames::{FeatureContext, Frame, FrameQueue};
use crate::core::node::SignalNode;
use crate::core::registry::FeatureRegistry;
use crate::core::spec::FeatureSpec;
use crate::core::telemetry::Telemetry;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// What one finished run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub run_id: Uuid,
    /// Calls to the signal container's `advance`.
    pub signal_polls: u64,
    /// Frames delivered to the data context.
    pub frames_received: u64,
    /// The run was ended early by an abort, a timeout or a failure.
    pub aborted: bool,
}

#[derive(Debug, Default)]
struct SignalReport {
    polls: u64,
}

#[derive(Debug, Default)]
struct DataReport {
    frames: u64,
}

/// Starts runs whose two execution contexts pace themselves.
pub struct Runner {
    registry: FeatureRegistry,
    config: ControllerConfig,
    telemetry: Option<Arc<dyn Telemetry>>,
}

impl Runner {
    pub fn new(registry: FeatureRegistry) -> Self {
        Self {
            registry,
            config: ControllerConfig::default(),
            telemetry: None,
        }
    }

    pub fn with_config(mut self, config: ControllerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_telemetry(mut self, telemetry: Arc<dyn Telemetry>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Builds the trees for `spec` and spawns both contexts.
    ///
    /// Must be called from within a tokio runtime. Specification errors are
    /// returned before anything is spawned.
    pub fn start(&self, spec: &FeatureSpec) -> Result<RunHandle, EngineError> {
        let Run {
            id,
            signal,
            data,
            context,
            ..
        } = Run::prepare(&self.registry, &self.config, self.telemetry.clone(), spec)?;

        let (frame_tx, frame_rx) = mpsc::channel(self.config.frame_capacity.max(1));
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let cancel = Arc::new(cancel_tx);

        let signal_task = {
            let config = self.config.clone();
            let cancel = cancel.clone();
            let cancel_rx = cancel_rx.clone();
            tokio::task::spawn_blocking(move || drive_signal(signal, &config, &cancel, cancel_rx))
        };
        let data_task = {
            let config = self.config.clone();
            let frames = context.frames().clone();
            let cancel = cancel.clone();
            tokio::spawn(drive_data(data, frames, frame_rx, config, cancel, cancel_rx))
        };

        Ok(RunHandle {
            run_id: id,
            context,
            frames: Some(frame_tx),
            cancel,
            signal: signal_task,
            data: data_task,
            telemetry: self.telemetry.clone(),
        })
    }
}

/// Owner's view of a run started by a [`Runner`].
pub struct RunHandle {
    run_id: Uuid,
    context: FeatureContext,
    frames: Option<mpsc::Sender<Frame>>,
    cancel: Arc<watch::Sender<bool>>,
    signal: JoinHandle<Result<SignalReport, EngineError>>,
    data: JoinHandle<Result<DataReport, EngineError>>,
    telemetry: Option<Arc<dyn Telemetry>>,
}

impl RunHandle {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn context(&self) -> &FeatureContext {
        &self.context
    }

    /// A sender for frames, e.g. for a camera thread. `None` after
    /// [`close_frames`](RunHandle::close_frames).
    pub fn frame_sender(&self) -> Option<mpsc::Sender<Frame>> {
        self.frames.clone()
    }

    /// Delivers a frame to the data context. Returns `false` once that
    /// context has stopped listening.
    pub async fn send_frame(&self, frame: Frame) -> bool {
        match &self.frames {
            Some(frames) => frames.send(frame).await.is_ok(),
            None => false,
        }
    }

    /// No more frames will come; the data context ends once it runs dry.
    pub fn close_frames(&mut self) {
        self.frames = None;
    }

    /// Ends the run early. The signal context stops after its in-flight
    /// step; the data context ends with every node cleaned up.
    pub fn abort(&self) {
        self.cancel.send_replace(true);
    }

    pub fn is_finished(&self) -> bool {
        self.signal.is_finished() && self.data.is_finished()
    }

    /// Waits for both contexts. The signal context's error wins when both fail.
    pub async fn join(self) -> Result<RunSummary, EngineError> {
        let RunHandle {
            run_id,
            frames,
            cancel,
            signal,
            data,
            telemetry,
            ..
        } = self;
        drop(frames);

        let (signal, data) = futures::future::join(signal, data).await;
        let signal = signal.map_err(|err| EngineError::Join(err.to_string()));
        let data = data.map_err(|err| EngineError::Join(err.to_string()));
        if let Some(telemetry) = &telemetry {
            telemetry.flush();
        }
        let signal = signal??;
        let data = data??;

        let summary = RunSummary {
            run_id,
            signal_polls: signal.polls,
            frames_received: data.frames,
            aborted: *cancel.borrow(),
        };
        log::info!("acquisition run {} joined: {:?}", run_id, summary);
        Ok(summary)
    }
}

fn drive_signal(
    mut signal: SignalContainer,
    config: &ControllerConfig,
    cancel: &watch::Sender<bool>,
    cancel_rx: watch::Receiver<bool>,
) -> Result<SignalReport, EngineError> {
    let mut report = SignalReport::default();
    let mut clock = ResponseClock::default();
    let timeout = config.response_timeout();

    loop {
        if *cancel_rx.borrow() {
            signal.abort();
        }
        report.polls += 1;
        let done = signal.advance().inspect_err(|_| {
            cancel.send_replace(true);
        })?;
        if done || signal.is_finished() {
            return Ok(report);
        }

        let awaiting = signal.current().filter(|node| node.awaiting_response());
        if let Some(waited) = clock.check(awaiting.is_some(), timeout) {
            let node = awaiting.map(SignalNode::name).unwrap_or_default().to_string();
            log::warn!("signal node '{}' got no response within {:?}", node, waited);
            signal.force_response(timeout_response(&node));
            cancel.send_replace(true);
            return Err(EngineError::ResponseTimeout { node, waited });
        }
        if signal.is_waiting() {
            std::thread::sleep(config.signal_poll_interval());
        }
    }
}

async fn drive_data(
    mut data: DataContainer,
    frames: FrameQueue,
    mut frame_rx: mpsc::Receiver<Frame>,
    config: ControllerConfig,
    cancel: Arc<watch::Sender<bool>>,
    mut cancel_rx: watch::Receiver<bool>,
) -> Result<DataReport, EngineError> {
    let mut report = DataReport::default();
    let mut clock = ResponseClock::default();
    let mut input_open = true;
    let timeout = config.response_timeout();

    loop {
        let progress = run_data(&mut data, config.max_data_steps_per_frame).inspect_err(|_| {
            cancel.send_replace(true);
        })?;
        if data.is_finished() {
            return Ok(report);
        }
        if progress == Progress::Advanced {
            tokio::task::yield_now().await;
            continue;
        }

        let waiting = data_waiting_on(&data).map(str::to_string);
        if let Some(waited) = clock.check(waiting.is_some(), timeout) {
            let node = waiting.unwrap_or_default();
            cancel.send_replace(true);
            force_data_timeout(&mut data, &node, waited)?;
            return Err(EngineError::ResponseTimeout { node, waited });
        }

        let ending = data.is_ending();
        tokio::select! {
            frame = frame_rx.recv(), if input_open => match frame {
                Some(frame) => {
                    report.frames += 1;
                    frames.push(frame);
                }
                None => {
                    log::debug!("frame input closed, ending data run {}", data.run_id());
                    input_open = false;
                    data.abort()?;
                }
            },
            _ = cancel_rx.changed(), if !ending => {
                data.abort()?;
            }
            _ = tokio::time::sleep(config.signal_poll_interval()), if waiting.is_some() || (ending && !input_open) => {}
        }
    }
}
