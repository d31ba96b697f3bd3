//! The synchronous owner of one acquisition run.
//!
//! A [`Controller`] builds both trees from a specification, then leaves the
//! pacing to its caller: [`poll_signal`](Controller::poll_signal) from the
//! hardware loop, [`on_data_ready`](Controller::on_data_ready) whenever a
//! frame arrives. It also enforces the response timeout that the engine
//! itself does not know about.

use crate::core::builder::TreeBuilder;
use crate::core::config::{ControllerConfig, timeout_response};
use crate::core::container::{DataContainer, Progress, SignalContainer};
use crate::core::error::{CallbackError, EngineError};
use crate::core::frames::{FeatureContext, Frame, FrameQueue};
use crate::core::node::{DataNode, SignalNode};
use crate::core::registry::FeatureRegistry;
use crate::core::spec::FeatureSpec;
use crate::core::telemetry::Telemetry;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Measures how long a node has been waiting on its response.
#[derive(Debug, Default)]
pub(crate) struct ResponseClock {
    since: Option<Instant>,
}

impl ResponseClock {
    /// Returns how long the wait lasted once it reaches `timeout`.
    ///
    /// The first observation of a wait only starts the clock, so a response
    /// always gets at least one poll.
    pub(crate) fn check(&mut self, waiting: bool, timeout: Duration) -> Option<Duration> {
        if !waiting {
            self.since = None;
            return None;
        }
        let Some(since) = self.since else {
            self.since = Some(Instant::now());
            return None;
        };
        let waited = since.elapsed();
        if waited < timeout {
            return None;
        }
        self.since = None;
        Some(waited)
    }

    pub(crate) fn reset(&mut self) {
        self.since = None;
    }
}

/// Steps the data side until it blocks or completes, at most `budget` times.
pub(crate) fn run_data(data: &mut DataContainer, budget: usize) -> Result<Progress, CallbackError> {
    let mut progress = Progress::Idle;
    for _ in 0..budget.max(1) {
        progress = data.step()?;
        if progress != Progress::Advanced {
            break;
        }
    }
    Ok(progress)
}

/// The data node whose outstanding response holds the data side up.
pub(crate) fn data_waiting_on(data: &DataContainer) -> Option<&str> {
    data.deferred()
        .or_else(|| data.current().filter(|node| node.awaiting_response()))
        .map(DataNode::name)
}

/// Ends the data side and resolves the response `node` never sent.
pub(crate) fn force_data_timeout(
    data: &mut DataContainer,
    node: &str,
    waited: Duration,
) -> Result<(), CallbackError> {
    log::warn!("data node '{}' got no response within {:?}", node, waited);
    data.abort()?;
    data.force_response(timeout_response(node))?;
    Ok(())
}

/// Containers and bookkeeping of the run in progress.
pub(crate) struct Run {
    pub(crate) id: Uuid,
    pub(crate) signal: SignalContainer,
    pub(crate) data: DataContainer,
    pub(crate) context: FeatureContext,
    signal_clock: ResponseClock,
    data_clock: ResponseClock,
    telemetry: Option<Arc<dyn Telemetry>>,
    closed: bool,
}

impl Run {
    pub(crate) fn prepare(
        registry: &FeatureRegistry,
        config: &ControllerConfig,
        telemetry: Option<Arc<dyn Telemetry>>,
        spec: &FeatureSpec,
    ) -> Result<Self, EngineError> {
        let context = FeatureContext::new(FrameQueue::with_capacity(config.frame_capacity));
        let (signal_tree, data_tree) = TreeBuilder::new(registry)
            .with_context(context.clone())
            .build(spec)?;

        let id = Uuid::new_v4();
        let mut signal = SignalContainer::new(signal_tree);
        let mut data = DataContainer::new(data_tree);
        if let Some(telemetry) = &telemetry {
            signal = signal.with_telemetry(telemetry.clone(), id);
            data = data.with_telemetry(telemetry.clone(), id);
        }
        log::info!(
            "acquisition run {} started: {} signal nodes, {} data nodes",
            id,
            signal.tree().len(),
            data.tree().len()
        );
        Ok(Self {
            id,
            signal,
            data,
            context,
            signal_clock: ResponseClock::default(),
            data_clock: ResponseClock::default(),
            telemetry,
            closed: false,
        })
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.signal.is_finished() && self.data.is_finished()
    }

    /// One signal step, then the response timeout check.
    pub(crate) fn poll_signal(&mut self, timeout: Duration) -> Result<bool, EngineError> {
        let done = match self.signal.advance() {
            Ok(done) => done,
            Err(err) => {
                self.end_data();
                return Err(err.into());
            }
        };
        self.close_if_finished();
        if done {
            return Ok(true);
        }

        let awaiting = self.signal.current().filter(|node| node.awaiting_response());
        let Some(waited) = self.signal_clock.check(awaiting.is_some(), timeout) else {
            return Ok(false);
        };
        let name = awaiting.map(SignalNode::name).unwrap_or_default().to_string();
        log::warn!("signal node '{}' got no response within {:?}", name, waited);
        self.signal.force_response(timeout_response(&name));
        self.abort()?;
        Err(EngineError::ResponseTimeout { node: name, waited })
    }

    /// Runs the data side until it blocks, completes, or uses up `budget` steps.
    pub(crate) fn drive_data(&mut self, budget: usize, timeout: Duration) -> Result<bool, EngineError> {
        let progress = match run_data(&mut self.data, budget) {
            Ok(progress) => progress,
            Err(err) => {
                self.signal.abort();
                self.close_if_finished();
                return Err(err.into());
            }
        };
        self.close_if_finished();
        if progress == Progress::Completed {
            self.data_clock.reset();
            return Ok(true);
        }

        let name = data_waiting_on(&self.data).map(str::to_string);
        let Some(waited) = self.data_clock.check(name.is_some(), timeout) else {
            return Ok(false);
        };
        let name = name.unwrap_or_default();
        self.signal.abort();
        force_data_timeout(&mut self.data, &name, waited)?;
        self.close_if_finished();
        Err(EngineError::ResponseTimeout { node: name, waited })
    }

    /// Stops the signal side after its in-flight step and ends the data side.
    pub(crate) fn abort(&mut self) -> Result<(), EngineError> {
        log::info!("acquisition run {} aborting", self.id);
        self.signal.abort();
        self.data.abort()?;
        self.close_if_finished();
        Ok(())
    }

    fn end_data(&mut self) {
        if let Err(err) = self.data.abort() {
            log::error!("cleanup after signal failure also failed: {}", err);
        }
        self.close_if_finished();
    }

    fn close_if_finished(&mut self) {
        if self.closed || !self.is_finished() {
            return;
        }
        self.closed = true;
        if let Some(telemetry) = &self.telemetry {
            telemetry.flush();
        }
        log::info!("acquisition run {} finished", self.id);
    }
}

/// Drives one acquisition run at a time from the caller's threads.
pub struct Controller {
    registry: FeatureRegistry,
    config: ControllerConfig,
    telemetry: Option<Arc<dyn Telemetry>>,
    run: Option<Run>,
}

impl Controller {
    pub fn new(registry: FeatureRegistry) -> Self {
        Self {
            registry,
            config: ControllerConfig::default(),
            telemetry: None,
            run: None,
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

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn registry(&self) -> &FeatureRegistry {
        &self.registry
    }

    /// Builds both trees for `spec` and makes them the current run.
    ///
    /// Fails without touching the current run if the specification does not
    /// build, or if the current run has not finished yet.
    pub fn start(&mut self, spec: &FeatureSpec) -> Result<Uuid, EngineError> {
        if let Some(run) = self.run.as_ref().filter(|run| !run.is_finished()) {
            return Err(EngineError::AlreadyRunning(run.id));
        }
        let run = Run::prepare(&self.registry, &self.config, self.telemetry.clone(), spec)?;
        let id = run.id;
        self.run = Some(run);
        Ok(id)
    }

    /// Advances the signal side by one step; `true` once, when it is done.
    ///
    /// A response outstanding longer than the configured timeout is forced
    /// to a failure value, the run is aborted and the timeout is returned.
    pub fn poll_signal(&mut self) -> Result<bool, EngineError> {
        let timeout = self.config.response_timeout();
        self.run_mut()?.poll_signal(timeout)
    }

    /// Queues `frame` for the data features and runs the data side as far
    /// as it can go. Returns `true` once, when the data side completes.
    pub fn on_data_ready(&mut self, frame: Frame) -> Result<bool, EngineError> {
        let run = self.run_mut()?;
        run.context.frames().push(frame);
        self.poll_data()
    }

    /// Runs the data side without a new frame, e.g. to drain pending
    /// responses after an abort.
    pub fn poll_data(&mut self) -> Result<bool, EngineError> {
        let budget = self.config.max_data_steps_per_frame;
        let timeout = self.config.response_timeout();
        self.run_mut()?.drive_data(budget, timeout)
    }

    /// Ends the current run early; see [`SignalContainer::abort`] and
    /// [`DataContainer::abort`].
    pub fn abort(&mut self) -> Result<(), EngineError> {
        self.run_mut()?.abort()
    }

    pub fn run_id(&self) -> Option<Uuid> {
        self.run.as_ref().map(|run| run.id)
    }

    /// Both sides are done and every data node has been cleaned up.
    pub fn is_finished(&self) -> bool {
        self.run.as_ref().is_some_and(Run::is_finished)
    }

    /// Context handed to the current run's features.
    pub fn context(&self) -> Option<&FeatureContext> {
        self.run.as_ref().map(|run| &run.context)
    }

    pub fn signal(&self) -> Option<&SignalContainer> {
        self.run.as_ref().map(|run| &run.signal)
    }

    pub fn data(&self) -> Option<&DataContainer> {
        self.run.as_ref().map(|run| &run.data)
    }

    /// The signal node under the cursor, if the run has one.
    pub fn current_signal(&self) -> Option<&SignalNode> {
        self.signal().and_then(SignalContainer::current)
    }

    fn run_mut(&mut self) -> Result<&mut Run, EngineError> {
        self.run.as_mut().ok_or(EngineError::NotStarted)
    }
}
