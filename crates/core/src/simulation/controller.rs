//! Background simulation controller
//!
//! A [`SimulationController`] owns one simulation configuration and runs it on
//! a dedicated worker thread. Everything that can fail before the loop starts
//! (configuration, registry slot, compute device, mesh, wave field, time step)
//! happens on the caller thread inside [`SimulationController::start`], so a
//! failed start never launches a worker and leaves the controller `Idle`.
//!
//! The only state shared with the worker is a pair of atomic flags, the
//! controller state and the last error. Stopping is cooperative: the flag is
//! observed at the top of the next iteration and a step in progress always
//! completes.

use super::config::RunConfig;
use super::progress::{
    MeshSink, ProgressSink, Reporter, TracingSink, ABORT_PREFIX, MSG_INITIALIZING,
};
use super::registry::{RunGuard, RunRegistry, SimulationId};
use super::run::{run_loop, FreeSurfaceSimulation, RunSummary};
use crate::core_types::{SurfaceGrid, WaveComponent};
use crate::error::SimulationError;
use crate::solver::{create_backend, create_context, initialize};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use tracing::{error, info, warn};

/// Lifecycle state of a controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ControllerState {
    /// Not started, or reset after a run
    Idle = 0,
    /// Worker is executing the time loop
    Running = 1,
    /// Ended early by a stop request or a step failure
    Stopped = 2,
    /// Reached the end time
    Completed = 3,
}

impl ControllerState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Running,
            2 => Self::Stopped,
            3 => Self::Completed,
            _ => Self::Idle,
        }
    }
}

impl fmt::Display for ControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "Idle",
            Self::Running => "Running",
            Self::Stopped => "Stopped",
            Self::Completed => "Completed",
        };
        f.write_str(name)
    }
}

/// State shared between a controller and its worker
#[derive(Debug)]
pub(crate) struct SharedState {
    state: AtomicU8,
    running: AtomicBool,
    stop_requested: AtomicBool,
    last_error: Mutex<Option<SimulationError>>,
}

impl SharedState {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(ControllerState::Idle as u8),
            running: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
            last_error: Mutex::new(None),
        }
    }

    fn state(&self) -> ControllerState {
        ControllerState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: ControllerState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub(crate) fn is_stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::Acquire)
    }

    fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::Release);
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::Release);
    }

    fn record_error(&self, error: SimulationError) {
        *self
            .last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(error);
    }

    fn last_error(&self) -> Option<SimulationError> {
        self.last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Publish the end of a run
    ///
    /// Whoever observes the terminal state also observes the recorded error,
    /// the released registry slot and `is_running() == false`.
    fn finish(&self, outcome: &RunOutcome, guard: RunGuard) {
        let state = match outcome {
            Ok(summary) => summary.state,
            Err(e) => {
                self.record_error(e.clone());
                ControllerState::Stopped
            }
        };
        drop(guard);
        self.set_running(false);
        self.set_state(state);
    }

    /// Clear everything left over from a previous run
    fn clear(&self) {
        self.stop_requested.store(false, Ordering::Release);
        *self
            .last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }
}

/// Cloneable handle that requests a graceful stop from any thread
#[derive(Debug, Clone)]
pub struct StopHandle {
    shared: Arc<SharedState>,
}

impl StopHandle {
    /// Request a stop at the next iteration boundary; never blocks
    pub fn stop(&self) {
        self.shared.request_stop();
    }

    /// Whether a stop has been requested for the current run
    #[must_use]
    pub fn is_stop_requested(&self) -> bool {
        self.shared.is_stop_requested()
    }
}

type RunOutcome = Result<RunSummary, SimulationError>;

/// Runs one simulation configuration in the background
pub struct SimulationController {
    id: SimulationId,
    config: RunConfig,
    mesh: SurfaceGrid,
    waves: Vec<WaveComponent>,
    registry: RunRegistry,
    progress: Arc<dyn ProgressSink>,
    mesh_sink: Option<Arc<dyn MeshSink>>,
    shared: Arc<SharedState>,
    worker: Option<JoinHandle<RunOutcome>>,
    outcome: Option<RunOutcome>,
}

impl SimulationController {
    /// Create an idle controller
    ///
    /// Progress goes to `tracing` until a sink is set with
    /// [`with_progress_sink`](Self::with_progress_sink).
    ///
    /// # Arguments
    ///
    /// * `id` - Simulation identity, unique among active runs in `registry`
    /// * `config` - Device, end time, output policy and numerics
    /// * `mesh` - Initial free-surface grid
    /// * `waves` - Incident wave components
    /// * `registry` - Registry shared by all controllers of this host
    pub fn new(
        id: impl Into<SimulationId>,
        config: RunConfig,
        mesh: SurfaceGrid,
        waves: Vec<WaveComponent>,
        registry: RunRegistry,
    ) -> Self {
        Self {
            id: id.into(),
            config,
            mesh,
            waves,
            registry,
            progress: Arc::new(TracingSink),
            mesh_sink: None,
            shared: Arc::new(SharedState::new()),
            worker: None,
            outcome: None,
        }
    }

    /// Send progress messages to `sink`
    pub fn with_progress_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.progress = sink;
        self
    }

    /// Send mesh frames to `sink`
    pub fn with_mesh_sink(mut self, sink: Arc<dyn MeshSink>) -> Self {
        self.mesh_sink = Some(sink);
        self
    }

    /// Simulation identity
    pub fn id(&self) -> &SimulationId {
        &self.id
    }

    /// Run configuration
    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Current lifecycle state
    pub fn state(&self) -> ControllerState {
        self.shared.state()
    }

    /// Whether the worker is executing the time loop; never blocks
    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    /// Error that ended the last start attempt or run, if any
    pub fn last_error(&self) -> Option<SimulationError> {
        self.shared.last_error()
    }

    /// Handle for stopping the run from other threads
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Request a graceful stop at the next iteration boundary; never blocks
    pub fn stop(&self) {
        if self.is_running() {
            info!("Stop requested for simulation '{}'", self.id);
        }
        self.shared.request_stop();
    }

    fn reporter(&self) -> Reporter {
        Reporter::new(Arc::clone(&self.progress), self.mesh_sink.clone())
    }

    fn check_startable(&self, operation: &'static str) -> Result<(), SimulationError> {
        match self.state() {
            ControllerState::Idle => Ok(()),
            ControllerState::Running => Err(SimulationError::AlreadyRunning),
            state => Err(SimulationError::InvalidState {
                operation,
                state: state.to_string(),
            }),
        }
    }

    /// Everything that must succeed before the loop starts
    fn prepare(
        &self,
        reporter: &Reporter,
    ) -> Result<(FreeSurfaceSimulation, RunGuard), SimulationError> {
        self.config.validate()?;
        let guard = self
            .registry
            .try_acquire(&self.id)
            .ok_or_else(|| SimulationError::AlreadyActive(self.id.to_string()))?;

        reporter.report(MSG_INITIALIZING);
        let context = create_context(&self.config.device)?;
        let init = initialize(&self.mesh, &self.waves, context.as_ref(), &self.config.numerics)?;
        let backend = create_backend(context.as_ref(), &init, &self.config.numerics);
        let sim = FreeSurfaceSimulation::new(init, backend, self.config.end_time);
        Ok((sim, guard))
    }

    fn begin(
        &mut self,
        operation: &'static str,
    ) -> Result<(FreeSurfaceSimulation, RunGuard, Reporter), SimulationError> {
        self.check_startable(operation)?;
        self.shared.clear();
        self.outcome = None;

        let reporter = self.reporter();
        match self.prepare(&reporter) {
            Ok((sim, guard)) => Ok((sim, guard, reporter)),
            Err(e) => {
                warn!("Simulation '{}' failed to start: {}", self.id, e);
                self.shared.record_error(e.clone());
                Err(e)
            }
        }
    }

    /// Launch the run on a background worker
    ///
    /// Returns as soon as the worker is spawned.
    ///
    /// # Errors
    ///
    /// - [`SimulationError::AlreadyRunning`] while a run is in progress
    /// - [`SimulationError::InvalidState`] after a run, until [`reset`](Self::reset)
    /// - [`SimulationError::AlreadyActive`] if another controller runs the same identity
    /// - Any pre-loop error from the compute context or the initializer
    ///
    /// The controller stays `Idle` on every error.
    pub fn start(&mut self) -> Result<(), SimulationError> {
        let (mut sim, guard, reporter) = self.begin("start")?;

        let shared = Arc::clone(&self.shared);
        let output = self.config.output;
        shared.set_running(true);
        shared.set_state(ControllerState::Running);

        let spawned = thread::Builder::new()
            .name(format!("sim-{}", self.id))
            .spawn(move || {
                supervise(&shared, &reporter, guard, || {
                    run_loop(&mut sim, &shared, &reporter, output)
                })
            });

        match spawned {
            Ok(handle) => {
                info!("Simulation '{}' started", self.id);
                self.worker = Some(handle);
                Ok(())
            }
            Err(e) => {
                let e = SimulationError::WorkerSpawn(e.to_string());
                self.shared.record_error(e.clone());
                self.shared.set_running(false);
                self.shared.set_state(ControllerState::Idle);
                Err(e)
            }
        }
    }

    /// Run the same loop on the caller thread and return when it ends
    ///
    /// A [`StopHandle`] taken beforehand can stop it from another thread.
    ///
    /// # Errors
    ///
    /// Pre-loop errors as for [`start`](Self::start), or the step failure that
    /// aborted the run.
    pub fn run_blocking(&mut self) -> Result<RunSummary, SimulationError> {
        let (mut sim, guard, reporter) = self.begin("run_blocking")?;

        let shared = Arc::clone(&self.shared);
        let output = self.config.output;
        shared.set_running(true);
        shared.set_state(ControllerState::Running);
        let outcome = supervise(&shared, &reporter, guard, || {
            run_loop(&mut sim, &shared, &reporter, output)
        });

        self.outcome = Some(outcome.clone());
        outcome
    }

    /// Wait for the background run to end
    ///
    /// Repeated calls return the same outcome until the next start.
    ///
    /// # Errors
    ///
    /// The step failure that aborted the run, [`SimulationError::WorkerPanicked`],
    /// or [`SimulationError::InvalidState`] if no run was started.
    pub fn wait(&mut self) -> Result<RunSummary, SimulationError> {
        if let Some(handle) = self.worker.take() {
            let outcome = handle.join().unwrap_or_else(|payload| {
                Err(SimulationError::WorkerPanicked(panic_message(&*payload)))
            });
            self.outcome = Some(outcome);
        }
        self.outcome.clone().unwrap_or_else(|| {
            Err(SimulationError::InvalidState {
                operation: "wait",
                state: self.state().to_string(),
            })
        })
    }

    /// Return a finished controller to `Idle` so it can be started again
    ///
    /// The next start runs the initializer afresh; nothing carries over.
    ///
    /// # Errors
    ///
    /// [`SimulationError::InvalidState`] while running.
    pub fn reset(&mut self) -> Result<(), SimulationError> {
        match self.state() {
            ControllerState::Running => Err(SimulationError::InvalidState {
                operation: "reset",
                state: ControllerState::Running.to_string(),
            }),
            ControllerState::Idle => Ok(()),
            ControllerState::Stopped | ControllerState::Completed => {
                if let Some(handle) = self.worker.take() {
                    match handle.join() {
                        Ok(Ok(_)) => {}
                        Ok(Err(e)) => warn!(
                            "Simulation '{}' reset discards an uncollected failure: {}",
                            self.id, e
                        ),
                        Err(payload) => warn!(
                            "Simulation '{}' worker panicked before reset: {}",
                            self.id,
                            panic_message(&*payload)
                        ),
                    }
                }
                self.shared.clear();
                self.outcome = None;
                self.shared.set_state(ControllerState::Idle);
                info!("Simulation '{}' reset", self.id);
                Ok(())
            }
        }
    }
}

impl fmt::Debug for SimulationController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimulationController")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("running", &self.is_running())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Drop for SimulationController {
    fn drop(&mut self) {
        if let Some(handle) = self.worker.take() {
            self.shared.request_stop();
            if handle.join().is_err() {
                warn!("Simulation '{}' worker panicked during shutdown", self.id);
            }
        }
    }
}

/// Run `body` under a panic guard, then publish its outcome
///
/// A panic becomes [`SimulationError::WorkerPanicked`] and is reported like
/// any other abort. `guard` is released before the run reads as finished.
fn supervise(
    shared: &SharedState,
    reporter: &Reporter,
    guard: RunGuard,
    body: impl FnOnce() -> RunOutcome,
) -> RunOutcome {
    let outcome = catch_unwind(AssertUnwindSafe(body)).unwrap_or_else(|payload| {
        let e = SimulationError::WorkerPanicked(panic_message(&*payload));
        error!("{}", e);
        reporter.report(&format!("{ABORT_PREFIX}{e}"));
        Err(e)
    });
    shared.finish(&outcome, guard);
    outcome
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
