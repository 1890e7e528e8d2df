//! Error taxonomy for the simulation core
//!
//! Every fallible operation in the crate returns [`SimulationError`]. Errors fall
//! into two groups:
//!
//! - **Pre-loop** errors (device, mesh, wave field, time step, configuration,
//!   registry conflicts) are raised by `start()` before any background work is
//!   launched. The controller stays `Idle`.
//! - **Per-step** errors (singular system, convergence, instability, device
//!   failures) abort the running simulation. The controller reports them through
//!   the progress sink and transitions to `Stopped`.

use thiserror::Error;

/// Errors raised by the simulation core
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SimulationError {
    /// The requested compute device could not be acquired
    #[error("failed to acquire compute device{}: {reason}", adapter_suffix(.adapter))]
    DeviceAcquisition {
        /// Adapter name, when one was found
        adapter: Option<String>,
        /// Reason reported by the backend
        reason: String,
    },

    /// The free-surface mesh is malformed
    #[error("invalid free-surface mesh: {0}")]
    InvalidMesh(String),

    /// The wave field is degenerate
    #[error("invalid wave field: {0}")]
    InvalidWaveField(String),

    /// The resolved time step is not usable
    #[error("invalid time step: dt = {0}")]
    InvalidTimeStep(f64),

    /// Run configuration is out of range
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The assembled linear system is singular (coincident panels, zero area)
    #[error("singular system at row {row}: {reason}")]
    SingularSystem {
        /// First offending row
        row: usize,
        /// What made the row singular
        reason: String,
    },

    /// The iterative solver did not reach tolerance
    #[error("solver failed to converge after {iterations} iterations (relative residual: {residual:.2e})")]
    Convergence {
        /// Iterations performed
        iterations: usize,
        /// Relative residual at exit
        residual: f64,
    },

    /// The direct solver hit an exact zero pivot
    #[error("singular matrix: zero pivot in column {column}")]
    SingularMatrix {
        /// Column of the zero pivot
        column: usize,
    },

    /// The free surface blew up
    #[error("numerical instability at point {index}: value {value} exceeds bound {bound}")]
    NumericalInstability {
        /// Flat grid index of the offending point
        index: usize,
        /// Offending value (may be NaN or infinite)
        value: f64,
        /// Sanity bound in force
        bound: f64,
    },

    /// The solver was handed a matrix that was not generated this step
    #[error("assembly matrix is stale: it must be generated before it is solved")]
    StaleMatrix,

    /// A device operation failed mid-run
    #[error("device error: {0}")]
    Device(String),

    /// `start()` was called while a run is in progress
    #[error("simulation is already running")]
    AlreadyRunning,

    /// Another controller holds the run slot for this simulation identity
    #[error("simulation '{0}' already has an active run")]
    AlreadyActive(String),

    /// Operation not permitted in the current controller state
    #[error("operation '{operation}' not allowed in state {state}")]
    InvalidState {
        /// Operation attempted
        operation: &'static str,
        /// Controller state at the time
        state: String,
    },

    /// The background worker thread could not be spawned
    #[error("failed to spawn simulation worker: {0}")]
    WorkerSpawn(String),

    /// The background worker panicked
    #[error("simulation worker panicked: {0}")]
    WorkerPanicked(String),
}

fn adapter_suffix(adapter: &Option<String>) -> String {
    adapter
        .as_ref()
        .map(|name| format!(" '{name}'"))
        .unwrap_or_default()
}

impl SimulationError {
    /// Whether this error can only occur before the time loop starts
    ///
    /// Pre-loop errors leave the controller in `Idle`; everything else aborts a
    /// running simulation.
    #[must_use]
    pub fn is_pre_loop(&self) -> bool {
        matches!(
            self,
            Self::DeviceAcquisition { .. }
                | Self::InvalidMesh(_)
                | Self::InvalidWaveField(_)
                | Self::InvalidTimeStep(_)
                | Self::InvalidConfig(_)
                | Self::AlreadyRunning
                | Self::AlreadyActive(_)
                | Self::InvalidState { .. }
                | Self::WorkerSpawn(_)
        )
    }
}
