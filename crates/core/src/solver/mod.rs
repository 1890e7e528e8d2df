//! Free-surface boundary-element solver module
//!
//! Each time step runs three stages: the `MatrixGenerator` assembles the
//! Rankine influence system from the current surface, the `SourceSolver`
//! solves it for source strengths, and the `FreeSurfaceEvolver` integrates the
//! free-surface conditions. Every stage has a host implementation and a GPU
//! implementation behind the same trait.
//!
//! # Feature Flags
//!
//! - `gpu` (default): Enables GPU acceleration via wgpu. Disable with `--no-default-features`
//!   for environments without GPU access.
//!
//! # Backend Selection
//!
//! The backend is chosen once per run from the compute context:
//! 1. With a device context, all three stages run on the GPU
//! 2. Without one, all three stages run on the host
//!
//! # Example
//!
//! ```rust,ignore
//! use ship_sim_core::solver::{create_backend, create_context, initialize, ComputeDevice};
//!
//! let context = create_context(&ComputeDevice::Auto)?;
//! let init = initialize(&mesh, &waves, context.as_ref(), &params)?;
//! let backend = create_backend(context.as_ref(), &init, &params);
//! ```

mod context;
mod cpu;
pub mod forcing;
mod init;
pub mod linear;
pub mod panels;
mod params;
pub mod profiler;
mod state;
#[allow(clippy::module_name_repetitions)]
mod r#trait;

#[cfg(feature = "gpu")]
mod gpu;

// Re-exports
pub use context::{create_context, ComputeContext, ComputeDevice, DeviceSelector, GpuInitResult};
pub use cpu::{CpuEvolver, CpuMatrixGenerator, CpuSourceSolver};
pub use init::{initialize, stable_time_step, Initialization};
pub use linear::SolveReport;
pub use params::{NumericalParams, SolverMethod};
pub use profiler::{ProfilerScope, StepTimer};
pub use r#trait::{FreeSurfaceEvolver, MatrixGenerator, SourceSolver};
pub use state::{AssemblyMatrix, FreeSurface, HostMatrix, MatrixStatus};

#[cfg(feature = "gpu")]
pub use context::GpuContext;
#[cfg(feature = "gpu")]
pub use gpu::{DeviceMatrix, GpuEvolver, GpuMatrixGenerator, GpuSourceSolver, DEVICE_MIN_TOLERANCE};

use tracing::info;

/// The three per-step stages of one run
pub struct Backend {
    /// Builds the linear system
    pub matrix_generator: Box<dyn MatrixGenerator>,
    /// Solves for source strengths
    pub solver: Box<dyn SourceSolver>,
    /// Integrates the free surface
    pub evolver: Box<dyn FreeSurfaceEvolver>,
}

impl Backend {
    /// Whether the stages run on a compute device
    #[must_use]
    pub fn is_gpu_accelerated(&self) -> bool {
        self.matrix_generator.is_gpu_accelerated()
            && self.solver.is_gpu_accelerated()
            && self.evolver.is_gpu_accelerated()
    }
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backend")
            .field("gpu_accelerated", &self.is_gpu_accelerated())
            .finish_non_exhaustive()
    }
}

/// Create the stage set for a run
///
/// Host stages are used when there is no context or the matrix was allocated
/// on the host; otherwise GPU stages sharing the context's device.
///
/// # Arguments
///
/// * `context` - Compute context from [`create_context`]
/// * `init` - Initial state from [`initialize`] with the same context
/// * `params` - Numerical parameters of the run
///
/// # Returns
///
/// The stage set, all on the same side of the host/device boundary
#[must_use]
pub fn create_backend(
    context: Option<&ComputeContext>,
    init: &Initialization,
    params: &NumericalParams,
) -> Backend {
    #[cfg(feature = "gpu")]
    {
        if let Some(context) = context.filter(|_| init.matrix.is_device_resident()) {
            info!(
                "Using GPU backend: {} ({} unknowns)",
                context.adapter_name(),
                init.surface.len()
            );
            let gpu = context.gpu();
            let n = init.surface.len();
            return Backend {
                matrix_generator: Box::new(GpuMatrixGenerator::new(gpu, n)),
                solver: Box::new(GpuSourceSolver::new(gpu, n, params.solver)),
                evolver: Box::new(GpuEvolver::new(gpu, &init.surface, params, &init.waves)),
            };
        }
    }

    #[cfg(not(feature = "gpu"))]
    let _ = context;

    info!("Using host backend ({} unknowns)", init.surface.len());
    Backend {
        matrix_generator: Box::new(CpuMatrixGenerator::new()),
        solver: Box::new(CpuSourceSolver::new(params.solver)),
        evolver: Box::new(CpuEvolver::new(params, &init.waves)),
    }
}
