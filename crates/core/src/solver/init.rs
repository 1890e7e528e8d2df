//! Run initialization
//!
//! Turns the raw inputs of a run (surface grid, wave components, optional
//! device context) into the state the time loop operates on.

use super::context::ComputeContext;
use super::params::NumericalParams;
use super::state::{AssemblyMatrix, FreeSurface};
use crate::core_types::{SurfaceGrid, WaveComponent, WaveState};
use crate::error::SimulationError;
use std::f64::consts::{PI, SQRT_2};
use tracing::{debug, info};

/// State produced by [`initialize`]
#[derive(Debug)]
pub struct Initialization {
    /// Assembly matrix sized for the surface, resident where the run computes
    pub matrix: AssemblyMatrix,
    /// Free surface at rest
    pub surface: FreeSurface,
    /// Normalized wave field
    pub waves: WaveState,
    /// Fixed time step (s)
    pub dt: f64,
}

/// Stable time step for the symplectic free-surface update
///
/// Combines the oscillation limit `2/√(g κ_max)` of the shortest resolvable
/// surface mode (`κ_max = π√2/Δ_min`) with a resolution requirement on the
/// shortest wave period.
///
/// # Arguments
///
/// * `min_spacing` - Smallest neighbour spacing of the grid (m)
/// * `min_period` - Shortest incident wave period (s)
/// * `params` - Courant factor, steps per period and gravity
#[must_use]
pub fn stable_time_step(min_spacing: f64, min_period: f64, params: &NumericalParams) -> f64 {
    let kappa_max = PI * SQRT_2 / min_spacing;
    let oscillation_limit = 2.0 / (params.gravity * kappa_max).sqrt();
    let resolution_limit = min_period / params.min_steps_per_period;
    (params.courant * oscillation_limit).min(resolution_limit)
}

/// Build the initial state of a run
///
/// # Arguments
///
/// * `mesh` - Free-surface grid
/// * `waves` - Incident wave components
/// * `context` - Device context, `None` for a host-only run
/// * `params` - Numerical parameters
///
/// # Errors
///
/// - [`SimulationError::InvalidConfig`] for out-of-range parameters
/// - [`SimulationError::InvalidMesh`] for a malformed grid
/// - [`SimulationError::InvalidWaveField`] for an empty or degenerate wave set
/// - [`SimulationError::InvalidTimeStep`] when the resolved step is not positive
/// - [`SimulationError::DeviceAcquisition`] when the device cannot hold the system
pub fn initialize(
    mesh: &SurfaceGrid,
    waves: &[WaveComponent],
    context: Option<&ComputeContext>,
    params: &NumericalParams,
) -> Result<Initialization, SimulationError> {
    params.validate()?;
    mesh.validate()?;
    let waves = WaveState::new(waves, params.gravity)?;

    let surface = FreeSurface::from_grid(mesh, params.relaxation_width);
    let dt = stable_time_step(surface.min_spacing(), waves.min_period(), params);
    if !(dt.is_finite() && dt > 0.0) {
        return Err(SimulationError::InvalidTimeStep(dt));
    }

    let matrix = match context {
        None => AssemblyMatrix::host(mesh.nx(), mesh.ny()),
        Some(context) => device_matrix(context, mesh)?,
    };

    info!(
        "Initialized {}x{} free surface, {} wave component(s), dt = {:.4} s",
        mesh.nx(),
        mesh.ny(),
        waves.modes().len(),
        dt
    );
    debug!(
        min_spacing = surface.min_spacing(),
        min_period = waves.min_period(),
        device_resident = matrix.is_device_resident(),
        "Initialization details"
    );

    Ok(Initialization {
        matrix,
        surface,
        waves,
        dt,
    })
}

#[cfg(feature = "gpu")]
fn device_matrix(context: &ComputeContext, mesh: &SurfaceGrid) -> Result<AssemblyMatrix, SimulationError> {
    if !context.can_allocate(mesh.len()) {
        return Err(SimulationError::DeviceAcquisition {
            adapter: Some(context.adapter_name().to_string()),
            reason: format!(
                "device cannot hold the {n}x{n} system",
                n = mesh.len()
            ),
        });
    }
    let matrix = super::gpu::DeviceMatrix::new(context.gpu(), mesh.len());
    Ok(AssemblyMatrix::device(mesh.nx(), mesh.ny(), matrix))
}

#[cfg(not(feature = "gpu"))]
fn device_matrix(context: &ComputeContext, _mesh: &SurfaceGrid) -> Result<AssemblyMatrix, SimulationError> {
    Err(SimulationError::DeviceAcquisition {
        adapter: Some(context.adapter_name().to_string()),
        reason: "built without the `gpu` feature".to_string(),
    })
}
