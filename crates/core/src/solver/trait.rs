//! Per-step stage traits
//!
//! One time step runs three stages in order: generate the influence matrices
//! from the current surface, solve for source strengths, then integrate the
//! free-surface conditions. Each stage has a host implementation and, with the
//! `gpu` feature, a device implementation.

use super::linear::SolveReport;
use super::state::{AssemblyMatrix, FreeSurface};
use crate::core_types::WaveState;
use crate::error::SimulationError;

/// Builds the linear system for the current surface
pub trait MatrixGenerator: Send {
    /// Fill `matrix` from the positions and normals of `surface`
    ///
    /// On success the matrix status is `Generated` and its right-hand side holds
    /// the surface potential.
    ///
    /// # Errors
    ///
    /// Returns [`SimulationError::SingularSystem`] when two points coincide or a
    /// panel has no area, and [`SimulationError::Device`] on device failure.
    fn generate(
        &mut self,
        surface: &FreeSurface,
        matrix: &mut AssemblyMatrix,
    ) -> Result<(), SimulationError>;

    /// Whether this stage runs on a compute device
    fn is_gpu_accelerated(&self) -> bool;
}

/// Solves the generated system for source strengths
pub trait SourceSolver: Send {
    /// Solve `G μ = φ` and store σ and ∂φ/∂n on `surface`
    ///
    /// The previous step's fluxes on `surface` serve as the initial guess.
    ///
    /// # Returns
    ///
    /// Iteration count and final relative residual
    ///
    /// # Errors
    ///
    /// Returns [`SimulationError::StaleMatrix`] if `matrix` was not generated
    /// this step, otherwise the solver's failure.
    fn solve(
        &mut self,
        surface: &mut FreeSurface,
        matrix: &mut AssemblyMatrix,
    ) -> Result<SolveReport, SimulationError>;

    /// Whether this stage runs on a compute device
    fn is_gpu_accelerated(&self) -> bool;
}

/// Advances the free-surface conditions by one step
pub trait FreeSurfaceEvolver: Send {
    /// Integrate `(η, φ)` from `t` to `t + dt`, with wave forcing taken at `t`
    ///
    /// # Arguments
    ///
    /// * `surface` - Surface with normal velocities from this step's solve
    /// * `waves` - Incident wave field used for boundary forcing
    /// * `dt` - Time step in seconds
    /// * `t` - Time at the start of the step
    ///
    /// # Errors
    ///
    /// Returns [`SimulationError::NumericalInstability`] when the updated
    /// surface is non-finite or out of bounds.
    fn evolve(
        &mut self,
        surface: &mut FreeSurface,
        waves: &WaveState,
        dt: f64,
        t: f64,
    ) -> Result<(), SimulationError>;

    /// Whether this stage runs on a compute device
    fn is_gpu_accelerated(&self) -> bool;
}
