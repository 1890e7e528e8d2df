//! Ship Motion Free-Surface Simulation Core Library
//!
//! Time-domain simulation of a free surface under incident regular waves using
//! a Rankine source boundary-element method. Each time step assembles the
//! influence system from the current surface, solves it for source strengths
//! and integrates the linearized free-surface conditions.
//!
//! ## Architecture
//!
//! - `solver`: the three per-step stages behind traits, with host (rayon +
//!   nalgebra) and GPU (wgpu) implementations chosen once per run
//! - `simulation`: the background controller, its run registry, configuration
//!   and progress/mesh collaborators
//! - `core_types`: mesh grid, wave description and vector math
//!
//! ## Example
//!
//! ```rust,ignore
//! use ship_sim_core::{RunConfig, RunRegistry, SimulationController, SurfaceGrid, WaveComponent};
//!
//! let mesh = SurfaceGrid::regular(4, 4, 30.0, 30.0)?;
//! let waves = vec![WaveComponent::new(1.0, 8.0, 0.0, 0.0)];
//! let mut controller =
//!     SimulationController::new("hull", RunConfig::host(16.0), mesh, waves, RunRegistry::new());
//! controller.start()?;
//! let summary = controller.wait()?;
//! ```

// Core types and utilities
pub mod core_types;
pub mod error;

// Boundary-element solver stages
pub mod solver;

// Run lifecycle
pub mod simulation;

// Re-export core types
pub use core_types::{SurfaceGrid, Vec3, WaveComponent, WaveState, STANDARD_GRAVITY};
pub use error::SimulationError;

// Re-export solver configuration
pub use solver::{ComputeDevice, DeviceSelector, NumericalParams, SolverMethod};

// Re-export simulation types
pub use simulation::{
    ChannelSink, ControllerState, MeshFrame, MeshSink, OutputKind, OutputPolicy, ProgressSink,
    RunConfig, RunRegistry, RunSummary, SimulationController, SimulationId, StopHandle,
    TracingSink,
};
