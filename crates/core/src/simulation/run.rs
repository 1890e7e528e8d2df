//! Free-surface simulation and its time loop
//!
//! [`FreeSurfaceSimulation`] owns everything one run needs: the stage backend,
//! the free surface, the assembly matrix and the wave field. The time loop in
//! [`run_loop`] drives it until the end time or a stop request, and is shared
//! by the background controller and its blocking variant.

use super::config::{FrameSchedule, OutputPolicy};
use super::controller::{ControllerState, SharedState};
use super::progress::{
    time_message, MeshFrame, Reporter, ABORT_PREFIX, MSG_FINISHED, MSG_GENERATING,
    MSG_INTEGRATING, MSG_ITERATING, MSG_SOLVING,
};
use crate::core_types::WaveState;
use crate::error::SimulationError;
use crate::solver::{
    AssemblyMatrix, Backend, FreeSurface, Initialization, MatrixStatus, ProfilerScope, StepTimer,
};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, error, info};

/// Outcome of a run that did not abort
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Steps completed
    pub steps: usize,
    /// Simulation time reached (s)
    pub final_time: f64,
    /// Time step (s)
    pub dt: f64,
    /// `Completed`, or `Stopped` after a stop request
    pub state: ControllerState,
    /// Linear solver iterations summed over all steps
    pub solver_iterations: usize,
    /// Whether the stages ran on a compute device
    pub accelerated: bool,
    /// Mean wall-clock time per step (ms)
    pub mean_step_ms: f64,
}

/// Number of steps needed to reach `end_time` with step `dt`
///
/// The smallest `n` with `n · dt >= end_time`, computed up front so the clock
/// never accumulates rounding error.
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)] // end_time and dt are validated positive and finite
pub fn step_count(end_time: f64, dt: f64) -> usize {
    let mut steps = (end_time / dt).ceil() as usize;
    if (steps as f64) * dt < end_time {
        steps += 1;
    }
    steps
}

/// One run of the free-surface simulation
pub struct FreeSurfaceSimulation {
    backend: Backend,
    surface: FreeSurface,
    matrix: AssemblyMatrix,
    waves: WaveState,
    dt: f64,
    total_steps: usize,
    step: usize,
    solver_iterations: usize,
    timer: StepTimer,
}

impl FreeSurfaceSimulation {
    /// Create a simulation from initialized state and a matching backend
    ///
    /// # Arguments
    ///
    /// * `init` - State from `solver::initialize`
    /// * `backend` - Stages from `solver::create_backend` for the same state
    /// * `end_time` - Simulated end time (s)
    #[must_use]
    pub fn new(init: Initialization, backend: Backend, end_time: f64) -> Self {
        let total_steps = step_count(end_time, init.dt);
        info!(
            "Free-surface simulation ready: {} steps of {:.4} s, GPU={}",
            total_steps,
            init.dt,
            backend.is_gpu_accelerated()
        );
        Self {
            backend,
            surface: init.surface,
            matrix: init.matrix,
            waves: init.waves,
            dt: init.dt,
            total_steps,
            step: 0,
            solver_iterations: 0,
            timer: StepTimer::new(),
        }
    }

    /// Current simulation time (s)
    #[must_use]
    #[allow(clippy::cast_precision_loss)] // Step counts are far below 2^52
    pub fn time(&self) -> f64 {
        self.step as f64 * self.dt
    }

    /// Time step (s)
    #[must_use]
    pub fn dt(&self) -> f64 {
        self.dt
    }

    /// Steps completed so far
    #[must_use]
    pub fn steps_completed(&self) -> usize {
        self.step
    }

    /// Steps needed to reach the end time
    #[must_use]
    pub fn total_steps(&self) -> usize {
        self.total_steps
    }

    /// Whether the end time has been reached
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.step >= self.total_steps
    }

    /// Whether the stages run on a compute device
    #[must_use]
    pub fn is_gpu_accelerated(&self) -> bool {
        self.backend.is_gpu_accelerated()
    }

    /// Current free-surface state
    #[must_use]
    pub fn surface(&self) -> &FreeSurface {
        &self.surface
    }

    /// Mutable free surface, for imposing an initial condition before stepping
    pub fn surface_mut(&mut self) -> &mut FreeSurface {
        &mut self.surface
    }

    /// Snapshot of the elevations for a mesh sink
    #[must_use]
    pub fn frame(&self) -> MeshFrame {
        MeshFrame {
            step: self.step,
            time: self.time(),
            nx: self.surface.nx(),
            ny: self.surface.ny(),
            elevations: self.surface.elevations().to_vec(),
        }
    }

    /// Advance one step: generate, solve, integrate, then advance the clock
    ///
    /// `phase` is called with a progress message before each stage.
    ///
    /// # Returns
    ///
    /// Simulation time after the step
    ///
    /// # Errors
    ///
    /// Propagates the first stage failure; the clock does not advance.
    pub fn step(&mut self, phase: &dyn Fn(&str)) -> Result<f64, SimulationError> {
        let started = Instant::now();
        let t = self.time();

        phase(MSG_GENERATING);
        {
            let _scope = ProfilerScope::new("generate");
            self.backend
                .matrix_generator
                .generate(&self.surface, &mut self.matrix)?;
        }

        phase(MSG_SOLVING);
        let report = {
            let _scope = ProfilerScope::new("solve");
            self.backend.solver.solve(&mut self.surface, &mut self.matrix)?
        };
        self.solver_iterations += report.iterations;

        if self.matrix.status() != MatrixStatus::Solved {
            return Err(SimulationError::StaleMatrix);
        }

        phase(MSG_INTEGRATING);
        {
            let _scope = ProfilerScope::new("evolve");
            self.backend
                .evolver
                .evolve(&mut self.surface, &self.waves, self.dt, t)?;
        }
        // Matrix belongs to this step only
        self.matrix.invalidate();

        self.step += 1;
        self.timer.record(started.elapsed().as_secs_f64() * 1000.0);
        debug!(
            step = self.step,
            t = self.time(),
            iterations = report.iterations,
            residual = report.residual,
            "Step complete"
        );
        Ok(self.time())
    }

    /// Summary of the run so far
    #[must_use]
    pub fn summary(&self, state: ControllerState) -> RunSummary {
        RunSummary {
            steps: self.step,
            final_time: self.time(),
            dt: self.dt,
            state,
            solver_iterations: self.solver_iterations,
            accelerated: self.is_gpu_accelerated(),
            mean_step_ms: self.timer.mean_step_ms(),
        }
    }
}

impl std::fmt::Debug for FreeSurfaceSimulation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FreeSurfaceSimulation")
            .field("backend", &self.backend)
            .field("dt", &self.dt)
            .field("step", &self.step)
            .field("total_steps", &self.total_steps)
            .finish_non_exhaustive()
    }
}

/// Drive `sim` until it finishes, a stop is requested, or a stage fails
///
/// The stop flag is checked only between steps; a step in progress always
/// completes. A stage failure is reported through `reporter` as an abort
/// message. Publishing the final controller state is left to the caller.
pub(crate) fn run_loop(
    sim: &mut FreeSurfaceSimulation,
    shared: &SharedState,
    reporter: &Reporter,
    output: OutputPolicy,
) -> Result<RunSummary, SimulationError> {
    let mut schedule = FrameSchedule::new(output);
    let mut last_frame = None;
    let phase = |message: &str| reporter.report(message);

    reporter.report(MSG_ITERATING);
    let state = loop {
        if shared.is_stop_requested() {
            info!("Stop requested at t = {:.4} s", sim.time());
            break ControllerState::Stopped;
        }
        if sim.is_finished() {
            break ControllerState::Completed;
        }

        match sim.step(&phase) {
            Ok(t) => {
                reporter.report(&time_message(t));
                if reporter.has_mesh_sink() && schedule.is_due(sim.steps_completed(), t) {
                    reporter.frame(&sim.frame());
                    last_frame = Some(sim.steps_completed());
                }
            }
            Err(e) => {
                error!("Simulation aborted at t = {:.4} s: {}", sim.time(), e);
                reporter.report(&format!("{ABORT_PREFIX}{e}"));
                return Err(e);
            }
        }
    };

    // Final state always reaches the mesh sink
    if reporter.has_mesh_sink() && last_frame != Some(sim.steps_completed()) {
        reporter.frame(&sim.frame());
    }

    reporter.report(MSG_FINISHED);
    let summary = sim.summary(state);
    info!(
        "Simulation {:?} after {} steps, t = {:.4} s, mean step {:.2} ms",
        state, summary.steps, summary.final_time, summary.mean_step_ms
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_count() {
        assert_eq!(step_count(16.0, 0.1), 160);
        assert_eq!(step_count(1.0, 0.3), 4);
        assert_eq!(step_count(0.05, 0.1), 1);
        for &(end, dt) in &[(16.0, 0.1), (1.0, 0.3), (7.3, 0.07), (1e3, 0.013)] {
            let n = step_count(end, dt);
            assert!(n as f64 * dt >= end);
            assert!((n - 1) as f64 * dt < end);
        }
    }
}
