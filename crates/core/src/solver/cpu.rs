//! Host implementations of the per-step stages
//!
//! These are the reference code path: double precision throughout, with the
//! matrix assembly parallelised over columns with rayon. Every column is
//! computed independently, so the result does not depend on thread count.

use super::forcing::ramp_factor;
use super::linear::{conjugate_gradient, lu_solve, SolveReport};
use super::panels::{normal_kernel, rankine};
use super::params::{NumericalParams, SolverMethod};
use super::r#trait::{FreeSurfaceEvolver, MatrixGenerator, SourceSolver};
use super::state::{AssemblyMatrix, FreeSurface, MatrixStatus};
use crate::core_types::{Vec3, WaveState};
use crate::error::SimulationError;
use nalgebra::DVector;
use rayon::prelude::*;

/// Collocation points closer than this fraction of the grid spacing coincide
pub(crate) const COINCIDENT_FRACTION: f64 = 1e-9;

fn host_only() -> SimulationError {
    SimulationError::Device("host stage was handed a device-resident matrix".to_string())
}

/// Host matrix assembly
#[derive(Debug, Default, Clone, Copy)]
pub struct CpuMatrixGenerator;

impl CpuMatrixGenerator {
    /// Create a host matrix generator
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

/// Fill column `j` of G and K; returns the first singular row found
fn fill_column(
    j: usize,
    positions: &[Vec3],
    normals: &[Vec3],
    diagonal: f64,
    eps: f64,
    g_col: &mut [f64],
    k_col: &mut [f64],
) -> Option<(usize, String)> {
    let mut singular = None;
    let xj = positions[j];

    for (i, (g, k)) in g_col.iter_mut().zip(k_col.iter_mut()).enumerate() {
        if i == j {
            *g = diagonal;
            *k = 0.0;
            if singular.is_none() && !(diagonal.is_finite() && diagonal > 0.0) {
                singular = Some((j, format!("panel has no area (diagonal {diagonal})")));
            }
            continue;
        }

        let d = positions[i] - xj;
        let r = d.norm();
        if !(r.is_finite() && r >= eps) {
            *g = 0.0;
            *k = 0.0;
            if singular.is_none() {
                singular = Some((i, format!("point coincides with point {j}")));
            }
            continue;
        }
        *g = rankine(r);
        *k = normal_kernel(&d, &normals[i]);
    }
    singular
}

impl MatrixGenerator for CpuMatrixGenerator {
    fn generate(
        &mut self,
        surface: &FreeSurface,
        matrix: &mut AssemblyMatrix,
    ) -> Result<(), SimulationError> {
        let n = surface.len();
        let eps = COINCIDENT_FRACTION * surface.min_spacing();
        let positions = surface.positions();
        let normals = surface.normals();
        let diagonal = surface.self_influences();

        matrix.invalidate();
        let host = matrix.as_host_mut().ok_or_else(host_only)?;

        // Column-major storage: chunk j is column j
        let singular = host
            .influence
            .as_mut_slice()
            .par_chunks_mut(n)
            .zip(host.normal.as_mut_slice().par_chunks_mut(n))
            .enumerate()
            .filter_map(|(j, (g_col, k_col))| {
                fill_column(j, positions, normals, diagonal[j], eps, g_col, k_col)
            })
            .min_by_key(|(row, _)| *row);

        if let Some((row, reason)) = singular {
            return Err(SimulationError::SingularSystem { row, reason });
        }

        matrix
            .rhs_mut()
            .as_mut_slice()
            .copy_from_slice(surface.potentials());
        matrix.set_status(MatrixStatus::Generated);
        Ok(())
    }

    fn is_gpu_accelerated(&self) -> bool {
        false
    }
}

/// Host source-strength solver
#[derive(Debug, Clone, Copy)]
pub struct CpuSourceSolver {
    method: SolverMethod,
}

impl CpuSourceSolver {
    /// Create a host solver using `method`
    #[must_use]
    pub fn new(method: SolverMethod) -> Self {
        Self { method }
    }
}

impl SourceSolver for CpuSourceSolver {
    fn solve(
        &mut self,
        surface: &mut FreeSurface,
        matrix: &mut AssemblyMatrix,
    ) -> Result<SolveReport, SimulationError> {
        if matrix.status() != MatrixStatus::Generated {
            return Err(SimulationError::StaleMatrix);
        }
        let host = matrix.as_host().ok_or_else(host_only)?;
        let rhs = matrix.rhs();

        let (flux, report) = match self.method {
            SolverMethod::ConjugateGradient {
                tolerance,
                max_iterations,
            } => {
                let mut x = DVector::from_column_slice(&surface.flux);
                let report = conjugate_gradient(
                    |v, out| {
                        out.gemv(1.0, &host.influence, v, 0.0);
                        Ok(())
                    },
                    rhs,
                    &mut x,
                    tolerance,
                    max_iterations,
                )?;
                (x, report)
            }
            SolverMethod::Direct => lu_solve(&host.influence, rhs)?,
        };

        let normal_flux = &host.normal * &flux;
        surface.store_solution(flux.as_slice(), normal_flux.as_slice());
        matrix.set_status(MatrixStatus::Solved);
        Ok(report)
    }

    fn is_gpu_accelerated(&self) -> bool {
        false
    }
}

/// Host free-surface integrator
#[derive(Debug, Clone, Copy)]
pub struct CpuEvolver {
    ramp_duration: f64,
    bound: f64,
}

impl CpuEvolver {
    /// Create a host evolver for `waves`
    #[must_use]
    pub fn new(params: &NumericalParams, waves: &WaveState) -> Self {
        Self {
            ramp_duration: params.ramp_periods * waves.max_period(),
            bound: instability_bound(params, waves),
        }
    }
}

/// Elevation beyond which a run is considered unstable
pub(crate) fn instability_bound(params: &NumericalParams, waves: &WaveState) -> f64 {
    // A calm sea still needs a finite scale
    let amplitude = waves.total_amplitude();
    let scale = if amplitude > 0.0 { amplitude } else { 1.0 };
    params.instability_factor * scale
}

impl FreeSurfaceEvolver for CpuEvolver {
    fn evolve(
        &mut self,
        surface: &mut FreeSurface,
        waves: &WaveState,
        dt: f64,
        t: f64,
    ) -> Result<(), SimulationError> {
        let g = waves.gravity();
        // Forcing is taken at the start of the step
        let ramp = ramp_factor(t, self.ramp_duration);

        for k in 0..surface.len() {
            let mut eta = surface.elevation[k] + dt * surface.normal_velocity[k];
            let mut phi = surface.potential[k] - dt * g * eta;

            let r = surface.relaxation()[k];
            if r > 0.0 {
                let p = surface.rest_positions()[k];
                let eta_incident = ramp * waves.elevation(p.x, p.y, t);
                let phi_incident = ramp * waves.potential(p.x, p.y, t);
                eta += r * (eta_incident - eta);
                phi += r * (phi_incident - phi);
            }

            surface.elevation[k] = eta;
            surface.potential[k] = phi;
        }

        surface.check_bounds(self.bound)?;
        surface.update_kinematics();
        Ok(())
    }

    fn is_gpu_accelerated(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_types::{SurfaceGrid, WaveComponent};
    use crate::solver::init::initialize;
    use approx::assert_relative_eq;

    fn setup(n: usize, spacing: f64) -> (FreeSurface, AssemblyMatrix, WaveState) {
        let extent = spacing * (n - 1) as f64;
        let mesh = SurfaceGrid::regular(n, n, extent, extent).unwrap();
        let waves = [WaveComponent::new(1.0, 8.0, 0.0, 0.0)];
        let init = initialize(&mesh, &waves, None, &NumericalParams::default()).unwrap();
        (init.surface, init.matrix, init.waves)
    }

    #[test]
    fn test_generated_matrix_is_symmetric() {
        let (surface, mut matrix, _) = setup(4, 10.0);
        CpuMatrixGenerator::new()
            .generate(&surface, &mut matrix)
            .unwrap();

        assert_eq!(matrix.status(), MatrixStatus::Generated);
        let g = &matrix.as_host().unwrap().influence;
        for i in 0..16 {
            for j in 0..16 {
                assert_eq!(g[(i, j)], g[(j, i)]);
            }
            assert_relative_eq!(g[(i, i)], surface.self_influences()[i]);
        }
        assert_relative_eq!(g[(0, 1)], rankine(10.0), epsilon = 1e-15);
    }

    #[test]
    fn test_generation_is_idempotent() {
        let (mut surface, mut matrix, _) = setup(5, 4.0);
        surface.set_initial_condition(|p| (0.05 * p.x.sin(), 0.1 * p.y));
        let mut generator = CpuMatrixGenerator::new();

        generator.generate(&surface, &mut matrix).unwrap();
        let first = matrix.as_host().unwrap().clone();
        generator.generate(&surface, &mut matrix).unwrap();
        let second = matrix.as_host().unwrap();

        assert_eq!(first.influence, second.influence);
        assert_eq!(first.normal, second.normal);
    }

    #[test]
    fn test_coincident_points_are_singular() {
        // Grid folded back on itself: rows 0 and 2 coincide
        let xs = [0.0, 1.0, 0.0];
        let points = xs
            .iter()
            .flat_map(|&x| (0..3).map(move |j| Vec3::new(x, f64::from(j), 0.0)))
            .collect();
        let grid = SurfaceGrid::new(3, 3, points).unwrap();
        let surface = FreeSurface::from_grid(&grid, 2.0);
        let mut matrix = AssemblyMatrix::host(3, 3);

        let err = CpuMatrixGenerator::new()
            .generate(&surface, &mut matrix)
            .unwrap_err();
        assert!(matches!(err, SimulationError::SingularSystem { row: 0, .. }));
        assert_eq!(matrix.status(), MatrixStatus::Stale);
    }

    #[test]
    fn test_solver_rejects_stale_matrix() {
        let (mut surface, mut matrix, _) = setup(4, 10.0);
        let mut solver = CpuSourceSolver::new(SolverMethod::default());
        assert_eq!(
            solver.solve(&mut surface, &mut matrix),
            Err(SimulationError::StaleMatrix)
        );

        CpuMatrixGenerator::new()
            .generate(&surface, &mut matrix)
            .unwrap();
        solver.solve(&mut surface, &mut matrix).unwrap();
        assert_eq!(matrix.status(), MatrixStatus::Solved);

        // A solved matrix is stale for the next step
        assert_eq!(
            solver.solve(&mut surface, &mut matrix),
            Err(SimulationError::StaleMatrix)
        );
    }

    #[test]
    fn test_cg_and_direct_agree() {
        let (mut surface, mut matrix, _) = setup(5, 4.0);
        surface.set_initial_condition(|p| (0.0, (0.3 * p.x).cos() + 0.1 * p.y));
        let mut generator = CpuMatrixGenerator::new();

        generator.generate(&surface, &mut matrix).unwrap();
        let report = CpuSourceSolver::new(SolverMethod::default())
            .solve(&mut surface, &mut matrix)
            .unwrap();
        assert!(report.residual <= 1e-9);
        let iterative = surface.sources().to_vec();

        generator.generate(&surface, &mut matrix).unwrap();
        CpuSourceSolver::new(SolverMethod::Direct)
            .solve(&mut surface, &mut matrix)
            .unwrap();
        for (a, b) in iterative.iter().zip(surface.sources()) {
            assert_relative_eq!(*a, *b, epsilon = 1e-6, max_relative = 1e-6);
        }
    }

    #[test]
    fn test_flat_surface_normal_velocity_is_half_source() {
        let (mut surface, mut matrix, _) = setup(4, 10.0);
        surface.set_initial_condition(|p| (0.0, 1.0 + 0.01 * p.x));
        CpuMatrixGenerator::new()
            .generate(&surface, &mut matrix)
            .unwrap();
        CpuSourceSolver::new(SolverMethod::default())
            .solve(&mut surface, &mut matrix)
            .unwrap();

        for (w, sigma) in surface.normal_velocities().iter().zip(surface.sources()) {
            assert_relative_eq!(*w, 0.5 * sigma, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_evolver_imposes_incident_wave_on_edges() {
        let (mut surface, _, waves) = setup(6, 5.0);
        let params = NumericalParams {
            ramp_periods: 0.0,
            ..NumericalParams::default()
        };
        let mut evolver = CpuEvolver::new(&params, &waves);
        evolver.evolve(&mut surface, &waves, 0.1, 0.3).unwrap();

        // Boundary weight is 1: the edge takes the incident wave at the step start
        let p = surface.rest_positions()[0];
        assert_relative_eq!(
            surface.elevations()[0],
            waves.elevation(p.x, p.y, 0.3),
            epsilon = 1e-12
        );
        assert!((surface.elevations()[0] - waves.elevation(p.x, p.y, 0.4)).abs() > 1e-6);
        // Interior point outside the band stays at rest after one step from calm
        let k = surface.index(3, 3);
        assert_eq!(surface.elevations()[k], 0.0);
    }

    #[test]
    fn test_evolver_detects_instability() {
        let (mut surface, _, waves) = setup(4, 10.0);
        let mut evolver = CpuEvolver::new(&NumericalParams::default(), &waves);
        surface.normal_velocity[5] = f64::INFINITY;
        let err = evolver.evolve(&mut surface, &waves, 0.1, 0.0).unwrap_err();
        assert!(matches!(
            err,
            SimulationError::NumericalInstability { index: 5, .. }
        ));
    }
}
