//! Run state owned by the background task
//!
//! [`FreeSurface`] holds the sampled free surface and its field values;
//! [`AssemblyMatrix`] holds the per-step linear system. Both are allocated once
//! by the initializer and reused for every step of a run.

use super::forcing::relaxation_weights;
use super::panels::{grid_normals, horizontal_gradient, panel_sides, self_influence};
use crate::core_types::{SurfaceGrid, Vec3};
use crate::error::SimulationError;
use nalgebra::{DMatrix, DVector};

#[cfg(feature = "gpu")]
use super::gpu::DeviceMatrix;

/// Sampled free surface with its field values
///
/// Fields are stored in row-major order, index `i * ny + j`, matching the
/// [`SurfaceGrid`] the surface was built from.
#[derive(Debug, Clone)]
pub struct FreeSurface {
    nx: usize,
    ny: usize,
    min_spacing: f64,

    // Static panel data
    rest: Vec<Vec3>,
    areas: Vec<f64>,
    self_influence: Vec<f64>,
    relaxation: Vec<f64>,

    // Geometry following the surface
    positions: Vec<Vec3>,
    normals: Vec<Vec3>,

    // Field values
    pub(crate) elevation: Vec<f64>,
    pub(crate) potential: Vec<f64>,
    pub(crate) flux: Vec<f64>,
    pub(crate) source: Vec<f64>,
    pub(crate) normal_velocity: Vec<f64>,
    gradient: Vec<Vec3>,
}

impl FreeSurface {
    /// Build a surface at rest from a validated grid
    pub(crate) fn from_grid(grid: &SurfaceGrid, relaxation_width: f64) -> Self {
        let (nx, ny) = (grid.nx(), grid.ny());
        let n = grid.len();
        let rest = grid.points().to_vec();

        let sides = panel_sides(nx, ny, &rest);
        let areas = sides.iter().map(|&(a, b)| a * b).collect();
        let self_influence = sides.iter().map(|&(a, b)| self_influence(a, b)).collect();
        let normals = grid_normals(nx, ny, &rest);

        Self {
            nx,
            ny,
            min_spacing: grid.min_spacing(),
            positions: rest.clone(),
            rest,
            areas,
            self_influence,
            relaxation: relaxation_weights(nx, ny, relaxation_width),
            normals,
            elevation: vec![0.0; n],
            potential: vec![0.0; n],
            flux: vec![0.0; n],
            source: vec![0.0; n],
            normal_velocity: vec![0.0; n],
            gradient: vec![Vec3::zeros(); n],
        }
    }

    /// Impose an initial condition `(η, φ)` per rest position
    ///
    /// Intended for hosts and tests that start from a disturbed surface instead
    /// of calm water.
    pub fn set_initial_condition<F>(&mut self, f: F)
    where
        F: Fn(&Vec3) -> (f64, f64),
    {
        for (k, p) in self.rest.iter().enumerate() {
            let (eta, phi) = f(p);
            self.elevation[k] = eta;
            self.potential[k] = phi;
        }
        self.update_kinematics();
    }

    /// Points along the first grid direction
    #[must_use]
    pub fn nx(&self) -> usize {
        self.nx
    }

    /// Points along the second grid direction
    #[must_use]
    pub fn ny(&self) -> usize {
        self.ny
    }

    /// Number of unknowns
    #[must_use]
    pub fn len(&self) -> usize {
        self.rest.len()
    }

    /// Whether the surface has no points
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rest.is_empty()
    }

    /// Flat index of grid point `(i, j)`
    #[inline]
    #[must_use]
    pub fn index(&self, i: usize, j: usize) -> usize {
        i * self.ny + j
    }

    /// Elevation at grid point `(i, j)`
    #[must_use]
    pub fn elevation_at(&self, i: usize, j: usize) -> f64 {
        self.elevation[self.index(i, j)]
    }

    /// Smallest neighbour spacing of the rest grid
    #[must_use]
    pub fn min_spacing(&self) -> f64 {
        self.min_spacing
    }

    /// Elevations above the rest surface
    #[must_use]
    pub fn elevations(&self) -> &[f64] {
        &self.elevation
    }

    /// Velocity potential on the surface
    #[must_use]
    pub fn potentials(&self) -> &[f64] {
        &self.potential
    }

    /// Solved source strengths σ
    #[must_use]
    pub fn sources(&self) -> &[f64] {
        &self.source
    }

    /// Normal velocity ∂φ/∂n from the last solve
    #[must_use]
    pub fn normal_velocities(&self) -> &[f64] {
        &self.normal_velocity
    }

    /// Velocity ∇φ at each point
    #[must_use]
    pub fn velocities(&self) -> &[Vec3] {
        &self.gradient
    }

    /// Rest positions
    #[must_use]
    pub fn rest_positions(&self) -> &[Vec3] {
        &self.rest
    }

    /// Current positions
    #[must_use]
    pub fn positions(&self) -> &[Vec3] {
        &self.positions
    }

    /// Current unit normals
    #[must_use]
    pub fn normals(&self) -> &[Vec3] {
        &self.normals
    }

    /// Panel areas
    #[must_use]
    pub fn areas(&self) -> &[f64] {
        &self.areas
    }

    /// Diagonal influence terms
    #[must_use]
    pub fn self_influences(&self) -> &[f64] {
        &self.self_influence
    }

    /// Wave-forcing relaxation weights
    #[must_use]
    pub fn relaxation(&self) -> &[f64] {
        &self.relaxation
    }

    /// Store the solved panel fluxes and the resulting normal velocity
    pub(crate) fn store_solution(&mut self, flux: &[f64], normal_flux: &[f64]) {
        for k in 0..self.len() {
            let sigma = flux[k] / self.areas[k];
            self.flux[k] = flux[k];
            self.source[k] = sigma;
            self.normal_velocity[k] = 0.5 * sigma + normal_flux[k];
        }
    }

    /// Refresh positions, normals and velocities from the current fields
    pub(crate) fn update_kinematics(&mut self) {
        for (k, position) in self.positions.iter_mut().enumerate() {
            *position = self.rest[k] + Vec3::z() * self.elevation[k];
        }
        self.normals = grid_normals(self.nx, self.ny, &self.positions);

        let horizontal = horizontal_gradient(self.nx, self.ny, &self.positions, &self.potential);
        for (k, (gx, gy)) in horizontal.into_iter().enumerate() {
            self.gradient[k] = Vec3::new(gx, gy, self.normal_velocity[k]);
        }
    }

    /// Sanity check after an integration step
    ///
    /// # Errors
    ///
    /// Returns [`SimulationError::NumericalInstability`] for the first point with
    /// a non-finite field value or an elevation beyond `bound`.
    pub(crate) fn check_bounds(&self, bound: f64) -> Result<(), SimulationError> {
        for (index, (&eta, &phi)) in self.elevation.iter().zip(&self.potential).enumerate() {
            if !phi.is_finite() {
                return Err(SimulationError::NumericalInstability {
                    index,
                    value: phi,
                    bound,
                });
            }
            if !eta.is_finite() || eta.abs() > bound {
                return Err(SimulationError::NumericalInstability {
                    index,
                    value: eta,
                    bound,
                });
            }
        }
        Ok(())
    }
}

/// Lifecycle of the assembly matrix within one step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatrixStatus {
    /// Contents belong to a previous step
    Stale,
    /// Rebuilt from the current surface, not yet solved
    Generated,
    /// Solved this step
    Solved,
}

/// Host-resident influence matrices
#[derive(Debug, Clone)]
pub struct HostMatrix {
    /// Single-layer matrix G
    pub influence: DMatrix<f64>,
    /// Normal-derivative matrix K
    pub normal: DMatrix<f64>,
}

#[derive(Debug)]
pub(crate) enum MatrixStorage {
    Host(HostMatrix),
    #[cfg(feature = "gpu")]
    Device(DeviceMatrix),
}

/// Per-step linear system `G μ = φ` plus the normal-derivative matrix K
///
/// Dimensions are fixed at `N = nx * ny` for the whole run.
#[derive(Debug)]
pub struct AssemblyMatrix {
    nx: usize,
    ny: usize,
    storage: MatrixStorage,
    rhs: DVector<f64>,
    status: MatrixStatus,
}

impl AssemblyMatrix {
    /// Zeroed host-resident matrix for an `nx × ny` surface
    pub(crate) fn host(nx: usize, ny: usize) -> Self {
        let n = nx * ny;
        Self {
            nx,
            ny,
            storage: MatrixStorage::Host(HostMatrix {
                influence: DMatrix::zeros(n, n),
                normal: DMatrix::zeros(n, n),
            }),
            rhs: DVector::zeros(n),
            status: MatrixStatus::Stale,
        }
    }

    /// Device-resident matrix for an `nx × ny` surface
    #[cfg(feature = "gpu")]
    pub(crate) fn device(nx: usize, ny: usize, matrix: DeviceMatrix) -> Self {
        Self {
            nx,
            ny,
            storage: MatrixStorage::Device(matrix),
            rhs: DVector::zeros(nx * ny),
            status: MatrixStatus::Stale,
        }
    }

    /// System dimension N
    #[must_use]
    pub fn dim(&self) -> usize {
        self.nx * self.ny
    }

    /// Grid dimensions the matrix was sized for
    #[must_use]
    pub fn grid_dimensions(&self) -> (usize, usize) {
        (self.nx, self.ny)
    }

    /// Current lifecycle status
    #[must_use]
    pub fn status(&self) -> MatrixStatus {
        self.status
    }

    /// Mark the contents as belonging to a previous step
    pub fn invalidate(&mut self) {
        self.status = MatrixStatus::Stale;
    }

    pub(crate) fn set_status(&mut self, status: MatrixStatus) {
        self.status = status;
    }

    /// Whether the matrices live on a compute device
    #[must_use]
    pub fn is_device_resident(&self) -> bool {
        !matches!(self.storage, MatrixStorage::Host(_))
    }

    /// Host matrices, if host-resident
    #[must_use]
    pub fn as_host(&self) -> Option<&HostMatrix> {
        match &self.storage {
            MatrixStorage::Host(host) => Some(host),
            #[cfg(feature = "gpu")]
            MatrixStorage::Device(_) => None,
        }
    }

    pub(crate) fn as_host_mut(&mut self) -> Option<&mut HostMatrix> {
        match &mut self.storage {
            MatrixStorage::Host(host) => Some(host),
            #[cfg(feature = "gpu")]
            MatrixStorage::Device(_) => None,
        }
    }

    #[cfg(feature = "gpu")]
    pub(crate) fn as_device(&self) -> Option<&DeviceMatrix> {
        match &self.storage {
            MatrixStorage::Device(device) => Some(device),
            MatrixStorage::Host(_) => None,
        }
    }

    /// Right-hand side (surface potential) of the current step
    #[must_use]
    pub fn rhs(&self) -> &DVector<f64> {
        &self.rhs
    }

    pub(crate) fn rhs_mut(&mut self) -> &mut DVector<f64> {
        &mut self.rhs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn surface() -> FreeSurface {
        let grid = SurfaceGrid::regular(4, 4, 30.0, 30.0).unwrap();
        FreeSurface::from_grid(&grid, 2.0)
    }

    #[test]
    fn test_surface_starts_at_rest() {
        let fs = surface();
        assert_eq!(fs.len(), 16);
        assert!(fs.elevations().iter().all(|&e| e == 0.0));
        assert!(fs.areas().iter().all(|&a| (a - 100.0).abs() < 1e-9));
        assert_eq!(fs.min_spacing(), 10.0);
    }

    #[test]
    fn test_kinematics_follow_elevation() {
        let mut fs = surface();
        fs.set_initial_condition(|p| (0.1 * p.x, 0.0));
        let k = fs.index(3, 0);
        assert!((fs.positions()[k].z - 1.5).abs() < 1e-12);
        // Tilted plane: normal leans against the slope
        assert!(fs.normals()[k].x < 0.0);
        assert!(fs.normals()[k].z > 0.0);
    }

    #[test]
    fn test_bounds_check() {
        let mut fs = surface();
        assert!(fs.check_bounds(1.0).is_ok());

        fs.elevation[5] = 2.0;
        let err = fs.check_bounds(1.0).unwrap_err();
        assert!(matches!(
            err,
            SimulationError::NumericalInstability { index: 5, .. }
        ));

        fs.elevation[5] = 0.0;
        fs.potential[2] = f64::NAN;
        assert!(fs.check_bounds(1.0).is_err());
    }

    #[test]
    fn test_matrix_dimensions() {
        let matrix = AssemblyMatrix::host(4, 3);
        assert_eq!(matrix.dim(), 12);
        assert_eq!(matrix.status(), MatrixStatus::Stale);
        let host = matrix.as_host().unwrap();
        assert_eq!(host.influence.shape(), (12, 12));
        assert!(!matrix.is_device_resident());
    }
}
