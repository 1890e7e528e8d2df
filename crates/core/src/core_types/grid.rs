//! Structured free-surface grid supplied by the host application
//!
//! The grid is the raw mesh the simulation starts from: `nx × ny` sample points
//! stored in row-major order, where point `(i, j)` lives at index `i * ny + j`.
//! Index `i` runs along the first grid direction (x for a regular grid) and `j`
//! along the second.

use super::vec3::Vec3;
use crate::error::SimulationError;
use serde::{Deserialize, Serialize};

/// Ordered grid of free-surface points
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurfaceGrid {
    nx: usize,
    ny: usize,
    points: Vec<Vec3>,
}

impl SurfaceGrid {
    /// Build a grid from explicit points
    ///
    /// # Errors
    ///
    /// Returns [`SimulationError::InvalidMesh`] if the grid is empty, has fewer
    /// than two points in either direction, the point count does not match
    /// `nx * ny`, any coordinate is non-finite, or two neighbouring points
    /// coincide.
    pub fn new(nx: usize, ny: usize, points: Vec<Vec3>) -> Result<Self, SimulationError> {
        let grid = Self { nx, ny, points };
        grid.validate()?;
        Ok(grid)
    }

    /// Flat rectangular grid at z = 0, centred on the origin
    ///
    /// # Arguments
    ///
    /// * `nx` - Points along x
    /// * `ny` - Points along y
    /// * `length` - Extent along x in meters
    /// * `breadth` - Extent along y in meters
    ///
    /// # Errors
    ///
    /// Same conditions as [`SurfaceGrid::new`]; a non-positive extent yields
    /// coincident points.
    pub fn regular(
        nx: usize,
        ny: usize,
        length: f64,
        breadth: f64,
    ) -> Result<Self, SimulationError> {
        let step_x = if nx > 1 { length / (nx - 1) as f64 } else { 0.0 };
        let step_y = if ny > 1 { breadth / (ny - 1) as f64 } else { 0.0 };
        let mut points = Vec::with_capacity(nx * ny);
        for i in 0..nx {
            for j in 0..ny {
                points.push(Vec3::new(
                    -0.5 * length + i as f64 * step_x,
                    -0.5 * breadth + j as f64 * step_y,
                    0.0,
                ));
            }
        }
        Self::new(nx, ny, points)
    }

    /// Check grid consistency
    ///
    /// # Errors
    ///
    /// See [`SurfaceGrid::new`].
    pub fn validate(&self) -> Result<(), SimulationError> {
        if self.points.is_empty() || self.nx == 0 || self.ny == 0 {
            return Err(SimulationError::InvalidMesh("grid has no points".into()));
        }
        if self.nx < 2 || self.ny < 2 {
            return Err(SimulationError::InvalidMesh(format!(
                "grid must have at least 2x2 points, got {}x{}",
                self.nx, self.ny
            )));
        }
        if self.points.len() != self.nx * self.ny {
            return Err(SimulationError::InvalidMesh(format!(
                "non-rectangular grid: {} points for a {}x{} grid",
                self.points.len(),
                self.nx,
                self.ny
            )));
        }
        if let Some(index) = self
            .points
            .iter()
            .position(|p| !(p.x.is_finite() && p.y.is_finite() && p.z.is_finite()))
        {
            return Err(SimulationError::InvalidMesh(format!(
                "point {index} has non-finite coordinates"
            )));
        }
        for i in 0..self.nx {
            for j in 0..self.ny {
                let p = self.point(i, j);
                let coincident = (i + 1 < self.nx && (self.point(i + 1, j) - p).norm() <= 0.0)
                    || (j + 1 < self.ny && (self.point(i, j + 1) - p).norm() <= 0.0);
                if coincident {
                    return Err(SimulationError::InvalidMesh(format!(
                        "point ({i}, {j}) coincides with a neighbour"
                    )));
                }
            }
        }
        Ok(())
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

    /// Total number of points
    #[must_use]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Whether the grid has no points
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Flat index of grid point `(i, j)`
    #[inline]
    #[must_use]
    pub fn index(&self, i: usize, j: usize) -> usize {
        i * self.ny + j
    }

    /// Position of grid point `(i, j)`
    #[inline]
    #[must_use]
    pub fn point(&self, i: usize, j: usize) -> Vec3 {
        self.points[self.index(i, j)]
    }

    /// All points in row-major order
    #[must_use]
    pub fn points(&self) -> &[Vec3] {
        &self.points
    }

    /// Mutable access to the points (e.g. to perturb a generated grid)
    ///
    /// Call [`SurfaceGrid::validate`] afterwards if the edit may break the grid.
    pub fn points_mut(&mut self) -> &mut [Vec3] {
        &mut self.points
    }

    /// Smallest distance between neighbouring points
    #[must_use]
    pub fn min_spacing(&self) -> f64 {
        let mut min = f64::INFINITY;
        for i in 0..self.nx {
            for j in 0..self.ny {
                let p = self.point(i, j);
                if i + 1 < self.nx {
                    min = min.min((self.point(i + 1, j) - p).norm());
                }
                if j + 1 < self.ny {
                    min = min.min((self.point(i, j + 1) - p).norm());
                }
            }
        }
        min
    }
}
