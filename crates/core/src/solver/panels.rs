//! Panel geometry and Rankine influence kernels
//!
//! Each free-surface point is the collocation point of a rectangular source
//! panel. The unknowns are panel fluxes `μ_j = σ_j S_j`, which keeps the
//! single-layer influence matrix symmetric:
//!
//! - `G_ij = 1 / (4π r_ij)` for `i ≠ j`
//! - `G_ii` = average of `1/(4π r)` over the panel itself (closed form for a
//!   rectangle)
//! - `K_ij = -((x_i - x_j) · n_i) / (4π r_ij³)`, the normal derivative of the
//!   Rankine source at the receiving point, with `K_ii = 0`

use crate::core_types::Vec3;
use std::f64::consts::PI;

/// 1 / (4π)
pub const INV_FOUR_PI: f64 = 0.25 / PI;

/// Rankine source potential per unit flux at distance `r`
#[inline]
#[must_use]
pub fn rankine(r: f64) -> f64 {
    INV_FOUR_PI / r
}

/// Normal derivative at `x_i` (normal `n_i`) of a unit source at `x_j`, `d = x_i - x_j`
#[inline]
#[must_use]
pub fn normal_kernel(d: &Vec3, n: &Vec3) -> f64 {
    let r = d.norm();
    -INV_FOUR_PI * d.dot(n) / (r * r * r)
}

/// Mean Rankine potential over an `a × b` rectangle, seen from its centre, per unit flux
///
/// Uses the closed form ∫∫ 1/r dS = 4 [p ln((q + d)/p) + q ln((p + d)/q)] with
/// half sides `p`, `q` and half diagonal `d`.
#[must_use]
pub fn self_influence(a: f64, b: f64) -> f64 {
    let p = 0.5 * a;
    let q = 0.5 * b;
    let d = p.hypot(q);
    let integral = 4.0 * (p * ((q + d) / p).ln() + q * ((p + d) / q).ln());
    integral * INV_FOUR_PI / (a * b)
}

#[inline]
fn idx(ny: usize, i: usize, j: usize) -> usize {
    i * ny + j
}

/// Panel side lengths `(a, b)` for every grid point
///
/// Each side is the mean distance to the neighbours along that grid direction
/// (one-sided on the edges).
#[must_use]
pub fn panel_sides(nx: usize, ny: usize, points: &[Vec3]) -> Vec<(f64, f64)> {
    let mut sides = Vec::with_capacity(nx * ny);
    for i in 0..nx {
        for j in 0..ny {
            let p = points[idx(ny, i, j)];
            let mut a = 0.0;
            let mut na = 0.0;
            if i > 0 {
                a += (p - points[idx(ny, i - 1, j)]).norm();
                na += 1.0;
            }
            if i + 1 < nx {
                a += (points[idx(ny, i + 1, j)] - p).norm();
                na += 1.0;
            }
            let mut b = 0.0;
            let mut nb = 0.0;
            if j > 0 {
                b += (p - points[idx(ny, i, j - 1)]).norm();
                nb += 1.0;
            }
            if j + 1 < ny {
                b += (points[idx(ny, i, j + 1)] - p).norm();
                nb += 1.0;
            }
            sides.push((a / na, b / nb));
        }
    }
    sides
}

/// Upward unit normals from central-difference grid tangents
#[must_use]
pub fn grid_normals(nx: usize, ny: usize, points: &[Vec3]) -> Vec<Vec3> {
    let mut normals = Vec::with_capacity(nx * ny);
    for i in 0..nx {
        for j in 0..ny {
            let (tx, ty) = tangents(nx, ny, points, i, j);
            let n = tx.cross(&ty);
            let norm = n.norm();
            let n = if norm > 0.0 { n / norm } else { Vec3::z() };
            normals.push(if n.z < 0.0 { -n } else { n });
        }
    }
    normals
}

fn tangents(nx: usize, ny: usize, points: &[Vec3], i: usize, j: usize) -> (Vec3, Vec3) {
    let tx = points[idx(ny, (i + 1).min(nx - 1), j)] - points[idx(ny, i.saturating_sub(1), j)];
    let ty = points[idx(ny, i, (j + 1).min(ny - 1))] - points[idx(ny, i, j.saturating_sub(1))];
    (tx, ty)
}

/// Horizontal gradient of a scalar sampled on the grid
///
/// Differences along both grid directions are combined by solving the 2×2
/// system formed by the horizontal projections of the tangents.
#[must_use]
pub fn horizontal_gradient(nx: usize, ny: usize, points: &[Vec3], values: &[f64]) -> Vec<(f64, f64)> {
    let mut gradient = Vec::with_capacity(nx * ny);
    for i in 0..nx {
        for j in 0..ny {
            let (tx, ty) = tangents(nx, ny, points, i, j);
            let dv_x = values[idx(ny, (i + 1).min(nx - 1), j)] - values[idx(ny, i.saturating_sub(1), j)];
            let dv_y = values[idx(ny, i, (j + 1).min(ny - 1))] - values[idx(ny, i, j.saturating_sub(1))];

            let det = tx.x * ty.y - tx.y * ty.x;
            if det.abs() <= f64::EPSILON {
                gradient.push((0.0, 0.0));
                continue;
            }
            let gx = (dv_x * ty.y - dv_y * tx.y) / det;
            let gy = (tx.x * dv_y - ty.x * dv_x) / det;
            gradient.push((gx, gy));
        }
    }
    gradient
}
