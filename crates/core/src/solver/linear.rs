//! Dense linear solvers for the source-strength system
//!
//! The single-layer matrix is symmetric positive definite on a well-resolved
//! surface, so conjugate gradient is the default. A partially pivoted LU from
//! nalgebra is available as the direct alternative.

use crate::error::SimulationError;
use nalgebra::{DMatrix, DVector};

/// Outcome of a linear solve
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolveReport {
    /// Iterations performed (0 for a direct solve)
    pub iterations: usize,
    /// Relative residual ‖b − A x‖ / ‖b‖ at exit
    pub residual: f64,
}

/// Conjugate gradient on an abstract operator
///
/// `x` is used as the initial guess and overwritten with the solution.
///
/// # Arguments
///
/// * `apply` - Computes `out = A v`
/// * `b` - Right-hand side
/// * `x` - Initial guess in, solution out
/// * `tolerance` - Relative residual target
/// * `max_iterations` - Iteration cap
///
/// # Errors
///
/// Returns [`SimulationError::Convergence`] when the cap is reached or the
/// operator stops being positive definite along a search direction, and
/// propagates any error from `apply`.
pub fn conjugate_gradient<F>(
    mut apply: F,
    b: &DVector<f64>,
    x: &mut DVector<f64>,
    tolerance: f64,
    max_iterations: usize,
) -> Result<SolveReport, SimulationError>
where
    F: FnMut(&DVector<f64>, &mut DVector<f64>) -> Result<(), SimulationError>,
{
    let b_norm = b.norm();
    if b_norm == 0.0 {
        x.fill(0.0);
        return Ok(SolveReport {
            iterations: 0,
            residual: 0.0,
        });
    }

    let n = b.len();
    let mut ap = DVector::zeros(n);

    // r = b - A x
    apply(x, &mut ap)?;
    let mut r = b - &ap;
    let mut rr = r.dot(&r);
    let mut residual = rr.sqrt() / b_norm;
    if residual <= tolerance {
        return Ok(SolveReport {
            iterations: 0,
            residual,
        });
    }

    let mut p = r.clone();
    for iteration in 1..=max_iterations {
        apply(&p, &mut ap)?;
        let pap = p.dot(&ap);
        if !(pap > 0.0 && pap.is_finite()) {
            return Err(SimulationError::Convergence {
                iterations: iteration - 1,
                residual,
            });
        }

        let alpha = rr / pap;
        x.axpy(alpha, &p, 1.0);
        r.axpy(-alpha, &ap, 1.0);

        let rr_next = r.dot(&r);
        residual = rr_next.sqrt() / b_norm;
        if residual <= tolerance {
            return Ok(SolveReport {
                iterations: iteration,
                residual,
            });
        }

        let beta = rr_next / rr;
        p.axpy(1.0, &r, beta);
        rr = rr_next;
    }

    Err(SimulationError::Convergence {
        iterations: max_iterations,
        residual,
    })
}

/// Solve `A x = b` by LU decomposition with partial pivoting
///
/// # Errors
///
/// Returns [`SimulationError::SingularMatrix`] naming the first column whose
/// pivot is exactly zero.
pub fn lu_solve(
    matrix: &DMatrix<f64>,
    b: &DVector<f64>,
) -> Result<(DVector<f64>, SolveReport), SimulationError> {
    let lu = matrix.clone().lu();
    let u = lu.u();
    if let Some(column) = (0..u.ncols()).find(|&k| u[(k, k)] == 0.0) {
        return Err(SimulationError::SingularMatrix { column });
    }
    let x = lu
        .solve(b)
        .ok_or(SimulationError::SingularMatrix { column: 0 })?;

    let b_norm = b.norm();
    let residual = if b_norm > 0.0 {
        (b - matrix * &x).norm() / b_norm
    } else {
        0.0
    };
    Ok((
        x,
        SolveReport {
            iterations: 0,
            residual,
        },
    ))
}
