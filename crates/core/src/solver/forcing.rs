//! Wave forcing: relaxation band and start-up ramp
//!
//! The incident wave is imposed by blending the computed free surface toward
//! the analytic incident solution in a band along the grid edges. Blending
//! weight is 1 on the boundary and decays as `(1 - d/L)²` with the distance `d`
//! (in cells) from the nearest edge, reaching 0 at `d = L`.

use std::f64::consts::PI;

/// Relaxation weight for every grid point
#[must_use]
pub fn relaxation_weights(nx: usize, ny: usize, width: f64) -> Vec<f64> {
    let mut weights = Vec::with_capacity(nx * ny);
    for i in 0..nx {
        for j in 0..ny {
            let d = i.min(nx - 1 - i).min(j).min(ny - 1 - j) as f64;
            let w = if d < width {
                let s = 1.0 - d / width;
                s * s
            } else {
                0.0
            };
            weights.push(w);
        }
    }
    weights
}

/// Smooth start-up factor rising from 0 at `t = 0` to 1 at `t = duration`
#[must_use]
pub fn ramp_factor(t: f64, duration: f64) -> f64 {
    if duration <= 0.0 || t >= duration {
        1.0
    } else {
        0.5 * (1.0 - (PI * t / duration).cos())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relaxation_band() {
        let weights = relaxation_weights(6, 6, 2.0);
        // Corner and edge points are fully forced
        assert_eq!(weights[0], 1.0);
        assert_eq!(weights[3], 1.0);
        // One cell in
        assert_eq!(weights[6 + 1], 0.25);
        // Two cells in: free
        assert_eq!(weights[2 * 6 + 2], 0.0);
    }

    #[test]
    fn test_ramp() {
        assert_eq!(ramp_factor(0.0, 8.0), 0.0);
        assert!((ramp_factor(4.0, 8.0) - 0.5).abs() < 1e-12);
        assert_eq!(ramp_factor(8.0, 8.0), 1.0);
        assert_eq!(ramp_factor(3.0, 0.0), 1.0);
    }
}
