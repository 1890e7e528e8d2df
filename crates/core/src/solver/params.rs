//! Numerical parameters shared by the initializer and the per-step components

use crate::core_types::STANDARD_GRAVITY;
use crate::error::SimulationError;
use serde::{Deserialize, Serialize};

/// Linear solver used for the source strengths
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SolverMethod {
    /// Conjugate Gradient on the symmetric influence matrix
    ConjugateGradient {
        /// Relative residual tolerance
        tolerance: f64,
        /// Iteration cap before giving up
        max_iterations: usize,
    },
    /// Dense LU with partial pivoting
    Direct,
}

impl Default for SolverMethod {
    fn default() -> Self {
        Self::ConjugateGradient {
            tolerance: 1e-9,
            max_iterations: 500,
        }
    }
}

/// Numerical parameters for one run
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NumericalParams {
    /// Gravitational acceleration (m/s²)
    pub gravity: f64,
    /// Fraction of the stability limit used for dt (0, 1]
    pub courant: f64,
    /// Minimum number of steps per shortest wave period
    pub min_steps_per_period: f64,
    /// Linear solver for the source strengths
    pub solver: SolverMethod,
    /// Width of the wave-forcing relaxation band, in grid cells
    pub relaxation_width: f64,
    /// Start-up ramp length, in multiples of the longest wave period
    pub ramp_periods: f64,
    /// Elevation sanity bound as a multiple of the total wave amplitude
    pub instability_factor: f64,
}

impl Default for NumericalParams {
    fn default() -> Self {
        Self {
            gravity: STANDARD_GRAVITY,
            courant: 0.5,
            min_steps_per_period: 80.0,
            solver: SolverMethod::default(),
            relaxation_width: 2.0,
            ramp_periods: 1.0,
            instability_factor: 1e3,
        }
    }
}

impl NumericalParams {
    /// Check parameter ranges
    ///
    /// # Errors
    ///
    /// Returns [`SimulationError::InvalidConfig`] naming the first bad field.
    pub fn validate(&self) -> Result<(), SimulationError> {
        fn positive(name: &str, value: f64) -> Result<(), SimulationError> {
            if value.is_finite() && value > 0.0 {
                Ok(())
            } else {
                Err(SimulationError::InvalidConfig(format!(
                    "{name} must be positive and finite, got {value}"
                )))
            }
        }

        positive("gravity", self.gravity)?;
        positive("courant", self.courant)?;
        if self.courant > 1.0 {
            return Err(SimulationError::InvalidConfig(format!(
                "courant must not exceed 1, got {}",
                self.courant
            )));
        }
        positive("min_steps_per_period", self.min_steps_per_period)?;
        positive("relaxation_width", self.relaxation_width)?;
        positive("instability_factor", self.instability_factor)?;
        if !(self.ramp_periods.is_finite() && self.ramp_periods >= 0.0) {
            return Err(SimulationError::InvalidConfig(format!(
                "ramp_periods must be non-negative, got {}",
                self.ramp_periods
            )));
        }
        if let SolverMethod::ConjugateGradient {
            tolerance,
            max_iterations,
        } = self.solver
        {
            positive("solver tolerance", tolerance)?;
            if max_iterations == 0 {
                return Err(SimulationError::InvalidConfig(
                    "solver max_iterations must be at least 1".into(),
                ));
            }
        }
        Ok(())
    }
}
