//! Run configuration

use crate::error::SimulationError;
use crate::solver::{ComputeDevice, NumericalParams};
use serde::{Deserialize, Serialize};

/// How the output rate is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputKind {
    /// `rate` frames per simulated second
    FramesPerSecond,
    /// One frame every `rate` iterations
    IterationsPerFrame,
}

/// How often mesh frames are handed to the mesh sink
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OutputPolicy {
    /// Rate value, interpreted according to `kind`
    pub rate: f64,
    /// Rate kind
    pub kind: OutputKind,
}

impl Default for OutputPolicy {
    fn default() -> Self {
        Self {
            rate: 10.0,
            kind: OutputKind::FramesPerSecond,
        }
    }
}

impl OutputPolicy {
    /// Frames per simulated second
    #[must_use]
    pub fn frames_per_second(rate: f64) -> Self {
        Self {
            rate,
            kind: OutputKind::FramesPerSecond,
        }
    }

    /// One frame every `iterations` steps
    #[must_use]
    #[allow(clippy::cast_precision_loss)] // Iteration intervals are small
    pub fn iterations_per_frame(iterations: usize) -> Self {
        Self {
            rate: iterations as f64,
            kind: OutputKind::IterationsPerFrame,
        }
    }
}

/// Tracks which completed steps produce a mesh frame
#[derive(Debug, Clone)]
pub(crate) struct FrameSchedule {
    policy: OutputPolicy,
    frames: u64,
}

impl FrameSchedule {
    pub(crate) fn new(policy: OutputPolicy) -> Self {
        Self { policy, frames: 0 }
    }

    /// Whether the step that just completed at time `t` emits a frame
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )] // Rates and times are validated positive and finite
    pub(crate) fn is_due(&mut self, step: usize, t: f64) -> bool {
        match self.policy.kind {
            OutputKind::IterationsPerFrame => {
                let interval = (self.policy.rate.round() as usize).max(1);
                step % interval == 0
            }
            OutputKind::FramesPerSecond => {
                // Tolerance absorbs t = step * dt rounding just below a frame boundary
                let reached = (t * self.policy.rate + 1e-9).floor() as u64;
                if reached > self.frames {
                    self.frames = reached;
                    true
                } else {
                    false
                }
            }
        }
    }
}

/// Everything a controller needs besides the mesh and wave field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Compute device selection
    pub device: ComputeDevice,
    /// Simulated end time (s)
    pub end_time: f64,
    /// Mesh frame output policy
    pub output: OutputPolicy,
    /// Numerical parameters
    pub numerics: NumericalParams,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            device: ComputeDevice::default(),
            end_time: 60.0,
            output: OutputPolicy::default(),
            numerics: NumericalParams::default(),
        }
    }
}

impl RunConfig {
    /// Host-only configuration ending at `end_time`
    #[must_use]
    pub fn host(end_time: f64) -> Self {
        Self {
            device: ComputeDevice::Host,
            end_time,
            ..Self::default()
        }
    }

    /// Check the configuration
    ///
    /// # Errors
    ///
    /// Returns [`SimulationError::InvalidConfig`] for a non-positive or
    /// non-finite end time or output rate, or out-of-range numerics.
    pub fn validate(&self) -> Result<(), SimulationError> {
        if !(self.end_time.is_finite() && self.end_time > 0.0) {
            return Err(SimulationError::InvalidConfig(format!(
                "end time must be positive and finite, got {}",
                self.end_time
            )));
        }
        if !(self.output.rate.is_finite() && self.output.rate > 0.0) {
            return Err(SimulationError::InvalidConfig(format!(
                "output rate must be positive and finite, got {}",
                self.output.rate
            )));
        }
        self.numerics.validate()
    }
}
