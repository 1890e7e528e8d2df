//! Incident wave description
//!
//! The host supplies a list of linear wave components. The initializer turns it
//! into a [`WaveState`]: angular frequency, deep-water wavenumber, and heading
//! unit vector per component, ready for evaluation inside the time loop.

use crate::error::SimulationError;
use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;

/// Standard gravitational acceleration (m/s²)
pub const STANDARD_GRAVITY: f64 = 9.81;

/// One regular wave component as supplied by the host
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WaveComponent {
    /// Wave amplitude in meters (half the wave height)
    pub amplitude: f64,
    /// Wave period in seconds
    pub period: f64,
    /// Phase offset in radians
    pub phase: f64,
    /// Propagation heading in degrees (0 = +x, 90 = +y)
    pub heading: f64,
}

impl WaveComponent {
    /// Create a wave component
    #[must_use]
    pub const fn new(amplitude: f64, period: f64, phase: f64, heading: f64) -> Self {
        Self {
            amplitude,
            period,
            phase,
            heading,
        }
    }
}

/// Normalized wave component used during integration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WaveMode {
    /// Amplitude in meters
    pub amplitude: f64,
    /// Angular frequency ω = 2π/T (rad/s)
    pub omega: f64,
    /// Deep-water wavenumber k = ω²/g (rad/m)
    pub wavenumber: f64,
    /// Phase offset in radians
    pub phase: f64,
    /// cos of the heading
    pub dir_x: f64,
    /// sin of the heading
    pub dir_y: f64,
}

impl WaveMode {
    #[inline]
    fn argument(&self, x: f64, y: f64, t: f64) -> f64 {
        self.wavenumber * (x * self.dir_x + y * self.dir_y) - self.omega * t + self.phase
    }
}

/// Normalized wave field, immutable for the duration of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaveState {
    modes: Vec<WaveMode>,
    gravity: f64,
}

impl WaveState {
    /// Normalize a list of wave components
    ///
    /// # Errors
    ///
    /// Returns [`SimulationError::InvalidWaveField`] if the list is empty, or a
    /// component has a non-finite value, negative amplitude, or non-positive
    /// period.
    pub fn new(waves: &[WaveComponent], gravity: f64) -> Result<Self, SimulationError> {
        if waves.is_empty() {
            return Err(SimulationError::InvalidWaveField(
                "wave field has no components".into(),
            ));
        }

        let mut modes = Vec::with_capacity(waves.len());
        for (n, wave) in waves.iter().enumerate() {
            let finite = wave.amplitude.is_finite()
                && wave.period.is_finite()
                && wave.phase.is_finite()
                && wave.heading.is_finite();
            if !finite {
                return Err(SimulationError::InvalidWaveField(format!(
                    "component {n} has non-finite parameters"
                )));
            }
            if wave.amplitude < 0.0 {
                return Err(SimulationError::InvalidWaveField(format!(
                    "component {n} has negative amplitude {}",
                    wave.amplitude
                )));
            }
            if wave.period <= 0.0 {
                return Err(SimulationError::InvalidWaveField(format!(
                    "component {n} has non-positive period {}",
                    wave.period
                )));
            }

            let omega = TAU / wave.period;
            let heading = wave.heading.to_radians();
            modes.push(WaveMode {
                amplitude: wave.amplitude,
                omega,
                wavenumber: omega * omega / gravity,
                phase: wave.phase,
                dir_x: heading.cos(),
                dir_y: heading.sin(),
            });
        }

        Ok(Self { modes, gravity })
    }

    /// Normalized components
    #[must_use]
    pub fn modes(&self) -> &[WaveMode] {
        &self.modes
    }

    /// Gravity the wavenumbers were derived with
    #[must_use]
    pub fn gravity(&self) -> f64 {
        self.gravity
    }

    /// Shortest period in the field
    #[must_use]
    pub fn min_period(&self) -> f64 {
        self.modes
            .iter()
            .map(|m| TAU / m.omega)
            .fold(f64::INFINITY, f64::min)
    }

    /// Longest period in the field
    #[must_use]
    pub fn max_period(&self) -> f64 {
        self.modes.iter().map(|m| TAU / m.omega).fold(0.0, f64::max)
    }

    /// Sum of component amplitudes (upper bound of the incident elevation)
    #[must_use]
    pub fn total_amplitude(&self) -> f64 {
        self.modes.iter().map(|m| m.amplitude).sum()
    }

    /// Incident free-surface elevation η at (x, y) and time t
    #[must_use]
    pub fn elevation(&self, x: f64, y: f64, t: f64) -> f64 {
        self.modes
            .iter()
            .map(|m| m.amplitude * m.argument(x, y, t).cos())
            .sum()
    }

    /// Incident velocity potential φ on the still-water surface at (x, y) and time t
    #[must_use]
    pub fn potential(&self, x: f64, y: f64, t: f64) -> f64 {
        self.modes
            .iter()
            .map(|m| m.amplitude * self.gravity / m.omega * m.argument(x, y, t).sin())
            .sum()
    }
}
