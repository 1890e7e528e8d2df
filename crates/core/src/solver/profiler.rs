/// Performance profiling helpers for tracking per-phase and per-step timing.
///
/// Provides RAII-style profiling scopes and a step timer.
use std::time::Instant;
use tracing::trace;

/// A profiling scope that measures elapsed time using RAII.
///
/// The elapsed time is logged at `trace` level when dropped.
pub struct ProfilerScope {
    start: Instant,
    name: &'static str,
}

impl ProfilerScope {
    /// Creates a new profiling scope.
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        Self {
            start: Instant::now(),
            name,
        }
    }

    /// Gets elapsed time in milliseconds.
    #[must_use]
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }
}

impl Drop for ProfilerScope {
    fn drop(&mut self) {
        trace!(phase = self.name, elapsed_ms = self.elapsed_ms(), "phase finished");
    }
}

/// Accumulates wall-clock step durations.
#[derive(Debug, Clone, Default)]
pub struct StepTimer {
    last_step_ms: f64,
    total_ms: f64,
    steps: usize,
}

impl StepTimer {
    /// Creates a new step timer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a step duration in milliseconds.
    pub fn record(&mut self, time_ms: f64) {
        self.last_step_ms = time_ms;
        self.total_ms += time_ms;
        self.steps += 1;
    }

    /// Gets the last recorded step time.
    #[must_use]
    pub fn last_step_ms(&self) -> f64 {
        self.last_step_ms
    }

    /// Mean step time, 0 before the first step.
    #[must_use]
    #[allow(clippy::cast_precision_loss)] // Step counts are far below 2^52
    pub fn mean_step_ms(&self) -> f64 {
        if self.steps == 0 {
            0.0
        } else {
            self.total_ms / self.steps as f64
        }
    }
}
