//! Progress and mesh output collaborators
//!
//! The controller reports human-readable progress to a [`ProgressSink`] and
//! can hand free-surface elevations to an optional [`MeshSink`]. Both are
//! called synchronously from the run thread; a panicking sink is caught and
//! the message dropped, so a faulty collaborator never affects the run.

use crossbeam_channel::{Receiver, Sender, TrySendError};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{info, warn};

/// Emitted before the initializer runs
pub const MSG_INITIALIZING: &str = "[Sim]: Initializing...";
/// Emitted when the time loop starts
pub const MSG_ITERATING: &str = "[Sim]: Iterating...";
/// Emitted before matrix assembly in each step
pub const MSG_GENERATING: &str = "[Sim]: Generating linear system matrix...";
/// Emitted before the linear solve in each step
pub const MSG_SOLVING: &str = "[Sim]: Solving linear systems...";
/// Emitted before free-surface integration in each step
pub const MSG_INTEGRATING: &str = "[Sim]: Time integrating...";
/// Emitted when the time loop exits without error
pub const MSG_FINISHED: &str = "[Sim]: Finished";

/// Prefix of the message emitted when a run aborts
pub const ABORT_PREFIX: &str = "[Sim]: Run aborted: ";
/// Prefix of the per-step time stamp
pub const TIME_PREFIX: &str = "t = ";

/// Time stamp message emitted after each completed step
///
/// The value is written in full so that [`parse_time_message`] recovers it
/// exactly, however small the time step.
#[must_use]
pub fn time_message(t: f64) -> String {
    format!("{TIME_PREFIX}{t} s")
}

/// Parse a time stamp message back into seconds
#[must_use]
pub fn parse_time_message(message: &str) -> Option<f64> {
    message
        .strip_prefix(TIME_PREFIX)?
        .strip_suffix(" s")?
        .parse()
        .ok()
}

/// Receiver of progress messages
///
/// Implementations must not block for long; the run thread waits for each call.
pub trait ProgressSink: Send + Sync {
    /// Handle one message
    fn report(&self, message: &str);
}

impl<F> ProgressSink for F
where
    F: Fn(&str) + Send + Sync,
{
    fn report(&self, message: &str) {
        self(message);
    }
}

/// Forwards progress messages to `tracing` at info level
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl ProgressSink for TracingSink {
    fn report(&self, message: &str) {
        info!(target: "ship_sim::progress", "{}", message);
    }
}

/// Forwards progress messages over a bounded channel without blocking
///
/// Messages are dropped when the channel is full or the receiver is gone.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: Sender<String>,
}

impl ChannelSink {
    /// Create a sink and the receiving end of its channel
    #[must_use]
    pub fn bounded(capacity: usize) -> (Self, Receiver<String>) {
        let (sender, receiver) = crossbeam_channel::bounded(capacity);
        (Self { sender }, receiver)
    }
}

impl ProgressSink for ChannelSink {
    fn report(&self, message: &str) {
        match self.sender.try_send(message.to_string()) {
            Ok(()) | Err(TrySendError::Disconnected(_)) => {}
            Err(TrySendError::Full(_)) => {
                tracing::trace!("Progress channel full, message dropped");
            }
        }
    }
}

/// Free-surface elevations after a completed step
#[derive(Debug, Clone, PartialEq)]
pub struct MeshFrame {
    /// Steps completed
    pub step: usize,
    /// Simulation time (s)
    pub time: f64,
    /// Points along the first grid direction
    pub nx: usize,
    /// Points along the second grid direction
    pub ny: usize,
    /// Elevations in row-major order, index `i * ny + j`
    pub elevations: Vec<f64>,
}

impl MeshFrame {
    /// Elevation of grid point `(i, j)`
    #[must_use]
    pub fn elevation(&self, i: usize, j: usize) -> f64 {
        self.elevations[i * self.ny + j]
    }
}

/// Receiver of mesh frames, e.g. to update a displayed surface
pub trait MeshSink: Send + Sync {
    /// Handle one frame
    fn apply(&self, frame: &MeshFrame);
}

impl<F> MeshSink for F
where
    F: Fn(&MeshFrame) + Send + Sync,
{
    fn apply(&self, frame: &MeshFrame) {
        self(frame);
    }
}

/// Calls the collaborators, swallowing their failures
#[derive(Clone)]
pub(crate) struct Reporter {
    progress: Arc<dyn ProgressSink>,
    mesh: Option<Arc<dyn MeshSink>>,
}

impl Reporter {
    pub(crate) fn new(progress: Arc<dyn ProgressSink>, mesh: Option<Arc<dyn MeshSink>>) -> Self {
        Self { progress, mesh }
    }

    pub(crate) fn report(&self, message: &str) {
        if catch_unwind(AssertUnwindSafe(|| self.progress.report(message))).is_err() {
            warn!("Progress sink panicked, message dropped: {}", message);
        }
    }

    pub(crate) fn has_mesh_sink(&self) -> bool {
        self.mesh.is_some()
    }

    pub(crate) fn frame(&self, frame: &MeshFrame) {
        if let Some(mesh) = &self.mesh {
            if catch_unwind(AssertUnwindSafe(|| mesh.apply(frame))).is_err() {
                warn!("Mesh sink panicked at step {}, frame dropped", frame.step);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_time_message_round_trip() {
        let message = time_message(1.5);
        assert_eq!(message, "t = 1.5 s");
        assert_eq!(parse_time_message(&message), Some(1.5));
        assert_eq!(parse_time_message(&time_message(0.1 * 3.0)), Some(0.1 * 3.0));
        assert_eq!(parse_time_message(MSG_SOLVING), None);
    }

    #[test]
    #[allow(clippy::cast_precision_loss)]
    fn test_time_message_keeps_sub_microsecond_steps() {
        let dt = 1.25e-7;
        let times: Vec<f64> = (1..=8)
            .map(|step| parse_time_message(&time_message(step as f64 * dt)).unwrap())
            .collect();
        for (step, t) in times.iter().enumerate() {
            assert_eq!(*t, (step + 1) as f64 * dt);
        }
        assert!(times.windows(2).all(|pair| pair[1] > pair[0]));
    }

    #[test]
    fn test_panicking_sink_is_swallowed() {
        let reporter = Reporter::new(Arc::new(|_: &str| panic!("sink failure")), None);
        reporter.report(MSG_ITERATING);
    }

    #[test]
    fn test_channel_sink_never_blocks() {
        let (sink, receiver) = ChannelSink::bounded(1);
        sink.report("first");
        sink.report("second");
        assert_eq!(receiver.try_recv().unwrap(), "first");
        assert!(receiver.try_recv().is_err());

        drop(receiver);
        sink.report("third");
    }

    #[test]
    fn test_closure_sinks() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let store = Arc::clone(&seen);
        let reporter = Reporter::new(
            Arc::new(TracingSink),
            Some(Arc::new(move |frame: &MeshFrame| {
                store.lock().unwrap().push(frame.elevation(1, 0));
            })),
        );
        reporter.frame(&MeshFrame {
            step: 1,
            time: 0.1,
            nx: 2,
            ny: 2,
            elevations: vec![0.0, 1.0, 2.0, 3.0],
        });
        assert_eq!(*seen.lock().unwrap(), vec![2.0]);
    }
}
