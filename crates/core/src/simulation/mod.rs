//! Simulation lifecycle: configuration, registry, progress and the controller
//!
//! [`SimulationController`] is the entry point for hosts. It validates a
//! [`RunConfig`], claims a slot in a shared [`RunRegistry`], builds the run on
//! the caller thread and then drives [`FreeSurfaceSimulation`] on a background
//! worker, reporting through a [`ProgressSink`] and an optional [`MeshSink`].

mod config;
mod controller;
mod progress;
mod registry;
mod run;

pub use config::{OutputKind, OutputPolicy, RunConfig};
pub use controller::{ControllerState, SimulationController, StopHandle};
pub use progress::{
    parse_time_message, time_message, ChannelSink, MeshFrame, MeshSink, ProgressSink, TracingSink,
    ABORT_PREFIX, MSG_FINISHED, MSG_GENERATING, MSG_INITIALIZING, MSG_INTEGRATING, MSG_ITERATING,
    MSG_SOLVING, TIME_PREFIX,
};
pub use registry::{RunGuard, RunRegistry, SimulationId};
pub use run::{step_count, FreeSurfaceSimulation, RunSummary};
