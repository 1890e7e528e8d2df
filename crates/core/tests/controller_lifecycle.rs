//! Controller state machine, registry discipline and pre-loop failures

mod common;

use common::{host_config, reference_mesh, reference_waves, Recorder};
use crossbeam_channel::{bounded, Receiver};
use ship_sim_core::simulation::{MSG_FINISHED, MSG_INITIALIZING, MSG_ITERATING};
use ship_sim_core::{
    ControllerState, ProgressSink, RunRegistry, SimulationController, SimulationError,
    SolverMethod,
};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

#[ctor::ctor]
fn init() {
    common::init_tracing();
}

/// Sink that holds the worker at the start of the loop until released
fn gated_sink(gate: Receiver<()>) -> Arc<dyn ProgressSink> {
    Arc::new(move |message: &str| {
        if message == MSG_ITERATING {
            let _ = gate.recv_timeout(Duration::from_secs(30));
        }
    })
}

#[test]
fn test_start_runs_to_completion() {
    let registry = RunRegistry::new();
    let recorder = Recorder::default();
    let mut controller = SimulationController::new(
        "lifecycle",
        host_config(1.0),
        reference_mesh(),
        reference_waves(),
        registry.clone(),
    )
    .with_progress_sink(recorder.sink());

    assert_eq!(controller.state(), ControllerState::Idle);
    assert!(!controller.is_running());

    controller.start().unwrap();
    let summary = controller.wait().unwrap();

    assert_eq!(summary.state, ControllerState::Completed);
    assert_eq!(summary.steps, 10);
    assert!(!summary.accelerated);
    assert_eq!(controller.state(), ControllerState::Completed);
    assert!(!controller.is_running());
    assert!(controller.last_error().is_none());
    assert_eq!(registry.active_count(), 0);

    let messages = recorder.messages();
    assert_eq!(messages.first().map(String::as_str), Some(MSG_INITIALIZING));
    assert_eq!(messages.last().map(String::as_str), Some(MSG_FINISHED));

    // Outcome is cached
    assert_eq!(controller.wait().unwrap(), summary);
}

#[test]
fn test_is_running_while_loop_is_held() {
    let (release, gate) = bounded(1);
    let mut controller = SimulationController::new(
        "held",
        host_config(0.5),
        reference_mesh(),
        reference_waves(),
        RunRegistry::new(),
    )
    .with_progress_sink(gated_sink(gate));

    controller.start().unwrap();
    assert!(controller.is_running());
    assert_eq!(controller.state(), ControllerState::Running);
    assert!(matches!(
        controller.start(),
        Err(SimulationError::AlreadyRunning)
    ));
    assert!(matches!(
        controller.reset(),
        Err(SimulationError::InvalidState { operation: "reset", .. })
    ));

    release.send(()).unwrap();
    let summary = controller.wait().unwrap();
    assert_eq!(summary.state, ControllerState::Completed);
    assert!(!controller.is_running());
}

#[test]
fn test_registry_allows_one_run_per_identity() {
    let registry = RunRegistry::new();
    let (release, gate) = bounded(1);
    let mut first = SimulationController::new(
        "shared-hull",
        host_config(0.5),
        reference_mesh(),
        reference_waves(),
        registry.clone(),
    )
    .with_progress_sink(gated_sink(gate));
    let mut second = SimulationController::new(
        "shared-hull",
        host_config(0.5),
        reference_mesh(),
        reference_waves(),
        registry.clone(),
    );

    first.start().unwrap();
    let err = second.start().unwrap_err();
    assert_eq!(err, SimulationError::AlreadyActive("shared-hull".into()));
    assert_eq!(second.state(), ControllerState::Idle);
    assert!(!second.is_running());
    assert_eq!(second.last_error(), Some(err));

    release.send(()).unwrap();
    first.wait().unwrap();
    assert!(!registry.is_active(first.id()));

    // Slot is free once the first run has finished
    second.start().unwrap();
    assert_eq!(second.wait().unwrap().state, ControllerState::Completed);
}

#[test]
fn test_empty_wave_field_fails_fast() {
    let registry = RunRegistry::new();
    let recorder = Recorder::default();
    let mut controller = SimulationController::new(
        "calm",
        host_config(16.0),
        reference_mesh(),
        Vec::new(),
        registry.clone(),
    )
    .with_progress_sink(recorder.sink());

    let err = controller.start().unwrap_err();
    assert!(matches!(err, SimulationError::InvalidWaveField(_)));
    assert!(err.is_pre_loop());
    assert_eq!(controller.state(), ControllerState::Idle);
    assert!(!controller.is_running());
    assert_eq!(controller.last_error(), Some(err));
    assert_eq!(registry.active_count(), 0);
    assert!(!recorder.messages().iter().any(|m| m == MSG_ITERATING));
}

#[test]
fn test_invalid_end_time_fails_fast() {
    let mut controller = SimulationController::new(
        "no-time",
        host_config(-1.0),
        reference_mesh(),
        reference_waves(),
        RunRegistry::new(),
    );
    assert!(matches!(
        controller.start(),
        Err(SimulationError::InvalidConfig(_))
    ));
    assert_eq!(controller.state(), ControllerState::Idle);
}

#[test]
fn test_reset_allows_fresh_restart() {
    let mut controller = SimulationController::new(
        "restart",
        host_config(0.5),
        reference_mesh(),
        reference_waves(),
        RunRegistry::new(),
    );

    controller.start().unwrap();
    let first = controller.wait().unwrap();

    assert!(matches!(
        controller.start(),
        Err(SimulationError::InvalidState { operation: "start", .. })
    ));

    controller.reset().unwrap();
    assert_eq!(controller.state(), ControllerState::Idle);
    assert!(controller.wait().is_err());

    controller.start().unwrap();
    let second = controller.wait().unwrap();
    assert_eq!(first.steps, second.steps);
    assert_eq!(first.final_time, second.final_time);
}

#[test]
fn test_step_failure_stops_run() {
    let recorder = Recorder::default();
    let mut config = host_config(16.0);
    config.numerics.instability_factor = 1e-6;
    let mut controller = SimulationController::new(
        "unstable",
        config,
        reference_mesh(),
        reference_waves(),
        RunRegistry::new(),
    )
    .with_progress_sink(recorder.sink());

    controller.start().unwrap();
    let err = controller.wait().unwrap_err();

    assert!(matches!(err, SimulationError::NumericalInstability { .. }));
    assert!(!err.is_pre_loop());
    assert_eq!(controller.state(), ControllerState::Stopped);
    assert!(!controller.is_running());
    assert_eq!(controller.last_error(), Some(err.clone()));

    let messages = recorder.messages();
    let abort = format!("[Sim]: Run aborted: {err}");
    assert!(messages.contains(&abort));
    assert!(!messages.iter().any(|m| m == MSG_FINISHED));
}

#[test]
fn test_solver_failure_stops_run() {
    let recorder = Recorder::default();
    let mut config = host_config(16.0);
    config.numerics.solver = SolverMethod::ConjugateGradient {
        tolerance: 1e-14,
        max_iterations: 1,
    };
    let mut controller = SimulationController::new(
        "stiff",
        config,
        reference_mesh(),
        reference_waves(),
        RunRegistry::new(),
    )
    .with_progress_sink(recorder.sink());

    controller.start().unwrap();
    let err = controller.wait().unwrap_err();

    assert!(matches!(err, SimulationError::Convergence { .. }), "{err}");
    assert_eq!(controller.state(), ControllerState::Stopped);
    assert!(!controller.is_running());
    assert_eq!(controller.last_error(), Some(err.clone()));

    // Quiet steps with a zero right-hand side complete before the abort
    let completed = recorder.times().len();
    assert!(completed >= 1 && completed < 160);

    let messages = recorder.messages();
    assert!(messages.contains(&format!("[Sim]: Run aborted: {err}")));
    assert!(!messages.iter().any(|m| m == MSG_FINISHED));
}

#[test]
fn test_reset_collects_unwaited_failure() {
    let registry = RunRegistry::new();
    let mut config = host_config(16.0);
    config.numerics.instability_factor = 1e-6;
    let mut controller = SimulationController::new(
        "unwaited",
        config,
        reference_mesh(),
        reference_waves(),
        registry.clone(),
    );

    controller.start().unwrap();
    let deadline = Instant::now() + Duration::from_secs(30);
    while controller.state() == ControllerState::Running {
        assert!(Instant::now() < deadline, "run did not abort");
        thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(controller.state(), ControllerState::Stopped);
    assert!(!controller.is_running());
    assert!(matches!(
        controller.last_error(),
        Some(SimulationError::NumericalInstability { .. })
    ));

    controller.reset().unwrap();
    assert_eq!(controller.state(), ControllerState::Idle);
    assert_eq!(controller.last_error(), None);
    assert_eq!(registry.active_count(), 0);
    assert!(matches!(
        controller.wait(),
        Err(SimulationError::InvalidState { operation: "wait", .. })
    ));

    controller.start().unwrap();
    let err = controller.wait().unwrap_err();
    assert!(matches!(err, SimulationError::NumericalInstability { .. }));
}

#[test]
fn test_panicking_sink_does_not_affect_run() {
    let mut controller = SimulationController::new(
        "noisy",
        host_config(0.5),
        reference_mesh(),
        reference_waves(),
        RunRegistry::new(),
    )
    .with_progress_sink(Arc::new(|_: &str| panic!("display went away")));

    controller.start().unwrap();
    assert_eq!(controller.wait().unwrap().state, ControllerState::Completed);
}

#[test]
fn test_drop_stops_running_worker() {
    let registry = RunRegistry::new();
    let controller_registry = registry.clone();
    {
        let mut controller = SimulationController::new(
            "dropped",
            host_config(1.0e4),
            reference_mesh(),
            reference_waves(),
            controller_registry,
        );
        controller.start().unwrap();
    }
    assert_eq!(registry.active_count(), 0);
}
