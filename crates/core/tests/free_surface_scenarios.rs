//! End-to-end free-surface runs on the reference scenario

mod common;

use approx::assert_abs_diff_eq;
use common::{host_config, reference_mesh, reference_waves, Recorder};
use crossbeam_channel::bounded;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use ship_sim_core::simulation::{ChannelSink, MeshFrame, MSG_ITERATING};
use ship_sim_core::solver::{create_backend, create_context, initialize};
use ship_sim_core::{
    ComputeDevice, ControllerState, OutputPolicy, RunRegistry, SimulationController,
    SimulationError, SolverMethod, StopHandle, SurfaceGrid, WaveComponent,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

#[ctor::ctor]
fn init() {
    common::init_tracing();
}

#[test]
fn test_reference_scenario_completes() {
    let recorder = Recorder::default();
    let mut controller = SimulationController::new(
        "reference",
        host_config(16.0),
        reference_mesh(),
        reference_waves(),
        RunRegistry::new(),
    )
    .with_progress_sink(recorder.sink());

    controller.start().unwrap();
    let summary = controller.wait().unwrap();

    assert_eq!(summary.dt, 0.1);
    assert_eq!(summary.steps, 160);
    assert_eq!(summary.state, ControllerState::Completed);
    assert!(summary.final_time >= 16.0);
    assert!(controller.last_error().is_none());
    assert_eq!(recorder.times().len(), 160);
}

#[test]
fn test_clock_is_monotonic() {
    let (sink, receiver) = ChannelSink::bounded(10_000);
    let mut controller = SimulationController::new(
        "clock",
        host_config(3.05),
        reference_mesh(),
        reference_waves(),
        RunRegistry::new(),
    )
    .with_progress_sink(Arc::new(sink));

    controller.start().unwrap();
    let summary = controller.wait().unwrap();

    let times: Vec<f64> = receiver
        .try_iter()
        .filter_map(|m| ship_sim_core::simulation::parse_time_message(&m))
        .collect();
    assert_eq!(times.len(), summary.steps);
    assert_abs_diff_eq!(times[0], summary.dt, epsilon = 1e-6);
    for pair in times.windows(2) {
        assert!(pair[1] > pair[0]);
        assert_abs_diff_eq!(pair[1] - pair[0], summary.dt, epsilon = 1e-5);
    }
    // 3.05 s is not a multiple of dt; the run overshoots by less than one step
    let last = *times.last().unwrap();
    assert!(last >= 3.05 - 1e-6);
    assert!(last < 3.05 + summary.dt);
}

#[test]
fn test_time_stamps_resolve_sub_microsecond_steps() {
    let recorder = Recorder::default();
    let mut controller = SimulationController::new(
        "fast-clock",
        host_config(1e-6),
        reference_mesh(),
        vec![WaveComponent::new(1.0, 1e-5, 0.0, 0.0)],
        RunRegistry::new(),
    )
    .with_progress_sink(recorder.sink());

    let summary = controller.run_blocking().unwrap();
    assert_eq!(summary.state, ControllerState::Completed);
    assert_abs_diff_eq!(summary.dt, 1.25e-7, epsilon = 1e-18);

    let times = recorder.times();
    assert_eq!(times.len(), summary.steps);
    assert!(times.len() >= 8);
    for pair in times.windows(2) {
        assert!(pair[1] > pair[0], "time stamps {} and {} collapsed", pair[0], pair[1]);
        assert_abs_diff_eq!(pair[1] - pair[0], summary.dt, epsilon = 1e-15);
    }
    assert_eq!(*times.last().unwrap(), summary.final_time);
}

#[test]
fn test_stop_before_first_step() {
    let (release, gate) = bounded::<()>(1);
    let mut controller = SimulationController::new(
        "stop-now",
        host_config(16.0),
        reference_mesh(),
        reference_waves(),
        RunRegistry::new(),
    )
    .with_progress_sink(Arc::new(move |message: &str| {
        if message == MSG_ITERATING {
            let _ = gate.recv_timeout(Duration::from_secs(30));
        }
    }));

    controller.start().unwrap();
    controller.stop();
    release.send(()).unwrap();

    let summary = controller.wait().unwrap();
    assert_eq!(summary.state, ControllerState::Stopped);
    assert_eq!(summary.steps, 0);
    assert_eq!(summary.final_time, 0.0);
    assert_eq!(controller.state(), ControllerState::Stopped);
    assert!(controller.last_error().is_none());
}

#[test]
fn test_stop_completes_step_in_progress() {
    let handle: Arc<OnceLock<StopHandle>> = Arc::new(OnceLock::new());
    let slot = Arc::clone(&handle);
    let seen = AtomicUsize::new(0);
    let mut controller = SimulationController::new(
        "stop-later",
        host_config(16.0),
        reference_mesh(),
        reference_waves(),
        RunRegistry::new(),
    )
    .with_progress_sink(Arc::new(move |message: &str| {
        if message.starts_with("t = ") && seen.fetch_add(1, Ordering::SeqCst) == 2 {
            if let Some(handle) = slot.get() {
                handle.stop();
            }
        }
    }));
    handle.set(controller.stop_handle()).unwrap();

    controller.start().unwrap();
    let summary = controller.wait().unwrap();

    assert_eq!(summary.state, ControllerState::Stopped);
    assert_eq!(summary.steps, 3);
    assert_abs_diff_eq!(summary.final_time, 0.3, epsilon = 1e-12);
}

#[test]
fn test_run_blocking_matches_background_run() {
    let mut background = SimulationController::new(
        "background",
        host_config(2.0),
        reference_mesh(),
        reference_waves(),
        RunRegistry::new(),
    );
    background.start().unwrap();
    let expected = background.wait().unwrap();

    let mut blocking = SimulationController::new(
        "blocking",
        host_config(2.0),
        reference_mesh(),
        reference_waves(),
        RunRegistry::new(),
    );
    let summary = blocking.run_blocking().unwrap();
    assert_eq!(summary.steps, expected.steps);
    assert_eq!(summary.solver_iterations, expected.solver_iterations);
    assert_eq!(blocking.state(), ControllerState::Completed);
    assert!(!blocking.is_running());
}

fn collect_frames(mesh: SurfaceGrid, solver: SolverMethod, end_time: f64) -> Vec<MeshFrame> {
    let frames = Arc::new(Mutex::new(Vec::new()));
    let store = Arc::clone(&frames);
    let mut config = host_config(end_time);
    config.output = OutputPolicy::iterations_per_frame(1);
    config.numerics.solver = solver;

    let mut controller =
        SimulationController::new("frames", config, mesh, reference_waves(), RunRegistry::new())
            .with_mesh_sink(Arc::new(move |frame: &MeshFrame| {
                store.lock().unwrap().push(frame.clone());
            }));
    controller.run_blocking().unwrap();

    let frames = frames.lock().unwrap().clone();
    frames
}

#[test]
fn test_host_runs_are_deterministic() {
    let mut rng = StdRng::seed_from_u64(17);
    for _ in 0..3 {
        let mut mesh = SurfaceGrid::regular(6, 5, 40.0, 30.0).unwrap();
        for point in mesh.points_mut() {
            point.z += rng.random_range(-0.05..0.05);
        }

        let first = collect_frames(mesh.clone(), SolverMethod::default(), 2.0);
        let second = collect_frames(mesh, SolverMethod::default(), 2.0);
        assert_eq!(first.len(), 20);
        assert_eq!(first, second);
    }
}

#[test]
fn test_direct_and_iterative_solvers_agree() {
    let iterative = collect_frames(reference_mesh(), SolverMethod::default(), 4.0);
    let direct = collect_frames(reference_mesh(), SolverMethod::Direct, 4.0);
    assert_eq!(iterative.len(), direct.len());
    for (a, b) in iterative.iter().zip(&direct) {
        for (x, y) in a.elevations.iter().zip(&b.elevations) {
            assert_abs_diff_eq!(*x, *y, epsilon = 1e-6);
        }
    }
}

#[test]
fn test_frames_per_second_schedule() {
    let frames = Arc::new(Mutex::new(Vec::new()));
    let store = Arc::clone(&frames);
    let mut config = host_config(2.05);
    config.output = OutputPolicy::frames_per_second(2.0);

    let mut controller = SimulationController::new(
        "fps",
        config,
        reference_mesh(),
        reference_waves(),
        RunRegistry::new(),
    )
    .with_mesh_sink(Arc::new(move |frame: &MeshFrame| {
        store.lock().unwrap().push(frame.step);
    }));
    controller.run_blocking().unwrap();

    // Every 0.5 s of simulated time, plus the final state at step 21
    assert_eq!(*frames.lock().unwrap(), vec![5, 10, 15, 20, 21]);
}

#[test]
fn test_host_device_creates_no_context() {
    assert!(create_context(&ComputeDevice::Host).unwrap().is_none());

    let params = host_config(1.0).numerics;
    let init = initialize(&reference_mesh(), &reference_waves(), None, &params).unwrap();
    assert!(!init.matrix.is_device_resident());
    let backend = create_backend(None, &init, &params);
    assert!(!backend.is_gpu_accelerated());
}

#[test]
fn test_surface_follows_incident_wave() {
    let frames = collect_frames(reference_mesh(), SolverMethod::default(), 16.0);
    let last = frames.last().unwrap();
    assert_eq!(last.step, 160);
    let peak = last
        .elevations
        .iter()
        .fold(0.0_f64, |acc, &eta| acc.max(eta.abs()));
    assert!(peak > 0.0);
    assert!(peak < 10.0, "elevation should stay of wave order, got {peak}");
    assert!(last.elevations.iter().all(|eta| eta.is_finite()));
}

#[test]
fn test_gpu_request_without_device_fails_pre_loop() {
    let mut config = host_config(1.0);
    config.device = ComputeDevice::Gpu(ship_sim_core::DeviceSelector {
        adapter_name: Some("no-such-adapter-anywhere".into()),
        ..Default::default()
    });
    let mut controller = SimulationController::new(
        "missing-gpu",
        config,
        reference_mesh(),
        reference_waves(),
        RunRegistry::new(),
    );

    let err = controller.start().unwrap_err();
    assert!(matches!(err, SimulationError::DeviceAcquisition { .. }));
    assert_eq!(controller.state(), ControllerState::Idle);
    assert!(!controller.is_running());
}
