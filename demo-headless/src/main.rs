use clap::{Parser, ValueEnum};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use ship_sim_core::simulation::{parse_time_message, MeshFrame};
use ship_sim_core::{
    ComputeDevice, DeviceSelector, OutputPolicy, RunConfig, RunRegistry, SimulationController,
    SolverMethod, SurfaceGrid, WaveComponent,
};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Free-surface wave simulation demo with configurable parameters
#[derive(Parser, Debug)]
#[command(name = "ship-sim-demo")]
#[command(about = "Headless free-surface simulation under regular waves", long_about = None)]
struct Args {
    /// Grid points along x
    #[arg(long, default_value_t = 4)]
    nx: usize,

    /// Grid points along y
    #[arg(long, default_value_t = 4)]
    ny: usize,

    /// Grid extent along x in meters
    #[arg(long, default_value_t = 30.0)]
    length: f64,

    /// Grid extent along y in meters
    #[arg(long, default_value_t = 30.0)]
    breadth: f64,

    /// Simulated end time in seconds
    #[arg(short, long, default_value_t = 16.0)]
    end_time: f64,

    /// Wave component as `amplitude,period,phase,heading` (repeatable)
    #[arg(short, long = "wave", value_parser = parse_wave)]
    waves: Vec<WaveComponent>,

    /// Compute device
    #[arg(short, long, value_enum, default_value_t = Device::Auto)]
    device: Device,

    /// Adapter name filter when a GPU is requested
    #[arg(long)]
    adapter: Option<String>,

    /// Linear solver for the source strengths
    #[arg(short, long, value_enum, default_value_t = Solver::Cg)]
    solver: Solver,

    /// Mesh output rate, interpreted according to --output-kind
    #[arg(long, default_value_t = 2.0)]
    output_rate: f64,

    /// Mesh output rate kind
    #[arg(long, value_enum, default_value_t = OutputKindArg::Fps)]
    output_kind: OutputKindArg,

    /// Seed for a random initial roughness of the mesh (none = flat)
    #[arg(long)]
    roughness_seed: Option<u64>,

    /// Amplitude of the initial roughness in meters
    #[arg(long, default_value_t = 0.05)]
    roughness: f64,

    /// Print every progress message instead of the time stamps only
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Device {
    Host,
    Gpu,
    Auto,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Solver {
    Cg,
    Direct,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputKindArg {
    Fps,
    Ipf,
}

fn parse_wave(s: &str) -> Result<WaveComponent, String> {
    let values: Vec<f64> = s
        .split(',')
        .map(|v| {
            v.trim()
                .parse::<f64>()
                .map_err(|e| format!("invalid number '{v}': {e}"))
        })
        .collect::<Result<_, _>>()?;
    match values.as_slice() {
        &[amplitude, period, phase, heading] => {
            Ok(WaveComponent::new(amplitude, period, phase, heading))
        }
        _ => Err(format!(
            "expected amplitude,period,phase,heading, got {} value(s)",
            values.len()
        )),
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    println!("=== Free-Surface Simulation Demo ===\n");

    let mut mesh = match SurfaceGrid::regular(args.nx, args.ny, args.length, args.breadth) {
        Ok(mesh) => mesh,
        Err(e) => {
            eprintln!("Invalid grid: {e}");
            std::process::exit(2);
        }
    };
    if let Some(seed) = args.roughness_seed {
        let mut rng = StdRng::seed_from_u64(seed);
        for point in mesh.points_mut() {
            point.z += rng.random_range(-args.roughness..=args.roughness);
        }
        println!("Applied initial roughness ±{:.3} m (seed {})", args.roughness, seed);
    }
    println!(
        "Grid: {}x{} points over {:.1}x{:.1} m",
        args.nx, args.ny, args.length, args.breadth
    );

    let waves = if args.waves.is_empty() {
        vec![WaveComponent::new(1.0, 8.0, 0.0, 0.0)]
    } else {
        args.waves.clone()
    };
    for wave in &waves {
        println!(
            "Wave: A={:.2} m, T={:.2} s, phase={:.2} rad, heading={:.0}°",
            wave.amplitude, wave.period, wave.phase, wave.heading
        );
    }

    let mut config = RunConfig {
        end_time: args.end_time,
        ..RunConfig::default()
    };
    config.device = match args.device {
        Device::Host => ComputeDevice::Host,
        Device::Auto => ComputeDevice::Auto,
        Device::Gpu => ComputeDevice::Gpu(DeviceSelector {
            adapter_name: args.adapter.clone(),
            ..DeviceSelector::default()
        }),
    };
    config.numerics.solver = match args.solver {
        Solver::Cg => SolverMethod::default(),
        Solver::Direct => SolverMethod::Direct,
    };
    config.output = match args.output_kind {
        OutputKindArg::Fps => OutputPolicy::frames_per_second(args.output_rate),
        OutputKindArg::Ipf => OutputPolicy::iterations_per_frame(args.output_rate.round() as usize),
    };

    let verbose = args.verbose;
    let mut controller =
        SimulationController::new("demo", config, mesh, waves, RunRegistry::new())
            .with_progress_sink(Arc::new(move |message: &str| {
                if verbose {
                    println!("{message}");
                } else if let Some(t) = parse_time_message(message) {
                    if (t * 10.0).round() % 10.0 == 0.0 {
                        println!("  t = {t:.1} s");
                    }
                }
            }))
            .with_mesh_sink(Arc::new(|frame: &MeshFrame| {
                let peak = frame
                    .elevations
                    .iter()
                    .fold(0.0_f64, |acc, &eta| acc.max(eta.abs()));
                info!(
                    "Frame {} at t = {:.2} s: max |eta| = {:.4} m, eta(0,0) = {:.4} m",
                    frame.step,
                    frame.time,
                    peak,
                    frame.elevation(0, 0)
                );
            }));

    if let Err(e) = controller.start() {
        eprintln!("Failed to start simulation: {e}");
        std::process::exit(1);
    }
    println!("\nRunning until t = {:.1} s...\n", args.end_time);

    match controller.wait() {
        Ok(summary) => {
            println!("\n=== Summary ===");
            println!("State:             {}", summary.state);
            println!("Steps:             {}", summary.steps);
            println!("Time step:         {:.4} s", summary.dt);
            println!("Final time:        {:.3} s", summary.final_time);
            println!("Solver iterations: {}", summary.solver_iterations);
            println!(
                "Backend:           {}",
                if summary.accelerated { "GPU" } else { "host" }
            );
            println!("Mean step time:    {:.3} ms", summary.mean_step_ms);
        }
        Err(e) => {
            eprintln!("\nSimulation aborted: {e}");
            std::process::exit(1);
        }
    }
}
