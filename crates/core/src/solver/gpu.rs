//! GPU implementations of the per-step stages
//!
//! This backend is only available when the `gpu` feature is enabled.
//!
//! # Shader Files
//!
//! GPU compute shaders are located in `shaders/`:
//! - `assemble.wgsl` - Influence and normal-derivative matrices, singularity flag
//! - `matvec.wgsl` - Dense matrix-vector product used by CG and for `K μ`
//! - `evolve.wgsl` - Free-surface update with wave forcing
//!
//! # Implementation
//!
//! The matrices stay resident on the device for the whole run. The host keeps
//! the authoritative free-surface state in f64: each stage uploads what its
//! kernel needs, dispatches, and reads the results back synchronously. Kernels
//! compute in f32, so device results track the host path to single-precision
//! tolerance. The Conjugate Gradient iteration itself runs on the host around
//! device matrix-vector products.

use super::context::GpuContext;
use super::cpu::{instability_bound, COINCIDENT_FRACTION};
use super::forcing::ramp_factor;
use super::linear::{conjugate_gradient, lu_solve, SolveReport};
use super::params::{NumericalParams, SolverMethod};
use super::r#trait::{FreeSurfaceEvolver, MatrixGenerator, SourceSolver};
use super::state::{AssemblyMatrix, FreeSurface, MatrixStatus};
use crate::core_types::WaveState;
use crate::error::SimulationError;
use bytemuck::{Pod, Zeroable};
use nalgebra::{DMatrix, DVector};
use std::f64::consts::TAU;
use std::sync::Arc;
use wgpu::util::DeviceExt;

/// Tightest relative residual requested from the single-precision device solve
pub const DEVICE_MIN_TOLERANCE: f64 = 1e-6;

const F32_SIZE: u64 = std::mem::size_of::<f32>() as u64;
const NO_SINGULAR_ROW: u32 = u32::MAX;

/// Assembly shader parameters (must match WGSL struct layout)
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
struct AssembleParams {
    n: u32,
    _pad0: u32,
    eps: f32,
    _pad1: f32,
}

/// Matrix-vector shader parameters (must match WGSL struct layout)
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
struct MatvecParams {
    n: u32,
    _pad: [u32; 3],
}

/// Evolution shader parameters (must match WGSL struct layout)
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
struct EvolveParams {
    n: u32,
    wave_count: u32,
    _pad0: [u32; 2],
    dt: f32,
    gravity: f32,
    ramp: f32,
    _pad1: f32,
}

/// Per-wave data for the evolution shader (must match WGSL struct layout)
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
struct GpuWave {
    amplitude: f32,
    wavenumber: f32,
    dir_x: f32,
    dir_y: f32,
    time_phase: f32,
    potential_scale: f32,
    _pad: [f32; 2],
}

#[allow(clippy::cast_possible_truncation)] // Bounded by GpuContext::can_allocate
fn gpu_len(n: usize) -> u32 {
    n as u32
}

#[allow(clippy::cast_possible_truncation)] // Device kernels run in single precision
fn to_f32(values: &[f64]) -> Vec<f32> {
    values.iter().map(|&v| v as f32).collect()
}

fn device_only() -> SimulationError {
    SimulationError::Device("device stage was handed a host-resident matrix".to_string())
}

fn storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn uniform_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn compute_pipeline(
    device: &wgpu::Device,
    label: &str,
    module: &wgpu::ShaderModule,
    layout: &wgpu::BindGroupLayout,
) -> wgpu::ComputePipeline {
    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(label),
        bind_group_layouts: &[layout],
        push_constant_ranges: &[],
    });
    device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some(label),
        layout: Some(&pipeline_layout),
        module,
        entry_point: Some("main"),
        compilation_options: wgpu::PipelineCompilationOptions::default(),
        cache: None,
    })
}

fn storage_buffer(device: &wgpu::Device, label: &str, size: u64) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        size,
        usage: wgpu::BufferUsages::STORAGE
            | wgpu::BufferUsages::COPY_DST
            | wgpu::BufferUsages::COPY_SRC,
        mapped_at_creation: false,
    })
}

fn staging_buffer(device: &wgpu::Device, label: &str, size: u64) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        size,
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    })
}

fn dispatch(
    gpu: &GpuContext,
    label: &str,
    pipeline: &wgpu::ComputePipeline,
    bind_group: &wgpu::BindGroup,
    workgroups: (u32, u32),
) {
    let mut encoder = gpu
        .device()
        .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) });
    {
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some(label),
            timestamp_writes: None,
        });
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, bind_group, &[]);
        pass.dispatch_workgroups(workgroups.0, workgroups.1, 1);
    }
    gpu.queue().submit(std::iter::once(encoder.finish()));
}

/// Copy `count` elements of `source` through `staging` and read them on the host
fn read_back<T: Pod>(
    gpu: &GpuContext,
    source: &wgpu::Buffer,
    staging: &wgpu::Buffer,
    count: usize,
) -> Result<Vec<T>, SimulationError> {
    let size = (count * std::mem::size_of::<T>()) as u64;

    let mut encoder = gpu
        .device()
        .create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Readback Encoder"),
        });
    encoder.copy_buffer_to_buffer(source, 0, staging, 0, size);
    gpu.queue().submit(std::iter::once(encoder.finish()));

    let slice = staging.slice(..size);
    let (tx, rx) = std::sync::mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = tx.send(result);
    });
    let _ = gpu.device().poll(wgpu::Maintain::Wait);

    rx.recv()
        .map_err(|e| SimulationError::Device(format!("readback callback dropped: {e}")))?
        .map_err(|e| SimulationError::Device(format!("buffer map failed: {e}")))?;

    let data = slice.get_mapped_range();
    let values = bytemuck::cast_slice(&data).to_vec();
    drop(data);
    staging.unmap();
    Ok(values)
}

/// Influence matrices resident on the device, row-major f32
#[derive(Debug)]
pub struct DeviceMatrix {
    gpu: Arc<GpuContext>,
    n: usize,
    influence: wgpu::Buffer,
    normal: wgpu::Buffer,
}

impl DeviceMatrix {
    /// Allocate zeroed `n × n` matrices
    pub(crate) fn new(gpu: &Arc<GpuContext>, n: usize) -> Self {
        let size = (n * n) as u64 * F32_SIZE;
        let device = gpu.device();
        Self {
            gpu: Arc::clone(gpu),
            n,
            influence: storage_buffer(device, "Influence Matrix", size),
            normal: storage_buffer(device, "Normal Derivative Matrix", size),
        }
    }

    fn read(&self, buffer: &wgpu::Buffer) -> Result<DMatrix<f64>, SimulationError> {
        let size = (self.n * self.n) as u64 * F32_SIZE;
        let staging = staging_buffer(self.gpu.device(), "Matrix Staging", size);
        let values: Vec<f32> = read_back(&self.gpu, buffer, &staging, self.n * self.n)?;
        Ok(DMatrix::from_row_iterator(
            self.n,
            self.n,
            values.into_iter().map(f64::from),
        ))
    }

    /// Read the single-layer matrix G back to the host
    ///
    /// # Errors
    ///
    /// Returns [`SimulationError::Device`] if the readback fails.
    pub fn read_influence(&self) -> Result<DMatrix<f64>, SimulationError> {
        self.read(&self.influence)
    }

    /// Read the normal-derivative matrix K back to the host
    ///
    /// # Errors
    ///
    /// Returns [`SimulationError::Device`] if the readback fails.
    pub fn read_normal(&self) -> Result<DMatrix<f64>, SimulationError> {
        self.read(&self.normal)
    }
}

/// Device matrix assembly
#[derive(Debug)]
pub struct GpuMatrixGenerator {
    gpu: Arc<GpuContext>,
    n: usize,
    layout: wgpu::BindGroupLayout,
    pipeline: wgpu::ComputePipeline,
    points: wgpu::Buffer,
    normals: wgpu::Buffer,
    status: wgpu::Buffer,
    status_staging: wgpu::Buffer,
    params: wgpu::Buffer,
}

impl GpuMatrixGenerator {
    /// Create the assembly pipeline for an `n`-point surface
    #[must_use]
    pub fn new(gpu: &Arc<GpuContext>, n: usize) -> Self {
        let device = gpu.device();
        let shader = device.create_shader_module(wgpu::include_wgsl!("shaders/assemble.wgsl"));

        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Assemble Bind Group Layout"),
            entries: &[
                storage_entry(0, true),  // points
                storage_entry(1, true),  // normals
                storage_entry(2, false), // influence
                storage_entry(3, false), // normal_deriv
                storage_entry(4, false), // status
                uniform_entry(5),        // params
            ],
        });
        let pipeline = compute_pipeline(device, "Assemble Pipeline", &shader, &layout);

        let vec4_size = (n as u64) * 4 * F32_SIZE;
        Self {
            gpu: Arc::clone(gpu),
            n,
            points: storage_buffer(device, "Collocation Points", vec4_size),
            normals: storage_buffer(device, "Normals", vec4_size),
            status: storage_buffer(device, "Assembly Status", F32_SIZE),
            status_staging: staging_buffer(device, "Assembly Status Staging", F32_SIZE),
            params: device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("Assemble Params"),
                size: std::mem::size_of::<AssembleParams>() as u64,
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            }),
            layout,
            pipeline,
        }
    }
}

impl MatrixGenerator for GpuMatrixGenerator {
    #[allow(clippy::cast_possible_truncation)] // Geometry is uploaded in single precision
    fn generate(
        &mut self,
        surface: &FreeSurface,
        matrix: &mut AssemblyMatrix,
    ) -> Result<(), SimulationError> {
        matrix.invalidate();
        let device_matrix = matrix.as_device().ok_or_else(device_only)?;

        let points: Vec<[f32; 4]> = surface
            .positions()
            .iter()
            .zip(surface.self_influences())
            .map(|(p, &s)| [p.x as f32, p.y as f32, p.z as f32, s as f32])
            .collect();
        let normals: Vec<[f32; 4]> = surface
            .normals()
            .iter()
            .map(|n| [n.x as f32, n.y as f32, n.z as f32, 0.0])
            .collect();
        let params = AssembleParams {
            n: gpu_len(self.n),
            _pad0: 0,
            eps: (COINCIDENT_FRACTION * surface.min_spacing()) as f32,
            _pad1: 0.0,
        };

        let queue = self.gpu.queue();
        queue.write_buffer(&self.points, 0, bytemuck::cast_slice(&points));
        queue.write_buffer(&self.normals, 0, bytemuck::cast_slice(&normals));
        queue.write_buffer(&self.status, 0, bytemuck::bytes_of(&NO_SINGULAR_ROW));
        queue.write_buffer(&self.params, 0, bytemuck::bytes_of(&params));

        let bind_group = self
            .gpu
            .device()
            .create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Assemble Bind Group"),
                layout: &self.layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: self.points.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: self.normals.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: device_matrix.influence.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 3,
                        resource: device_matrix.normal.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 4,
                        resource: self.status.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 5,
                        resource: self.params.as_entire_binding(),
                    },
                ],
            });

        let groups = gpu_len(self.n).div_ceil(8);
        dispatch(
            &self.gpu,
            "Assemble Pass",
            &self.pipeline,
            &bind_group,
            (groups, groups),
        );

        let status: Vec<u32> = read_back(&self.gpu, &self.status, &self.status_staging, 1)?;
        if let Some(&row) = status.first().filter(|&&row| row != NO_SINGULAR_ROW) {
            return Err(SimulationError::SingularSystem {
                row: row as usize,
                reason: "coincident collocation points or degenerate panel".to_string(),
            });
        }

        matrix
            .rhs_mut()
            .as_mut_slice()
            .copy_from_slice(surface.potentials());
        matrix.set_status(MatrixStatus::Generated);
        Ok(())
    }

    fn is_gpu_accelerated(&self) -> bool {
        true
    }
}

/// Dense matrix-vector product on the device
#[derive(Debug)]
struct MatvecKernel {
    gpu: Arc<GpuContext>,
    n: usize,
    layout: wgpu::BindGroupLayout,
    pipeline: wgpu::ComputePipeline,
    params: wgpu::Buffer,
    x: wgpu::Buffer,
    y: wgpu::Buffer,
    staging: wgpu::Buffer,
}

impl MatvecKernel {
    fn new(gpu: &Arc<GpuContext>, n: usize) -> Self {
        let device = gpu.device();
        let shader = device.create_shader_module(wgpu::include_wgsl!("shaders/matvec.wgsl"));

        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Matvec Bind Group Layout"),
            entries: &[
                storage_entry(0, true),  // coefficients
                storage_entry(1, true),  // x
                storage_entry(2, false), // y
                uniform_entry(3),        // params
            ],
        });
        let pipeline = compute_pipeline(device, "Matvec Pipeline", &shader, &layout);

        let params = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Matvec Params"),
            contents: bytemuck::bytes_of(&MatvecParams {
                n: gpu_len(n),
                _pad: [0; 3],
            }),
            usage: wgpu::BufferUsages::UNIFORM,
        });

        let vector_size = n as u64 * F32_SIZE;
        Self {
            gpu: Arc::clone(gpu),
            n,
            x: storage_buffer(device, "Matvec Input", vector_size),
            y: storage_buffer(device, "Matvec Output", vector_size),
            staging: staging_buffer(device, "Matvec Staging", vector_size),
            params,
            layout,
            pipeline,
        }
    }

    /// `out = A v` for a device-resident row-major matrix `A`
    fn apply(
        &self,
        matrix: &wgpu::Buffer,
        v: &DVector<f64>,
        out: &mut DVector<f64>,
    ) -> Result<(), SimulationError> {
        self.gpu
            .queue()
            .write_buffer(&self.x, 0, bytemuck::cast_slice(&to_f32(v.as_slice())));

        let bind_group = self
            .gpu
            .device()
            .create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Matvec Bind Group"),
                layout: &self.layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: matrix.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: self.x.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: self.y.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 3,
                        resource: self.params.as_entire_binding(),
                    },
                ],
            });
        dispatch(
            &self.gpu,
            "Matvec Pass",
            &self.pipeline,
            &bind_group,
            (gpu_len(self.n).div_ceil(64), 1),
        );

        let values: Vec<f32> = read_back(&self.gpu, &self.y, &self.staging, self.n)?;
        for (o, v) in out.iter_mut().zip(values) {
            *o = f64::from(v);
        }
        Ok(())
    }
}

/// Source-strength solver around device matrix-vector products
#[derive(Debug)]
pub struct GpuSourceSolver {
    method: SolverMethod,
    kernel: MatvecKernel,
}

impl GpuSourceSolver {
    /// Create a device solver for an `n`-point surface
    #[must_use]
    pub fn new(gpu: &Arc<GpuContext>, n: usize, method: SolverMethod) -> Self {
        Self {
            method,
            kernel: MatvecKernel::new(gpu, n),
        }
    }
}

impl SourceSolver for GpuSourceSolver {
    fn solve(
        &mut self,
        surface: &mut FreeSurface,
        matrix: &mut AssemblyMatrix,
    ) -> Result<SolveReport, SimulationError> {
        if matrix.status() != MatrixStatus::Generated {
            return Err(SimulationError::StaleMatrix);
        }
        let device_matrix = matrix.as_device().ok_or_else(device_only)?;
        let rhs = matrix.rhs();
        let kernel = &self.kernel;

        let (flux, report) = match self.method {
            SolverMethod::ConjugateGradient {
                tolerance,
                max_iterations,
            } => {
                let mut x = DVector::from_column_slice(&surface.flux);
                let report = conjugate_gradient(
                    |v, out| kernel.apply(&device_matrix.influence, v, out),
                    rhs,
                    &mut x,
                    tolerance.max(DEVICE_MIN_TOLERANCE),
                    max_iterations,
                )?;
                (x, report)
            }
            SolverMethod::Direct => lu_solve(&device_matrix.read_influence()?, rhs)?,
        };

        let mut normal_flux = DVector::zeros(flux.len());
        kernel.apply(&device_matrix.normal, &flux, &mut normal_flux)?;

        surface.store_solution(flux.as_slice(), normal_flux.as_slice());
        matrix.set_status(MatrixStatus::Solved);
        Ok(report)
    }

    fn is_gpu_accelerated(&self) -> bool {
        true
    }
}

/// Device free-surface integrator
#[derive(Debug)]
pub struct GpuEvolver {
    gpu: Arc<GpuContext>,
    n: usize,
    wave_count: usize,
    ramp_duration: f64,
    bound: f64,
    pipeline: wgpu::ComputePipeline,
    bind_group: wgpu::BindGroup,
    params: wgpu::Buffer,
    waves: wgpu::Buffer,
    normal_velocity: wgpu::Buffer,
    elevation: wgpu::Buffer,
    potential: wgpu::Buffer,
    staging: wgpu::Buffer,
}

impl GpuEvolver {
    /// Create the evolution pipeline for `surface` under `waves`
    #[must_use]
    #[allow(clippy::cast_possible_truncation)] // Rest geometry is uploaded in single precision
    pub fn new(
        gpu: &Arc<GpuContext>,
        surface: &FreeSurface,
        params: &NumericalParams,
        waves: &WaveState,
    ) -> Self {
        let device = gpu.device();
        let n = surface.len();
        let wave_count = waves.modes().len();
        let shader = device.create_shader_module(wgpu::include_wgsl!("shaders/evolve.wgsl"));

        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Evolve Bind Group Layout"),
            entries: &[
                uniform_entry(0),        // params
                storage_entry(1, true),  // rest
                storage_entry(2, true),  // waves
                storage_entry(3, true),  // normal_velocity
                storage_entry(4, false), // elevation
                storage_entry(5, false), // potential
            ],
        });
        let pipeline = compute_pipeline(device, "Evolve Pipeline", &shader, &layout);

        let rest: Vec<[f32; 4]> = surface
            .rest_positions()
            .iter()
            .zip(surface.relaxation())
            .map(|(p, &r)| [p.x as f32, p.y as f32, r as f32, 0.0])
            .collect();
        let rest = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Rest Points"),
            contents: bytemuck::cast_slice(&rest),
            usage: wgpu::BufferUsages::STORAGE,
        });

        let params_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Evolve Params"),
            size: std::mem::size_of::<EvolveParams>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let waves_buffer = storage_buffer(
            device,
            "Wave Components",
            (wave_count * std::mem::size_of::<GpuWave>()) as u64,
        );
        let vector_size = n as u64 * F32_SIZE;
        let normal_velocity = storage_buffer(device, "Normal Velocity", vector_size);
        let elevation = storage_buffer(device, "Elevation", vector_size);
        let potential = storage_buffer(device, "Potential", vector_size);

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Evolve Bind Group"),
            layout: &layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: params_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: rest.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: waves_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: normal_velocity.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: elevation.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 5,
                    resource: potential.as_entire_binding(),
                },
            ],
        });

        Self {
            gpu: Arc::clone(gpu),
            n,
            wave_count,
            ramp_duration: params.ramp_periods * waves.max_period(),
            bound: instability_bound(params, waves),
            pipeline,
            bind_group,
            params: params_buffer,
            waves: waves_buffer,
            normal_velocity,
            elevation,
            potential,
            staging: staging_buffer(device, "Evolve Staging", vector_size),
        }
    }
}

impl FreeSurfaceEvolver for GpuEvolver {
    #[allow(clippy::cast_possible_truncation)] // Kernel inputs are single precision
    fn evolve(
        &mut self,
        surface: &mut FreeSurface,
        waves: &WaveState,
        dt: f64,
        t: f64,
    ) -> Result<(), SimulationError> {
        if waves.modes().len() != self.wave_count {
            return Err(SimulationError::Device(format!(
                "evolver built for {} wave component(s), got {}",
                self.wave_count,
                waves.modes().len()
            )));
        }

        let g = waves.gravity();
        // Time phases reduced in double precision before the f32 kernel sees them
        let wave_data: Vec<GpuWave> = waves
            .modes()
            .iter()
            .map(|mode| GpuWave {
                amplitude: mode.amplitude as f32,
                wavenumber: mode.wavenumber as f32,
                dir_x: mode.dir_x as f32,
                dir_y: mode.dir_y as f32,
                time_phase: (mode.phase - mode.omega * t).rem_euclid(TAU) as f32,
                potential_scale: (mode.amplitude * g / mode.omega) as f32,
                _pad: [0.0; 2],
            })
            .collect();
        let params = EvolveParams {
            n: gpu_len(self.n),
            wave_count: gpu_len(self.wave_count),
            _pad0: [0; 2],
            dt: dt as f32,
            gravity: g as f32,
            ramp: ramp_factor(t, self.ramp_duration) as f32,
            _pad1: 0.0,
        };

        let queue = self.gpu.queue();
        queue.write_buffer(&self.params, 0, bytemuck::bytes_of(&params));
        queue.write_buffer(&self.waves, 0, bytemuck::cast_slice(&wave_data));
        queue.write_buffer(
            &self.normal_velocity,
            0,
            bytemuck::cast_slice(&to_f32(surface.normal_velocities())),
        );
        queue.write_buffer(
            &self.elevation,
            0,
            bytemuck::cast_slice(&to_f32(surface.elevations())),
        );
        queue.write_buffer(
            &self.potential,
            0,
            bytemuck::cast_slice(&to_f32(surface.potentials())),
        );

        dispatch(
            &self.gpu,
            "Evolve Pass",
            &self.pipeline,
            &self.bind_group,
            (gpu_len(self.n).div_ceil(64), 1),
        );

        let elevation: Vec<f32> = read_back(&self.gpu, &self.elevation, &self.staging, self.n)?;
        let potential: Vec<f32> = read_back(&self.gpu, &self.potential, &self.staging, self.n)?;
        for (k, (eta, phi)) in elevation.into_iter().zip(potential).enumerate() {
            surface.elevation[k] = f64::from(eta);
            surface.potential[k] = f64::from(phi);
        }

        surface.check_bounds(self.bound)?;
        surface.update_kinematics();
        Ok(())
    }

    fn is_gpu_accelerated(&self) -> bool {
        true
    }
}
