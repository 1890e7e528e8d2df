//! Compute device selection and GPU context initialization
//!
//! A run either executes entirely on the host or offloads the per-step kernels
//! to a wgpu device. The choice is made once, before the time loop starts, by
//! [`create_context`]. Failure to acquire an explicitly requested device is a
//! pre-loop error; `Auto` falls back to the host silently when no adapter
//! exists and with a warning when an adapter exists but fails to initialize.

use crate::error::SimulationError;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[cfg(feature = "gpu")]
use std::sync::Arc;

/// Criteria for picking a GPU adapter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSelector {
    /// Case-insensitive substring of the adapter name; `None` takes the first match
    pub adapter_name: Option<String>,
    /// Prefer a discrete, high-performance adapter
    pub high_performance: bool,
    /// Accept a software (fallback) adapter
    pub allow_fallback_adapter: bool,
}

impl Default for DeviceSelector {
    fn default() -> Self {
        Self {
            adapter_name: None,
            high_performance: true,
            allow_fallback_adapter: false,
        }
    }
}

/// Where the per-step kernels execute
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ComputeDevice {
    /// Host only; no device object is created
    Host,
    /// A GPU matching the selector; failure to acquire it is fatal
    Gpu(DeviceSelector),
    /// GPU when available, otherwise host
    #[default]
    Auto,
}

/// Result of GPU initialization attempt
///
/// This enum distinguishes between different failure modes:
/// - `NoGpuFound`: No compatible GPU adapter
/// - `InitFailed`: GPU found but device creation failed
#[derive(Debug)]
pub enum GpuInitResult {
    /// GPU initialized successfully
    #[cfg(feature = "gpu")]
    Success(GpuContext),
    /// No GPU adapter matched the selector
    NoGpuFound,
    /// GPU found but initialization failed
    InitFailed {
        /// Name of the adapter that failed
        adapter_name: String,
        /// Error message
        error: String,
    },
}

impl GpuInitResult {
    fn into_context(self) -> Result<ComputeContext, SimulationError> {
        match self {
            #[cfg(feature = "gpu")]
            Self::Success(gpu) => Ok(ComputeContext { gpu: Arc::new(gpu) }),
            Self::NoGpuFound => Err(SimulationError::DeviceAcquisition {
                adapter: None,
                reason: "no compatible GPU adapter found".to_string(),
            }),
            Self::InitFailed {
                adapter_name,
                error,
            } => Err(SimulationError::DeviceAcquisition {
                adapter: Some(adapter_name),
                reason: error,
            }),
        }
    }
}

// All GPU-specific code is conditionally compiled only when "gpu" feature is enabled
#[cfg(feature = "gpu")]
mod gpu_impl {
    use super::{DeviceSelector, GpuInitResult};
    use tracing::{debug, info};

    /// GPU context managing device and queue
    ///
    /// Wraps wgpu device and queue along with adapter information.
    #[derive(Debug)]
    pub struct GpuContext {
        device: wgpu::Device,
        queue: wgpu::Queue,
        adapter_info: wgpu::AdapterInfo,
    }

    fn pick_adapter(instance: &wgpu::Instance, selector: &DeviceSelector) -> Option<wgpu::Adapter> {
        if let Some(wanted) = &selector.adapter_name {
            let wanted = wanted.to_lowercase();
            return instance
                .enumerate_adapters(wgpu::Backends::all())
                .into_iter()
                .filter(|a| {
                    selector.allow_fallback_adapter
                        || a.get_info().device_type != wgpu::DeviceType::Cpu
                })
                .find(|a| a.get_info().name.to_lowercase().contains(&wanted));
        }

        let power_preference = if selector.high_performance {
            wgpu::PowerPreference::HighPerformance
        } else {
            wgpu::PowerPreference::LowPower
        };
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference,
            compatible_surface: None,
            force_fallback_adapter: false,
        }));

        match adapter {
            Some(a) => Some(a),
            None if selector.allow_fallback_adapter => {
                pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
                    power_preference,
                    compatible_surface: None,
                    force_fallback_adapter: true,
                }))
            }
            None => None,
        }
    }

    impl GpuContext {
        /// Initialize a GPU context matching `selector`
        ///
        /// # Returns
        ///
        /// - `GpuInitResult::Success` - GPU ready to use
        /// - `GpuInitResult::NoGpuFound` - No compatible GPU adapter
        /// - `GpuInitResult::InitFailed` - GPU found but initialization failed
        #[allow(clippy::new_ret_no_self)]
        pub fn new(selector: &DeviceSelector) -> GpuInitResult {
            info!("Attempting to initialize GPU context");

            let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
                backends: wgpu::Backends::all(),
                ..Default::default()
            });

            let adapter = if let Some(a) = pick_adapter(&instance, selector) {
                debug!("Found GPU adapter: {}", a.get_info().name);
                a
            } else {
                debug!("No GPU adapter found");
                return GpuInitResult::NoGpuFound;
            };

            let adapter_info = adapter.get_info();
            let adapter_name = adapter_info.name.clone();

            // Device creation can fail even with a valid adapter
            match pollster::block_on(adapter.request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("ShipSim GPU"),
                    required_features: wgpu::Features::empty(),
                    required_limits: adapter.limits(),
                    memory_hints: wgpu::MemoryHints::Performance,
                },
                None,
            )) {
                Ok((device, queue)) => {
                    info!("GPU context initialized successfully: {}", adapter_name);
                    GpuInitResult::Success(Self {
                        device,
                        queue,
                        adapter_info,
                    })
                }
                Err(e) => {
                    debug!("Failed to create GPU device: {}", e);
                    GpuInitResult::InitFailed {
                        adapter_name,
                        error: e.to_string(),
                    }
                }
            }
        }

        /// Adapter name for logging
        #[must_use]
        pub fn adapter_name(&self) -> &str {
            &self.adapter_info.name
        }

        /// Check if the device can hold the matrices of an `n`-point surface
        ///
        /// Two dense `n × n` f32 matrices are stored; each must fit in a single
        /// storage binding and the assembly dispatch must fit the workgroup limits.
        #[must_use]
        pub fn can_allocate(&self, n: usize) -> bool {
            let limits = self.device.limits();
            let matrix_bytes = (n as u64) * (n as u64) * 4;
            let groups = (n as u64).div_ceil(8);

            matrix_bytes > 0
                && matrix_bytes <= u64::from(limits.max_storage_buffer_binding_size)
                && matrix_bytes <= limits.max_buffer_size
                && groups <= u64::from(limits.max_compute_workgroups_per_dimension)
        }

        /// Get reference to wgpu device
        #[must_use]
        pub fn device(&self) -> &wgpu::Device {
            &self.device
        }

        /// Get reference to wgpu queue
        #[must_use]
        pub fn queue(&self) -> &wgpu::Queue {
            &self.queue
        }
    }
}

#[cfg(feature = "gpu")]
pub use gpu_impl::GpuContext;

/// Device association for one run
///
/// Created only when a device is actually in use; a host-only run has no
/// context at all.
#[derive(Debug, Clone)]
pub struct ComputeContext {
    #[cfg(feature = "gpu")]
    gpu: Arc<GpuContext>,
    #[cfg(not(feature = "gpu"))]
    never: std::convert::Infallible,
}

#[cfg(feature = "gpu")]
impl ComputeContext {
    /// Name of the adapter backing this context
    #[must_use]
    pub fn adapter_name(&self) -> &str {
        self.gpu.adapter_name()
    }

    /// Whether the device can hold the system of an `n`-point surface
    #[must_use]
    pub fn can_allocate(&self, n: usize) -> bool {
        self.gpu.can_allocate(n)
    }

    /// Shared GPU context
    #[must_use]
    pub fn gpu(&self) -> &Arc<GpuContext> {
        &self.gpu
    }
}

#[cfg(not(feature = "gpu"))]
impl ComputeContext {
    /// Name of the adapter backing this context
    #[must_use]
    pub fn adapter_name(&self) -> &str {
        match self.never {}
    }

    /// Whether the device can hold the system of an `n`-point surface
    #[must_use]
    pub fn can_allocate(&self, _n: usize) -> bool {
        match self.never {}
    }
}

/// Create the compute context for a run
///
/// # Returns
///
/// `None` for a host-only run, otherwise the acquired device context
///
/// # Errors
///
/// Returns [`SimulationError::DeviceAcquisition`] when an explicitly requested
/// GPU cannot be acquired (always the case without the `gpu` feature).
pub fn create_context(device: &ComputeDevice) -> Result<Option<ComputeContext>, SimulationError> {
    match device {
        ComputeDevice::Host => {
            info!("Host compute selected, no device context created");
            Ok(None)
        }
        ComputeDevice::Gpu(selector) => acquire(selector).map(Some),
        ComputeDevice::Auto => match acquire(&DeviceSelector::default()) {
            Ok(context) => Ok(Some(context)),
            Err(SimulationError::DeviceAcquisition {
                adapter: Some(adapter),
                reason,
            }) => {
                warn!(
                    "GPU '{}' found but initialization failed: {}, falling back to host",
                    adapter, reason
                );
                Ok(None)
            }
            Err(e) => {
                info!("No GPU available ({}), using host compute", e);
                Ok(None)
            }
        },
    }
}

#[cfg(feature = "gpu")]
fn acquire(selector: &DeviceSelector) -> Result<ComputeContext, SimulationError> {
    GpuContext::new(selector).into_context()
}

#[cfg(not(feature = "gpu"))]
fn acquire(_selector: &DeviceSelector) -> Result<ComputeContext, SimulationError> {
    GpuInitResult::InitFailed {
        adapter_name: "none".to_string(),
        error: "built without the `gpu` feature".to_string(),
    }
    .into_context()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_creates_no_context() {
        assert!(create_context(&ComputeDevice::Host).unwrap().is_none());
    }

    #[test]
    fn test_auto_never_fails() {
        // Depends on hardware; either outcome is fine as long as it is not an error
        if let Some(context) = create_context(&ComputeDevice::Auto).unwrap() {
            assert!(!context.adapter_name().is_empty());
            assert!(context.can_allocate(16));
        }
    }

    #[test]
    fn test_missing_adapter_is_an_error() {
        let selector = DeviceSelector {
            adapter_name: Some("no-such-adapter-0000".to_string()),
            ..DeviceSelector::default()
        };
        let err = create_context(&ComputeDevice::Gpu(selector)).unwrap_err();
        assert!(matches!(err, SimulationError::DeviceAcquisition { .. }));
        assert!(err.is_pre_loop());
    }

    #[cfg(feature = "gpu")]
    #[test]
    fn test_can_allocate() {
        if let GpuInitResult::Success(ctx) = GpuContext::new(&DeviceSelector::default()) {
            assert!(ctx.can_allocate(256));
            // 2^20 points would need a 4 TiB matrix
            assert!(!ctx.can_allocate(1 << 20));
        }
    }
}
