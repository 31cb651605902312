// gpu/device.rs — wgpu device abstraction.
//
// Responsibilities:
//   - Enumerate Vulkan adapters and select the first non-CPU one.
//   - Hold the device, queue, and the limits every allocation is
//     validated against (texture dimension checks in the pool).
//   - Provide `WorkgroupSize` and the dispatch math shared by every
//     compute pass.
//
// ADAPTER SELECTION:
// wgpu's default `request_adapter` uses power preference heuristics that
// may grab llvmpipe/softpipe on WSL2 (where the software renderer appears
// as a valid Vulkan device). We enumerate explicitly and prefer real
// hardware, falling back to whatever exists as a last resort.
//
// WORKGROUP SIZES:
// naga does not support `override` expressions inside @workgroup_size(),
// so the workgroup dimensions are baked into the WGSL source via the
// {{WG_X}}/{{WG_Y}} placeholder tokens before compilation (see
// gpu/program.rs).

use std::fmt;

use log::info;

/// A workgroup size configuration for 2-D compute dispatches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkgroupSize {
    pub x: u32,
    pub y: u32,
}

impl WorkgroupSize {
    /// Total invocations per workgroup (x * y).
    pub fn total(&self) -> u32 {
        self.x * self.y
    }
}

impl fmt::Display for WorkgroupSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}×{} ({} invocations)", self.x, self.y, self.total())
    }
}

/// Default workgroup: 16×8 = 128 invocations. Aligns with NVIDIA's
/// 32-wide warps (4 warps) and AMD's 64-wide wavefronts (2 waves); the
/// 16-wide x dimension matches cache lines for row-major texture data.
const DEFAULT_WORKGROUP: WorkgroupSize = WorkgroupSize { x: 16, y: 8 };

/// Cached adapter information for logging and debugging.
#[derive(Debug, Clone)]
pub struct AdapterInfo {
    pub name: String,
    pub device_type: wgpu::DeviceType,
    pub backend: wgpu::Backend,
}

impl fmt::Display for AdapterInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:?}, {:?})", self.name, self.backend, self.device_type)
    }
}

/// The core GPU context: adapter, device, queue, limits.
///
/// Expensive to create (Vulkan instance + device initialization); hold
/// one for the lifetime of the application and share it by `Arc`.
///
/// # Field drop order
/// Rust drops struct fields in declaration order. `_instance` is
/// declared last so the `wgpu::Instance` outlives `device` and `queue`;
/// dzn (the D3D12-to-Vulkan layer on WSL2) crashes if the Vulkan
/// instance dies while device-level objects still reference it.
pub struct GpuDevice {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub adapter_info: AdapterInfo,
    pub workgroup_size: WorkgroupSize,
    limits: wgpu::Limits,
    _instance: wgpu::Instance,
}

impl GpuDevice {
    /// Create a `GpuDevice` using the first non-CPU Vulkan adapter found.
    ///
    /// # Errors
    /// Returns `Err` if no adapter is found or the device request fails.
    pub fn new() -> Result<Self, GpuError> {
        pollster::block_on(Self::init_async())
    }

    async fn init_async() -> Result<Self, GpuError> {
        // Vulkan only. ALLOW_UNDERLYING_NONCOMPLIANT_ADAPTER lets wgpu
        // enumerate dzn on WSL2 instead of leaving only llvmpipe.
        let flags = if cfg!(debug_assertions) {
            wgpu::InstanceFlags::VALIDATION
                | wgpu::InstanceFlags::ALLOW_UNDERLYING_NONCOMPLIANT_ADAPTER
        } else {
            wgpu::InstanceFlags::ALLOW_UNDERLYING_NONCOMPLIANT_ADAPTER
        };

        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::VULKAN,
            flags,
            ..Default::default()
        });

        let all_adapters: Vec<wgpu::Adapter> = instance
            .enumerate_adapters(wgpu::Backends::VULKAN)
            .into_iter()
            .collect();
        if all_adapters.is_empty() {
            return Err(GpuError::NoSuitableAdapter);
        }
        for a in &all_adapters {
            let i = a.get_info();
            info!("Vulkan adapter: {} ({:?}, {:?})", i.name, i.backend, i.device_type);
        }

        // Tier 1: real hardware (or dzn/VM pass-through, which report as
        // Other/VirtualGpu). Tier 2: anything, even software — logged so
        // the user knows what they got.
        let adapter = all_adapters
            .into_iter()
            .find(|a| {
                matches!(
                    a.get_info().device_type,
                    wgpu::DeviceType::DiscreteGpu
                        | wgpu::DeviceType::IntegratedGpu
                        | wgpu::DeviceType::VirtualGpu
                        | wgpu::DeviceType::Other
                )
            })
            .or_else(|| {
                instance
                    .enumerate_adapters(wgpu::Backends::VULKAN)
                    .into_iter()
                    .next()
            })
            .ok_or(GpuError::NoSuitableAdapter)?;

        let raw_info = adapter.get_info();
        let adapter_info = AdapterInfo {
            name: raw_info.name.clone(),
            device_type: raw_info.device_type,
            backend: raw_info.backend,
        };

        let limits = wgpu::Limits::default();
        let (device, queue): (wgpu::Device, wgpu::Queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("keypack"),
                    required_features: wgpu::Features::empty(),
                    required_limits: limits.clone(),
                    memory_hints: wgpu::MemoryHints::default(),
                },
                None,
            )
            .await
            .map_err(GpuError::DeviceRequest)?;

        info!("selected adapter: {adapter_info}");

        Ok(GpuDevice {
            device,
            queue,
            adapter_info,
            workgroup_size: DEFAULT_WORKGROUP,
            limits,
            _instance: instance,
        })
    }

    /// Override the default workgroup size.
    ///
    /// Returns `Err` if the total invocation count exceeds the device's
    /// `max_compute_invocations_per_workgroup`.
    pub fn set_workgroup_size(&mut self, x: u32, y: u32) -> Result<(), GpuError> {
        let total = x * y;
        let max = self.limits.max_compute_invocations_per_workgroup;
        if total > max {
            return Err(GpuError::WorkgroupTooLarge { total, max });
        }
        self.workgroup_size = WorkgroupSize { x, y };
        Ok(())
    }

    /// Largest side length a 2-D texture may have on this device.
    pub fn max_texture_dimension(&self) -> u32 {
        self.limits.max_texture_dimension_2d
    }

    /// Workgroup counts needed to cover a `w`×`h` output with the active
    /// workgroup size. Ceiling division: shaders must guard against
    /// out-of-bounds global IDs.
    pub fn dispatch_size(&self, w: u32, h: u32) -> (u32, u32) {
        let dx = w.div_ceil(self.workgroup_size.x);
        let dy = h.div_ceil(self.workgroup_size.y);
        (dx, dy)
    }
}

impl fmt::Display for GpuDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "GpuDevice {{ adapter: {}, workgroup: {} }}",
            self.adapter_info, self.workgroup_size
        )
    }
}

// ============================================================
// Error type
// ============================================================

/// Errors from GPU device initialization and resource management.
#[derive(Debug)]
pub enum GpuError {
    /// No Vulkan adapter found. On WSL2: check that `vulkaninfo` shows
    /// a real GPU and not only llvmpipe.
    NoSuitableAdapter,
    /// wgpu device request failed (driver issue, unsupported limits).
    DeviceRequest(wgpu::RequestDeviceError),
    /// Requested workgroup size exceeds the device's invocation limit.
    WorkgroupTooLarge { total: u32, max: u32 },
    /// Requested texture dimensions exceed the device limit. Fatal:
    /// the caller must reduce capacity/resolution, the pool never
    /// silently clamps.
    TextureTooLarge { width: u32, height: u32, max: u32 },
    /// A buffer map for readback failed.
    Readback(String),
    /// The readback was cancelled before the buffer was mapped.
    ReadbackCancelled,
}

impl fmt::Display for GpuError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GpuError::NoSuitableAdapter => write!(
                f,
                "no suitable Vulkan adapter found (only CPU/software renderers visible)"
            ),
            GpuError::DeviceRequest(e) => write!(f, "device request failed: {e}"),
            GpuError::WorkgroupTooLarge { total, max } => write!(
                f,
                "workgroup size {total} exceeds device limit of {max} invocations"
            ),
            GpuError::TextureTooLarge { width, height, max } => write!(
                f,
                "texture {width}×{height} exceeds the device's 2-D texture limit of {max}"
            ),
            GpuError::Readback(msg) => write!(f, "readback failed: {msg}"),
            GpuError::ReadbackCancelled => write!(f, "readback was cancelled"),
        }
    }
}

impl std::error::Error for GpuError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            GpuError::DeviceRequest(e) => Some(e),
            _ => None,
        }
    }
}

// ============================================================
// Tests
// ============================================================
