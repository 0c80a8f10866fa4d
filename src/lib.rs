//! # vanta
//!
//! A minimal cross-vendor GPU programming interface layered directly over
//! raw Vulkan. Allocate GPU-visible memory, build pipelines, record
//! commands, and submit work without touching the verbose native API.
//!
//! The load-bearing piece is the unified CPU/GPU address space: every
//! allocation is simultaneously a host pointer and a raw GPU virtual
//! address, two congruent views of the same bytes, and either view resolves
//! back to the owning allocation. Submission is tracked against timeline
//! semaphores, and per-submission resources are reclaimed only once the GPU
//! has provably moved past them.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use vanta::{DeviceConfig, DeviceContext, MemoryClass};
//!
//! let mut gpu = DeviceContext::new(&DeviceConfig::default())?;
//!
//! // One block, two views.
//! let staging = gpu.allocate(4096, 256, MemoryClass::General)?;
//! let scratch = gpu.allocate(4096, 256, MemoryClass::DeviceOnly)?;
//!
//! let timeline = gpu.create_timeline(0)?;
//! let queue = gpu.default_queue();
//!
//! let cb = gpu.begin_commands(queue)?;
//! gpu.cmd_copy(cb, scratch.device_address(), staging.device_address(), 4096)?;
//! gpu.submit(queue, &[cb], timeline, 1)?;
//! gpu.wait(timeline, 1, None)?;
//!
//! gpu.free(staging.device_address());
//! gpu.free(scratch.device_address());
//! ```
//!
//! # Scope
//!
//! In-process API only; no persisted state, no wire formats. Window
//! surfaces, swapchains, and shader compilation live outside this crate.

pub mod device;
pub mod errors;
pub mod handles;
pub mod memory;
pub mod settings;
pub mod types;

mod sync;

pub use device::DeviceContext;
pub use errors::{GpuError, Result};
pub use handles::{CommandBufferKey, PipelineKey, QueueKey, SemaphoreKey, TextureKey};
pub use memory::Allocation;
pub use settings::DeviceConfig;
pub use types::{
    CullMode, DeviceAddress, Format, Hazard, MemoryClass, PtrOrAddress, RasterDesc, Stage,
    TextureDesc, TextureDescriptor, TextureKind, TextureUsage, Topology,
};
