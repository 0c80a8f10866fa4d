//! Public Descriptor Types
//!
//! Plain-data structs and enums used across the API surface, together with
//! their translations to native Vulkan enums. The translations are thin and
//! total; anything with actual behavior lives elsewhere.

use ash::vk;
use bitflags::bitflags;

/// A raw 64-bit GPU virtual address, usable directly inside shader code and
/// copy commands, independent of any host-side mapping.
///
/// A value of `0` is the sentinel for "no address" and is never produced by
/// a successful allocation.
pub type DeviceAddress = u64;

/// Either view of an allocation, accepted by [`DeviceContext::free`] and the
/// containment lookup.
///
/// [`DeviceContext::free`]: crate::DeviceContext::free
#[derive(Debug, Clone, Copy)]
pub enum PtrOrAddress {
    /// A CPU-addressable pointer into host-mapped memory.
    Host(*const u8),
    /// A raw GPU virtual address.
    Device(DeviceAddress),
}

impl From<*const u8> for PtrOrAddress {
    fn from(ptr: *const u8) -> Self {
        Self::Host(ptr)
    }
}

impl From<*mut u8> for PtrOrAddress {
    fn from(ptr: *mut u8) -> Self {
        Self::Host(ptr)
    }
}

impl From<DeviceAddress> for PtrOrAddress {
    fn from(address: DeviceAddress) -> Self {
        Self::Device(address)
    }
}

/// Memory class requested at allocation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryClass {
    /// Host-visible, and device-local when the hardware offers such a heap.
    /// The workhorse class: mapped pointer plus device address.
    General,
    /// Device-local only; no host mapping. The returned allocation exposes
    /// just the device address.
    DeviceOnly,
    /// Host-visible and host-cached, for reading GPU results back on the CPU.
    Readback,
}

/// Texture formats understood by the interface.
///
/// Deliberately small; extend as consumers need more.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    Rgba8Unorm,
    Bgra8Srgb,
    D32Float,
    Rg11b10Float,
    Rgb10a2Unorm,
    Rgb32Float,
}

impl Format {
    pub(crate) fn to_vk(self) -> vk::Format {
        match self {
            Self::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
            Self::Bgra8Srgb => vk::Format::B8G8R8A8_SRGB,
            Self::D32Float => vk::Format::D32_SFLOAT,
            Self::Rg11b10Float => vk::Format::B10G11R11_UFLOAT_PACK32,
            Self::Rgb10a2Unorm => vk::Format::A2B10G10R10_UNORM_PACK32,
            Self::Rgb32Float => vk::Format::R32G32B32_SFLOAT,
        }
    }

    /// `true` for depth formats, which select the depth aspect on copies
    /// and attachments.
    #[must_use]
    pub fn is_depth(self) -> bool {
        matches!(self, Self::D32Float)
    }
}

/// Texture dimensionality.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureKind {
    D1,
    D2,
    D3,
}

impl TextureKind {
    pub(crate) fn to_vk_image_type(self) -> vk::ImageType {
        match self {
            Self::D1 => vk::ImageType::TYPE_1D,
            Self::D2 => vk::ImageType::TYPE_2D,
            Self::D3 => vk::ImageType::TYPE_3D,
        }
    }

    pub(crate) fn to_vk_view_type(self) -> vk::ImageViewType {
        match self {
            Self::D1 => vk::ImageViewType::TYPE_1D,
            Self::D2 => vk::ImageViewType::TYPE_2D,
            Self::D3 => vk::ImageViewType::TYPE_3D,
        }
    }
}

bitflags! {
    /// How a texture will be used. Maps one-to-one onto native image usage.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TextureUsage: u32 {
        const SAMPLED = 1 << 0;
        const STORAGE = 1 << 1;
        const COLOR_ATTACHMENT = 1 << 2;
        const DEPTH_STENCIL_ATTACHMENT = 1 << 3;
        const TRANSFER_SRC = 1 << 4;
        const TRANSFER_DST = 1 << 5;
    }
}

impl TextureUsage {
    pub(crate) fn to_vk(self) -> vk::ImageUsageFlags {
        let mut usage = vk::ImageUsageFlags::empty();
        if self.contains(Self::SAMPLED) {
            usage |= vk::ImageUsageFlags::SAMPLED;
        }
        if self.contains(Self::STORAGE) {
            usage |= vk::ImageUsageFlags::STORAGE;
        }
        if self.contains(Self::COLOR_ATTACHMENT) {
            usage |= vk::ImageUsageFlags::COLOR_ATTACHMENT;
        }
        if self.contains(Self::DEPTH_STENCIL_ATTACHMENT) {
            usage |= vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT;
        }
        if self.contains(Self::TRANSFER_SRC) {
            usage |= vk::ImageUsageFlags::TRANSFER_SRC;
        }
        if self.contains(Self::TRANSFER_DST) {
            usage |= vk::ImageUsageFlags::TRANSFER_DST;
        }
        usage
    }
}

/// Description of a texture to create against caller-allocated memory.
#[derive(Debug, Clone, Copy)]
pub struct TextureDesc {
    pub kind: TextureKind,
    pub format: Format,
    /// Width, height, depth. Unused axes are 1.
    pub extent: [u32; 3],
    pub mip_count: u32,
    pub layer_count: u32,
    pub sample_count: u32,
    pub usage: TextureUsage,
}

impl Default for TextureDesc {
    fn default() -> Self {
        Self {
            kind: TextureKind::D2,
            format: Format::Rgba8Unorm,
            extent: [1, 1, 1],
            mip_count: 1,
            layer_count: 1,
            sample_count: 1,
            usage: TextureUsage::SAMPLED,
        }
    }
}

/// Pipeline stage, for barrier scoping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Transfer,
    Compute,
    RasterColorOut,
    PixelShader,
    VertexShader,
}

impl Stage {
    pub(crate) fn to_vk(self) -> vk::PipelineStageFlags {
        match self {
            Self::Transfer => vk::PipelineStageFlags::TRANSFER,
            Self::Compute => vk::PipelineStageFlags::COMPUTE_SHADER,
            Self::RasterColorOut => vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            Self::PixelShader => vk::PipelineStageFlags::FRAGMENT_SHADER,
            Self::VertexShader => vk::PipelineStageFlags::VERTEX_SHADER,
        }
    }
}

bitflags! {
    /// Hazard classes a barrier must cover, in addition to execution ordering.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Hazard: u32 {
        /// Shader-written memory consumed as indirect draw/dispatch arguments.
        const DRAW_ARGUMENTS = 1 << 0;
        /// Memory writes consumed through the bindless descriptor heap.
        const DESCRIPTORS = 1 << 1;
    }
}

/// Primitive topology for raster pipelines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Topology {
    #[default]
    TriangleList,
    TriangleStrip,
}

impl Topology {
    pub(crate) fn to_vk(self) -> vk::PrimitiveTopology {
        match self {
            Self::TriangleList => vk::PrimitiveTopology::TRIANGLE_LIST,
            Self::TriangleStrip => vk::PrimitiveTopology::TRIANGLE_STRIP,
        }
    }
}

/// Face culling mode for raster pipelines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CullMode {
    #[default]
    None,
    /// Cull back faces; clockwise triangles are front-facing.
    ClockwiseFront,
    /// Cull back faces; counter-clockwise triangles are front-facing.
    CounterClockwiseFront,
}

/// Fixed state for a raster pipeline.
///
/// Only formats, topology, and rasterizer basics; blend and depth-stencil
/// state objects are outside this interface.
#[derive(Debug, Clone)]
pub struct RasterDesc {
    /// Formats of the color targets the pipeline renders into.
    pub color_formats: Vec<Format>,
    pub topology: Topology,
    pub cull: CullMode,
    pub sample_count: u32,
    pub alpha_to_coverage: bool,
}

impl Default for RasterDesc {
    fn default() -> Self {
        Self {
            color_formats: vec![Format::Rgba8Unorm],
            topology: Topology::default(),
            cull: CullMode::default(),
            sample_count: 1,
            alpha_to_coverage: false,
        }
    }
}

/// Opaque descriptor blob for one bindless heap entry.
///
/// The encoding and length are device-specific; callers copy the bytes into
/// a heap allocation at `index * descriptor_stride` and index the heap from
/// shader code.
#[derive(Debug, Clone, Copy)]
pub struct TextureDescriptor {
    bytes: [u8; Self::MAX_SIZE],
    len: usize,
}

impl TextureDescriptor {
    /// Upper bound on descriptor size across known implementations.
    pub const MAX_SIZE: usize = 256;

    pub(crate) fn new(len: usize) -> Self {
        debug_assert!(len <= Self::MAX_SIZE);
        Self {
            bytes: [0; Self::MAX_SIZE],
            len,
        }
    }

    pub(crate) fn buf_mut(&mut self) -> &mut [u8] {
        let len = self.len;
        &mut self.bytes[..len]
    }

    /// The device-specific descriptor bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }
}
