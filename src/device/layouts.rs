//! Fixed Pipeline Layouts
//!
//! One pipeline layout per bind point, shared by every pipeline the context
//! creates. Three bindless descriptor-set layouts — sampled textures,
//! storage textures, samplers — each a single runtime array binding indexed
//! from shader code. Per-draw and per-dispatch data travels as raw device
//! addresses in push constants, so no other layouts ever exist.

use ash::{ext, vk};

use crate::errors::Result;
use crate::types::DeviceAddress;

/// Push-constant space for raster pipelines: vertex data address, pixel
/// data address, and one spare slot for indirect multi-draw strides.
pub(crate) const GRAPHICS_PUSH_SIZE: u32 = (size_of::<DeviceAddress>() * 3) as u32;
/// Compute pipelines receive a single dispatch-arguments address.
pub(crate) const COMPUTE_PUSH_SIZE: u32 = size_of::<DeviceAddress>() as u32;

pub(crate) const GRAPHICS_PUSH_STAGES: vk::ShaderStageFlags =
    vk::ShaderStageFlags::from_raw(
        vk::ShaderStageFlags::VERTEX.as_raw() | vk::ShaderStageFlags::FRAGMENT.as_raw(),
    );

pub(crate) struct FixedLayouts {
    pub texture_set: vk::DescriptorSetLayout,
    pub rw_texture_set: vk::DescriptorSetLayout,
    pub sampler_set: vk::DescriptorSetLayout,
    pub graphics: vk::PipelineLayout,
    pub compute: vk::PipelineLayout,
    /// Byte size of one sampler-heap descriptor set, for the lazily created
    /// sampler heap allocation.
    pub sampler_set_size: u64,
}

impl FixedLayouts {
    pub fn new(
        device: &ash::Device,
        descriptor_ext: &ext::descriptor_buffer::Device,
        descriptor_capacity: u32,
    ) -> Result<Self> {
        let texture_set = create_heap_layout(
            device,
            vk::DescriptorType::SAMPLED_IMAGE,
            descriptor_capacity,
        )?;
        let rw_texture_set = create_heap_layout(
            device,
            vk::DescriptorType::STORAGE_IMAGE,
            descriptor_capacity,
        )?;
        let sampler_set =
            create_heap_layout(device, vk::DescriptorType::SAMPLER, descriptor_capacity)?;

        let sampler_set_size =
            unsafe { descriptor_ext.get_descriptor_set_layout_size(sampler_set) };

        let sets = [texture_set, rw_texture_set, sampler_set];

        let graphics_push = [vk::PushConstantRange::default()
            .stage_flags(GRAPHICS_PUSH_STAGES)
            .offset(0)
            .size(GRAPHICS_PUSH_SIZE)];
        let graphics_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(&sets)
            .push_constant_ranges(&graphics_push);
        let graphics = unsafe { device.create_pipeline_layout(&graphics_info, None) }?;

        let compute_push = [vk::PushConstantRange::default()
            .stage_flags(vk::ShaderStageFlags::COMPUTE)
            .offset(0)
            .size(COMPUTE_PUSH_SIZE)];
        let compute_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(&sets)
            .push_constant_ranges(&compute_push);
        let compute = unsafe { device.create_pipeline_layout(&compute_info, None) }?;

        Ok(Self {
            texture_set,
            rw_texture_set,
            sampler_set,
            graphics,
            compute,
            sampler_set_size,
        })
    }

    /// The layout pipelines of `bind_point` were built against.
    pub fn for_bind_point(&self, bind_point: vk::PipelineBindPoint) -> vk::PipelineLayout {
        if bind_point == vk::PipelineBindPoint::COMPUTE {
            self.compute
        } else {
            self.graphics
        }
    }

    pub unsafe fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_pipeline_layout(self.graphics, None);
            device.destroy_pipeline_layout(self.compute, None);
            device.destroy_descriptor_set_layout(self.texture_set, None);
            device.destroy_descriptor_set_layout(self.rw_texture_set, None);
            device.destroy_descriptor_set_layout(self.sampler_set, None);
        }
    }
}

fn create_heap_layout(
    device: &ash::Device,
    ty: vk::DescriptorType,
    count: u32,
) -> Result<vk::DescriptorSetLayout> {
    let bindings = [vk::DescriptorSetLayoutBinding::default()
        .binding(0)
        .descriptor_type(ty)
        .descriptor_count(count)
        .stage_flags(vk::ShaderStageFlags::ALL)];

    let info = vk::DescriptorSetLayoutCreateInfo::default()
        .flags(vk::DescriptorSetLayoutCreateFlags::DESCRIPTOR_BUFFER_EXT)
        .bindings(&bindings);

    Ok(unsafe { device.create_descriptor_set_layout(&info, None) }?)
}
