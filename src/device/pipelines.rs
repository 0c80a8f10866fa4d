//! Pipelines
//!
//! Thin translation from SPIR-V blobs to native pipelines against the fixed
//! global layouts. Shader compilation happens elsewhere; this layer accepts
//! finished IR only.

use ash::vk;

use crate::errors::{GpuError, Result};
use crate::handles::PipelineKey;
use crate::types::{CullMode, RasterDesc};

use super::{DeviceContext, PipelineSlot};

impl DeviceContext {
    /// Creates a compute pipeline from a SPIR-V blob.
    pub fn create_compute_pipeline(&mut self, compute_ir: &[u8]) -> Result<PipelineKey> {
        let words = spirv_words(compute_ir)?;
        let module_info = vk::ShaderModuleCreateInfo::default().code(&words);
        let module = unsafe { self.device.create_shader_module(&module_info, None) }?;

        let stage = vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(module)
            .name(c"main");

        let info = vk::ComputePipelineCreateInfo::default()
            .flags(vk::PipelineCreateFlags::DESCRIPTOR_BUFFER_EXT)
            .stage(stage)
            .layout(self.layouts.compute);

        let result = unsafe {
            self.device
                .create_compute_pipelines(vk::PipelineCache::null(), &[info], None)
        };
        unsafe { self.device.destroy_shader_module(module, None) };

        let pipeline = match result {
            Ok(pipelines) => pipelines[0],
            Err((_, e)) => return Err(e.into()),
        };

        Ok(self.pipelines.insert(PipelineSlot {
            pipeline,
            bind_point: vk::PipelineBindPoint::COMPUTE,
        }))
    }

    /// Creates a raster pipeline from vertex and pixel SPIR-V blobs.
    ///
    /// Vertex data is pulled through device addresses in push constants, so
    /// there is no vertex input state. Rendering is dynamic (no render-pass
    /// objects); the attachment formats come from `desc`. Blend and
    /// depth-stencil state are fixed at pass-through.
    pub fn create_raster_pipeline(
        &mut self,
        vertex_ir: &[u8],
        pixel_ir: &[u8],
        desc: &RasterDesc,
    ) -> Result<PipelineKey> {
        let vertex_words = spirv_words(vertex_ir)?;
        let pixel_words = spirv_words(pixel_ir)?;

        let vertex_info = vk::ShaderModuleCreateInfo::default().code(&vertex_words);
        let vertex_module = unsafe { self.device.create_shader_module(&vertex_info, None) }?;
        let pixel_info = vk::ShaderModuleCreateInfo::default().code(&pixel_words);
        let pixel_module = match unsafe { self.device.create_shader_module(&pixel_info, None) } {
            Ok(module) => module,
            Err(e) => {
                unsafe { self.device.destroy_shader_module(vertex_module, None) };
                return Err(e.into());
            }
        };

        let stages = [
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(vertex_module)
                .name(c"main"),
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(pixel_module)
                .name(c"main"),
        ];

        let color_formats: Vec<vk::Format> =
            desc.color_formats.iter().map(|f| f.to_vk()).collect();
        let mut rendering_info =
            vk::PipelineRenderingCreateInfo::default().color_attachment_formats(&color_formats);

        let blend_attachments: Vec<vk::PipelineColorBlendAttachmentState> = desc
            .color_formats
            .iter()
            .map(|_| {
                vk::PipelineColorBlendAttachmentState::default()
                    .blend_enable(false)
                    .src_color_blend_factor(vk::BlendFactor::ONE)
                    .dst_color_blend_factor(vk::BlendFactor::ZERO)
                    .color_blend_op(vk::BlendOp::ADD)
                    .src_alpha_blend_factor(vk::BlendFactor::ONE)
                    .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
                    .alpha_blend_op(vk::BlendOp::ADD)
                    .color_write_mask(vk::ColorComponentFlags::RGBA)
            })
            .collect();
        let blend_state =
            vk::PipelineColorBlendStateCreateInfo::default().attachments(&blend_attachments);

        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default();
        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(desc.topology.to_vk());

        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);

        let multisample_state = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(vk::SampleCountFlags::from_raw(desc.sample_count))
            .alpha_to_coverage_enable(desc.alpha_to_coverage);

        let rasterization_state = vk::PipelineRasterizationStateCreateInfo::default()
            .polygon_mode(vk::PolygonMode::FILL)
            .cull_mode(if desc.cull == CullMode::None {
                vk::CullModeFlags::NONE
            } else {
                vk::CullModeFlags::BACK
            })
            .front_face(if desc.cull == CullMode::ClockwiseFront {
                vk::FrontFace::CLOCKWISE
            } else {
                vk::FrontFace::COUNTER_CLOCKWISE
            })
            .line_width(1.0);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let info = vk::GraphicsPipelineCreateInfo::default()
            .flags(vk::PipelineCreateFlags::DESCRIPTOR_BUFFER_EXT)
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization_state)
            .multisample_state(&multisample_state)
            .color_blend_state(&blend_state)
            .dynamic_state(&dynamic_state)
            .layout(self.layouts.graphics)
            .push_next(&mut rendering_info);

        let result = unsafe {
            self.device
                .create_graphics_pipelines(vk::PipelineCache::null(), &[info], None)
        };
        unsafe {
            self.device.destroy_shader_module(vertex_module, None);
            self.device.destroy_shader_module(pixel_module, None);
        }

        let pipeline = match result {
            Ok(pipelines) => pipelines[0],
            Err((_, e)) => return Err(e.into()),
        };

        Ok(self.pipelines.insert(PipelineSlot {
            pipeline,
            bind_point: vk::PipelineBindPoint::GRAPHICS,
        }))
    }

    /// Destroys a pipeline; its key goes stale.
    ///
    /// Precondition: no submitted batch still executing it (wait first).
    pub fn destroy_pipeline(&mut self, pipeline: PipelineKey) -> Result<()> {
        let slot = self
            .pipelines
            .remove(pipeline)
            .ok_or(GpuError::StaleHandle { kind: "pipeline" })?;
        unsafe { self.device.destroy_pipeline(slot.pipeline, None) };
        Ok(())
    }
}

/// SPIR-V arrives as bytes; the native API wants aligned words.
fn spirv_words(bytes: &[u8]) -> Result<Vec<u32>> {
    if bytes.is_empty() || bytes.len() % 4 != 0 {
        return Err(GpuError::InvalidShader("length is not a multiple of 4"));
    }
    let words: Vec<u32> = bytes
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    if words[0] != 0x0723_0203 {
        return Err(GpuError::InvalidShader("missing SPIR-V magic number"));
    }
    Ok(words)
}
