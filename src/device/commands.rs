//! Command Recording & Submission
//!
//! Command buffers come from the shared pool, record through address-based
//! arguments resolved against the live-allocation registry, and leave the
//! arena at submission. From that point the reclaim queue owns them: the
//! native handles return to the pool only after a wait has observed their
//! batch's timeline value.

use ash::vk;

use crate::errors::{GpuError, Result};
use crate::handles::{CommandBufferKey, PipelineKey, QueueKey, SemaphoreKey, TextureKey};
use crate::sync::CommandBufferBatch;
use crate::types::{DeviceAddress, Hazard, Stage, TextureUsage};

use super::layouts::GRAPHICS_PUSH_STAGES;
use super::{DeviceContext, RecordingSlot};

impl DeviceContext {
    // ========================================================================
    // Recording lifecycle
    // ========================================================================

    /// Allocates a command buffer from the pool and puts it in the
    /// recording state (one-time submit).
    pub fn begin_commands(&mut self, queue: QueueKey) -> Result<CommandBufferKey> {
        self.queue_handle(queue)?;

        let cb = {
            let pool = self.command_pool.lock();
            let alloc_info = vk::CommandBufferAllocateInfo::default()
                .command_pool(*pool)
                .level(vk::CommandBufferLevel::PRIMARY)
                .command_buffer_count(1);
            let buffers = unsafe { self.device.allocate_command_buffers(&alloc_info) }?;
            buffers[0]
        };

        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { self.device.begin_command_buffer(cb, &begin_info) }?;

        Ok(self.recordings.insert(RecordingSlot { cb, bound: None }))
    }

    /// Ends the given command buffers and submits them as one batch that
    /// signals `semaphore` to `value` on completion.
    ///
    /// The batch is tracked for reclamation and the command-buffer keys are
    /// retired — using them after this call fails with a stale-handle
    /// error. `value` must be strictly greater than any value previously
    /// signaled on `semaphore`, and values should be dense (1, 2, 3, …) so
    /// the reclamation walk stays cheap; neither is enforced here.
    pub fn submit(
        &mut self,
        queue: QueueKey,
        command_buffers: &[CommandBufferKey],
        semaphore: SemaphoreKey,
        value: u64,
    ) -> Result<()> {
        let queue = self.queue_handle(queue)?;
        let vk_semaphore = self.semaphore_handle(semaphore)?;

        let mut batch = CommandBufferBatch::new();
        for &key in command_buffers {
            batch.push(self.recording(key)?.cb);
        }
        for &cb in &batch {
            unsafe { self.device.end_command_buffer(cb) }?;
        }

        let signal_values = [value];
        let mut timeline_info =
            vk::TimelineSemaphoreSubmitInfo::default().signal_semaphore_values(&signal_values);
        let signal_semaphores = [vk_semaphore];
        let submit_info = vk::SubmitInfo::default()
            .command_buffers(&batch)
            .signal_semaphores(&signal_semaphores)
            .push_next(&mut timeline_info);

        unsafe { self.device.queue_submit(queue, &[submit_info], vk::Fence::null()) }?;

        for &key in command_buffers {
            self.recordings.remove(key);
        }
        self.reclaim.lock().record(semaphore, value, batch);

        log::trace!(
            "Submitted {} command buffer(s) signaling value {value}",
            command_buffers.len()
        );
        Ok(())
    }

    // ========================================================================
    // Transfer commands
    // ========================================================================

    /// Records a copy of `size` bytes between two device addresses.
    ///
    /// Both addresses must fall inside live allocations; interior addresses
    /// are fine, the owning buffer and offset are resolved by containment.
    pub fn cmd_copy(
        &mut self,
        cb: CommandBufferKey,
        dst: DeviceAddress,
        src: DeviceAddress,
        size: u64,
    ) -> Result<()> {
        let cb = self.recording(cb)?.cb;
        let (src_buffer, src_offset, dst_buffer, dst_offset) = {
            let space = self.address_space.lock();
            let (src_record, src_within) = space.locate(src)?;
            let (dst_record, dst_within) = space.locate(dst)?;
            (
                src_record.buffer,
                src_record.align_offset + src_within,
                dst_record.buffer,
                dst_record.align_offset + dst_within,
            )
        };

        let region = vk::BufferCopy {
            src_offset,
            dst_offset,
            size,
        };
        unsafe {
            self.device.cmd_copy_buffer(cb, src_buffer, dst_buffer, &[region]);
        }
        Ok(())
    }

    /// Records a copy from buffer memory at `src` into the whole of
    /// `texture` (mip 0, layer 0).
    pub fn cmd_copy_to_texture(
        &mut self,
        cb: CommandBufferKey,
        src: DeviceAddress,
        texture: TextureKey,
    ) -> Result<()> {
        let cb = self.recording(cb)?.cb;
        let (image, extent, aspect) = self.texture_copy_target(texture)?;
        let (buffer, offset) = {
            let space = self.address_space.lock();
            let (record, within) = space.locate(src)?;
            (record.buffer, record.align_offset + within)
        };

        let region = copy_region(offset, extent, aspect);
        unsafe {
            self.device.cmd_copy_buffer_to_image(
                cb,
                buffer,
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );
        }
        Ok(())
    }

    /// Records a copy of the whole of `texture` into buffer memory at
    /// `dst`.
    pub fn cmd_copy_from_texture(
        &mut self,
        cb: CommandBufferKey,
        dst: DeviceAddress,
        texture: TextureKey,
    ) -> Result<()> {
        let cb = self.recording(cb)?.cb;
        let (image, extent, aspect) = self.texture_copy_target(texture)?;
        let (buffer, offset) = {
            let space = self.address_space.lock();
            let (record, within) = space.locate(dst)?;
            (record.buffer, record.align_offset + within)
        };

        let region = copy_region(offset, extent, aspect);
        unsafe {
            self.device.cmd_copy_image_to_buffer(
                cb,
                image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                buffer,
                &[region],
            );
        }
        Ok(())
    }

    /// Records a full-extent blit between two textures (mip 0, layer 0),
    /// scaling with linear filtering when extents differ.
    pub fn cmd_blit_texture(
        &mut self,
        cb: CommandBufferKey,
        dst: TextureKey,
        src: TextureKey,
    ) -> Result<()> {
        let cb = self.recording(cb)?.cb;
        let (src_image, src_extent, src_aspect) = self.texture_copy_target(src)?;
        let (dst_image, dst_extent, dst_aspect) = self.texture_copy_target(dst)?;

        let subresource = |aspect| {
            vk::ImageSubresourceLayers::default()
                .aspect_mask(aspect)
                .mip_level(0)
                .base_array_layer(0)
                .layer_count(1)
        };
        let region = vk::ImageBlit::default()
            .src_subresource(subresource(src_aspect))
            .src_offsets([
                vk::Offset3D::default(),
                vk::Offset3D {
                    x: src_extent[0] as i32,
                    y: src_extent[1] as i32,
                    z: src_extent[2] as i32,
                },
            ])
            .dst_subresource(subresource(dst_aspect))
            .dst_offsets([
                vk::Offset3D::default(),
                vk::Offset3D {
                    x: dst_extent[0] as i32,
                    y: dst_extent[1] as i32,
                    z: dst_extent[2] as i32,
                },
            ]);

        unsafe {
            self.device.cmd_blit_image(
                cb,
                src_image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                dst_image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
                vk::Filter::LINEAR,
            );
        }
        Ok(())
    }

    // ========================================================================
    // Barriers
    // ========================================================================

    /// Records an execution barrier between two stages, widened with memory
    /// barriers for the named hazard classes.
    pub fn cmd_barrier(
        &mut self,
        cb: CommandBufferKey,
        before: Stage,
        after: Stage,
        hazards: Hazard,
    ) -> Result<()> {
        let cb = self.recording(cb)?.cb;

        let mut memory_barriers = Vec::new();
        if hazards.contains(Hazard::DRAW_ARGUMENTS) {
            memory_barriers.push(
                vk::MemoryBarrier::default()
                    .src_access_mask(vk::AccessFlags::SHADER_WRITE)
                    .dst_access_mask(vk::AccessFlags::INDIRECT_COMMAND_READ),
            );
        }
        if hazards.contains(Hazard::DESCRIPTORS) {
            memory_barriers.push(
                vk::MemoryBarrier::default()
                    .src_access_mask(vk::AccessFlags::MEMORY_WRITE)
                    .dst_access_mask(vk::AccessFlags::SHADER_READ),
            );
        }

        unsafe {
            self.device.cmd_pipeline_barrier(
                cb,
                before.to_vk(),
                after.to_vk(),
                vk::DependencyFlags::empty(),
                &memory_barriers,
                &[],
                &[],
            );
        }
        Ok(())
    }

    // ========================================================================
    // Pipeline and heap binding
    // ========================================================================

    /// Binds a pipeline; later draws or dispatches on this command buffer
    /// push their argument addresses against its layout.
    pub fn cmd_bind_pipeline(&mut self, cb: CommandBufferKey, pipeline: PipelineKey) -> Result<()> {
        let (handle, bind_point) = {
            let slot = self.pipeline(pipeline)?;
            (slot.pipeline, slot.bind_point)
        };
        let slot = self.recording_mut(cb)?;
        slot.bound = Some(bind_point);
        let cb = slot.cb;

        unsafe { self.device.cmd_bind_pipeline(cb, bind_point, handle) };
        Ok(())
    }

    /// Binds the bindless texture heap living at `heap` (and the shared
    /// sampler heap) for the currently bound pipeline.
    ///
    /// `heap` is caller-allocated general memory filled with descriptor
    /// blobs from
    /// [`texture_descriptor`](Self::texture_descriptor) /
    /// [`rw_texture_descriptor`](Self::rw_texture_descriptor).
    pub fn cmd_bind_texture_heap(
        &mut self,
        cb: CommandBufferKey,
        heap: DeviceAddress,
    ) -> Result<()> {
        // The heap address must belong to a live allocation.
        self.address_space.lock().locate(heap)?;
        let sampler_heap_address = self.ensure_sampler_heap()?;

        let slot = self.recording(cb)?;
        let Some(bind_point) = slot.bound else {
            return Err(GpuError::NoBoundPipeline);
        };
        let cb = slot.cb;

        let binding_infos = [
            vk::DescriptorBufferBindingInfoEXT::default()
                .address(heap)
                .usage(vk::BufferUsageFlags::RESOURCE_DESCRIPTOR_BUFFER_EXT),
            vk::DescriptorBufferBindingInfoEXT::default()
                .address(sampler_heap_address)
                .usage(vk::BufferUsageFlags::SAMPLER_DESCRIPTOR_BUFFER_EXT),
        ];

        // Sets 0 and 1 (sampled, storage) are both views of the caller's
        // heap; set 2 is the shared sampler heap.
        let buffer_indices = [0_u32, 0, 1];
        let offsets = [0_u64, 0, 0];

        unsafe {
            self.descriptor_ext.cmd_bind_descriptor_buffers(cb, &binding_infos);
            self.descriptor_ext.cmd_set_descriptor_buffer_offsets(
                cb,
                bind_point,
                self.layouts.for_bind_point(bind_point),
                0,
                &buffer_indices,
                &offsets,
            );
        }
        Ok(())
    }

    // ========================================================================
    // Compute
    // ========================================================================

    /// Records a dispatch; `args` is pushed to the shader as its
    /// argument-block device address.
    pub fn cmd_dispatch(
        &mut self,
        cb: CommandBufferKey,
        args: DeviceAddress,
        grid: [u32; 3],
    ) -> Result<()> {
        let cb = self.push_compute_args(cb, args)?;
        unsafe { self.device.cmd_dispatch(cb, grid[0], grid[1], grid[2]) };
        Ok(())
    }

    /// Records an indirect dispatch reading the grid dimensions from
    /// `grid_args` at execution time.
    pub fn cmd_dispatch_indirect(
        &mut self,
        cb: CommandBufferKey,
        args: DeviceAddress,
        grid_args: DeviceAddress,
    ) -> Result<()> {
        let cb = self.push_compute_args(cb, args)?;
        let (buffer, offset) = {
            let space = self.address_space.lock();
            let (record, within) = space.locate(grid_args)?;
            (record.buffer, record.align_offset + within)
        };
        unsafe { self.device.cmd_dispatch_indirect(cb, buffer, offset) };
        Ok(())
    }

    fn push_compute_args(
        &mut self,
        cb: CommandBufferKey,
        args: DeviceAddress,
    ) -> Result<vk::CommandBuffer> {
        let slot = self.recording(cb)?;
        if slot.bound != Some(vk::PipelineBindPoint::COMPUTE) {
            return Err(GpuError::NoBoundPipeline);
        }
        let cb = slot.cb;
        unsafe {
            self.device.cmd_push_constants(
                cb,
                self.layouts.compute,
                vk::ShaderStageFlags::COMPUTE,
                0,
                &args.to_ne_bytes(),
            );
        }
        Ok(cb)
    }

    // ========================================================================
    // Raster
    // ========================================================================

    /// Begins dynamic rendering into `color_targets`, clearing them to
    /// black. Viewport and scissor cover the first target's extent.
    pub fn cmd_begin_render_pass(
        &mut self,
        cb: CommandBufferKey,
        color_targets: &[TextureKey],
    ) -> Result<()> {
        let mut attachments = Vec::with_capacity(color_targets.len());
        let mut extent = [1_u32, 1];
        for (i, &target) in color_targets.iter().enumerate() {
            let slot = self.texture(target)?;
            if i == 0 {
                extent = [slot.desc.extent[0], slot.desc.extent[1]];
            }
            attachments.push(
                vk::RenderingAttachmentInfo::default()
                    .image_view(slot.view)
                    .image_layout(vk::ImageLayout::GENERAL)
                    .load_op(vk::AttachmentLoadOp::CLEAR)
                    .store_op(vk::AttachmentStoreOp::STORE)
                    .clear_value(vk::ClearValue {
                        color: vk::ClearColorValue {
                            float32: [0.0, 0.0, 0.0, 1.0],
                        },
                    }),
            );
        }
        let cb = self.recording(cb)?.cb;

        let render_area = vk::Rect2D {
            offset: vk::Offset2D::default(),
            extent: vk::Extent2D {
                width: extent[0],
                height: extent[1],
            },
        };
        let rendering_info = vk::RenderingInfo::default()
            .render_area(render_area)
            .layer_count(1)
            .color_attachments(&attachments);

        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent[0] as f32,
            height: extent[1] as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };

        unsafe {
            self.device.cmd_begin_rendering(cb, &rendering_info);
            self.device.cmd_set_viewport(cb, 0, &[viewport]);
            self.device.cmd_set_scissor(cb, 0, &[render_area]);
        }
        Ok(())
    }

    pub fn cmd_end_render_pass(&mut self, cb: CommandBufferKey) -> Result<()> {
        let cb = self.recording(cb)?.cb;
        unsafe { self.device.cmd_end_rendering(cb) };
        Ok(())
    }

    /// Records an indexed instanced draw. `vertex_data` and `pixel_data`
    /// reach the shaders as push-constant device addresses; `indices` is
    /// resolved to its owning buffer and bound as a u32 index buffer.
    pub fn cmd_draw_indexed(
        &mut self,
        cb: CommandBufferKey,
        vertex_data: DeviceAddress,
        pixel_data: DeviceAddress,
        indices: DeviceAddress,
        index_count: u32,
        instance_count: u32,
    ) -> Result<()> {
        let cb = self.push_draw_args(cb, vertex_data, pixel_data)?;
        self.bind_index_buffer(cb, indices)?;
        unsafe {
            self.device.cmd_draw_indexed(cb, index_count, instance_count, 0, 0, 0);
        }
        Ok(())
    }

    /// Records an indexed instanced draw whose arguments live in GPU
    /// memory at `args` (one `VkDrawIndexedIndirectCommand`).
    pub fn cmd_draw_indexed_indirect(
        &mut self,
        cb: CommandBufferKey,
        vertex_data: DeviceAddress,
        pixel_data: DeviceAddress,
        indices: DeviceAddress,
        args: DeviceAddress,
    ) -> Result<()> {
        let cb = self.push_draw_args(cb, vertex_data, pixel_data)?;
        self.bind_index_buffer(cb, indices)?;
        let (buffer, offset) = {
            let space = self.address_space.lock();
            let (record, within) = space.locate(args)?;
            (record.buffer, record.align_offset + within)
        };
        unsafe {
            self.device.cmd_draw_indexed_indirect(cb, buffer, offset, 1, 0);
        }
        Ok(())
    }

    fn push_draw_args(
        &mut self,
        cb: CommandBufferKey,
        vertex_data: DeviceAddress,
        pixel_data: DeviceAddress,
    ) -> Result<vk::CommandBuffer> {
        let slot = self.recording(cb)?;
        if slot.bound != Some(vk::PipelineBindPoint::GRAPHICS) {
            return Err(GpuError::NoBoundPipeline);
        }
        let cb = slot.cb;
        let addresses = [vertex_data, pixel_data];
        unsafe {
            self.device.cmd_push_constants(
                cb,
                self.layouts.graphics,
                GRAPHICS_PUSH_STAGES,
                0,
                bytemuck::cast_slice(&addresses),
            );
        }
        Ok(cb)
    }

    fn bind_index_buffer(&self, cb: vk::CommandBuffer, indices: DeviceAddress) -> Result<()> {
        let (buffer, offset) = {
            let space = self.address_space.lock();
            let (record, within) = space.locate(indices)?;
            (record.buffer, record.align_offset + within)
        };
        unsafe {
            self.device
                .cmd_bind_index_buffer(cb, buffer, offset, vk::IndexType::UINT32);
        }
        Ok(())
    }

    // ========================================================================
    // Sampler heap
    // ========================================================================

    /// The sampler heap holds the single default sampler today; created on
    /// first use and freed with the context.
    fn ensure_sampler_heap(&mut self) -> Result<DeviceAddress> {
        if let Some(heap) = self.sampler_heap {
            return Ok(heap.device_address());
        }

        let allocation = self.allocate_internal(
            self.layouts.sampler_set_size,
            self.descriptor_props.offset_alignment,
            crate::types::MemoryClass::General,
            true,
        )?;

        let info = vk::DescriptorGetInfoEXT::default()
            .ty(vk::DescriptorType::SAMPLER)
            .data(vk::DescriptorDataEXT {
                p_sampler: &raw const self.default_sampler,
            });
        let Some(host_ptr) = allocation.host_ptr() else {
            // General memory is always host-mapped; defensive only.
            return Err(GpuError::UnsupportedMemoryClass(
                crate::types::MemoryClass::General,
            ));
        };
        let descriptor = unsafe {
            std::slice::from_raw_parts_mut(host_ptr.as_ptr(), self.descriptor_props.sampler_size)
        };
        unsafe { self.descriptor_ext.get_descriptor(&info, descriptor) };

        self.sampler_heap = Some(allocation);
        log::debug!(
            "Sampler heap created at {:#x}",
            allocation.device_address()
        );
        Ok(allocation.device_address())
    }

    fn texture_copy_target(
        &self,
        texture: TextureKey,
    ) -> Result<(vk::Image, [u32; 3], vk::ImageAspectFlags)> {
        let slot = self.texture(texture)?;
        let aspect = if slot.desc.format.is_depth()
            || slot.desc.usage.contains(TextureUsage::DEPTH_STENCIL_ATTACHMENT)
        {
            vk::ImageAspectFlags::DEPTH
        } else {
            vk::ImageAspectFlags::COLOR
        };
        Ok((slot.image, slot.desc.extent, aspect))
    }
}

fn copy_region(
    buffer_offset: u64,
    extent: [u32; 3],
    aspect: vk::ImageAspectFlags,
) -> vk::BufferImageCopy {
    vk::BufferImageCopy::default()
        .buffer_offset(buffer_offset)
        .buffer_row_length(0)
        .buffer_image_height(0)
        .image_subresource(
            vk::ImageSubresourceLayers::default()
                .aspect_mask(aspect)
                .mip_level(0)
                .base_array_layer(0)
                .layer_count(1),
        )
        .image_extent(vk::Extent3D {
            width: extent[0],
            height: extent[1],
            depth: extent[2],
        })
}
