//! Textures
//!
//! Placement-style texture creation: the caller allocates backing memory
//! through the address space, asks for the size/alignment a description
//! needs, and binds the image to the owning allocation at the address it
//! chose. Descriptor blobs for the bindless heaps are fetched per texture.

use ash::vk;

use crate::errors::{GpuError, Result};
use crate::handles::TextureKey;
use crate::types::{DeviceAddress, TextureDesc, TextureDescriptor, TextureUsage};

use super::{DeviceContext, TextureSlot};

impl DeviceContext {
    /// Size and alignment the backing allocation for `desc` must satisfy.
    ///
    /// Creates and immediately destroys a probe image; allocate with the
    /// returned values, then call [`create_texture`](Self::create_texture)
    /// with the allocation's device address.
    pub fn texture_requirements(&self, desc: &TextureDesc) -> Result<(u64, u64)> {
        let image = self.create_image(desc)?;
        let requirements = unsafe { self.device.get_image_memory_requirements(image) };
        unsafe { self.device.destroy_image(image, None) };
        Ok((requirements.size, requirements.alignment))
    }

    /// Creates a texture bound to caller-allocated memory at `backing`.
    ///
    /// `backing` may point anywhere inside a live allocation; the texture
    /// occupies `[backing, backing + size)` where `size` came from
    /// [`texture_requirements`](Self::texture_requirements). Fails with
    /// [`GpuError::UnresolvedPointer`] when the address is not inside any
    /// live allocation — a zero address from a failed allocation lands
    /// here.
    pub fn create_texture(
        &mut self,
        desc: &TextureDesc,
        backing: DeviceAddress,
    ) -> Result<TextureKey> {
        let (memory, memory_offset) = {
            let space = self.address_space.lock();
            let (record, offset) = space.locate(backing)?;
            (record.memory, record.align_offset + offset)
        };

        let image = self.create_image(desc)?;
        if let Err(e) = unsafe { self.device.bind_image_memory(image, memory, memory_offset) } {
            unsafe { self.device.destroy_image(image, None) };
            return Err(e.into());
        }

        let aspect = if desc.format.is_depth()
            || desc.usage.contains(TextureUsage::DEPTH_STENCIL_ATTACHMENT)
        {
            vk::ImageAspectFlags::DEPTH
        } else {
            vk::ImageAspectFlags::COLOR
        };

        let view_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(desc.kind.to_vk_view_type())
            .format(desc.format.to_vk())
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(aspect)
                    .base_mip_level(0)
                    .level_count(desc.mip_count)
                    .base_array_layer(0)
                    .layer_count(desc.layer_count),
            );
        let view = match unsafe { self.device.create_image_view(&view_info, None) } {
            Ok(view) => view,
            Err(e) => {
                unsafe { self.device.destroy_image(image, None) };
                return Err(e.into());
            }
        };

        log::debug!(
            "Created {:?} texture {}x{}x{} at {backing:#x}",
            desc.format,
            desc.extent[0],
            desc.extent[1],
            desc.extent[2]
        );

        Ok(self.textures.insert(TextureSlot {
            desc: *desc,
            image,
            view,
        }))
    }

    /// Destroys a texture. The backing allocation is untouched; free it
    /// separately through the address space.
    pub fn destroy_texture(&mut self, texture: TextureKey) -> Result<()> {
        let slot = self
            .textures
            .remove(texture)
            .ok_or(GpuError::StaleHandle { kind: "texture" })?;
        unsafe {
            self.device.destroy_image_view(slot.view, None);
            self.device.destroy_image(slot.image, None);
        }
        Ok(())
    }

    /// Descriptor blob for sampling this texture through the bindless heap.
    pub fn texture_descriptor(&self, texture: TextureKey) -> Result<TextureDescriptor> {
        let slot = self.texture(texture)?;
        let image_info = vk::DescriptorImageInfo::default()
            .sampler(self.default_sampler)
            .image_view(slot.view)
            .image_layout(vk::ImageLayout::GENERAL);
        let info = vk::DescriptorGetInfoEXT::default()
            .ty(vk::DescriptorType::SAMPLED_IMAGE)
            .data(vk::DescriptorDataEXT {
                p_sampled_image: &raw const image_info,
            });

        let mut descriptor = TextureDescriptor::new(self.descriptor_props.sampled_image_size);
        unsafe { self.descriptor_ext.get_descriptor(&info, descriptor.buf_mut()) };
        Ok(descriptor)
    }

    /// Descriptor blob for storage (read/write) access through the heap.
    pub fn rw_texture_descriptor(&self, texture: TextureKey) -> Result<TextureDescriptor> {
        let slot = self.texture(texture)?;
        let image_info = vk::DescriptorImageInfo::default()
            .image_view(slot.view)
            .image_layout(vk::ImageLayout::GENERAL);
        let info = vk::DescriptorGetInfoEXT::default()
            .ty(vk::DescriptorType::STORAGE_IMAGE)
            .data(vk::DescriptorDataEXT {
                p_storage_image: &raw const image_info,
            });

        let mut descriptor = TextureDescriptor::new(self.descriptor_props.storage_image_size);
        unsafe { self.descriptor_ext.get_descriptor(&info, descriptor.buf_mut()) };
        Ok(descriptor)
    }

    pub(crate) fn create_image(&self, desc: &TextureDesc) -> Result<vk::Image> {
        let info = vk::ImageCreateInfo::default()
            .image_type(desc.kind.to_vk_image_type())
            .extent(vk::Extent3D {
                width: desc.extent[0],
                height: desc.extent[1],
                depth: desc.extent[2],
            })
            .mip_levels(desc.mip_count)
            .array_layers(desc.layer_count)
            .samples(vk::SampleCountFlags::from_raw(desc.sample_count))
            .format(desc.format.to_vk())
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(desc.usage.to_vk())
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        Ok(unsafe { self.device.create_image(&info, None) }?)
    }
}
