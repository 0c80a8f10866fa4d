//! Allocation and Address Translation
//!
//! The device-facing half of the unified address space: native buffer and
//! memory creation, mapping, and release. The pure registry bookkeeping
//! lives in [`crate::memory`]; this file is the only place native memory
//! handles are created or destroyed.

use std::ptr::NonNull;

use ash::vk;

use crate::errors::{GpuError, Result};
use crate::memory::{Allocation, AllocationRecord};
use crate::types::{DeviceAddress, MemoryClass, PtrOrAddress};

use super::DeviceContext;

fn round_up(value: u64, alignment: u64) -> u64 {
    debug_assert!(alignment.is_power_of_two());
    (value + alignment - 1) & !(alignment - 1)
}

impl DeviceContext {
    /// Allocates a GPU-visible memory block.
    ///
    /// The returned block is addressable as a raw device address and, for
    /// host-visible classes, simultaneously mapped as a host pointer; the
    /// two views are congruent byte-for-byte. `size` is rounded up to
    /// `alignment`, and both views are aligned to it.
    ///
    /// # Errors
    ///
    /// - [`GpuError::OutOfMemory`] when the backend cannot satisfy the
    ///   request; retry with a smaller size or another class.
    /// - [`GpuError::UnsupportedMemoryClass`] when no native memory type
    ///   matches the class's property combination.
    pub fn allocate(
        &self,
        size: u64,
        alignment: u64,
        class: MemoryClass,
    ) -> Result<Allocation> {
        self.allocate_internal(size, alignment, class, false)
    }

    /// [`allocate`](Self::allocate) with the configured default alignment.
    pub fn allocate_default(&self, size: u64, class: MemoryClass) -> Result<Allocation> {
        self.allocate_internal(size, self.default_alignment, class, false)
    }

    pub(crate) fn allocate_internal(
        &self,
        size: u64,
        alignment: u64,
        class: MemoryClass,
        sampler_heap: bool,
    ) -> Result<Allocation> {
        let alignment = alignment.max(1).next_power_of_two();
        // No zero-length intervals ever enter the registry.
        let size = round_up(size.max(1), alignment);

        let buffer_info = vk::BufferCreateInfo::default()
            // Slack so the aligned window always fits inside the buffer.
            .size(size + alignment)
            .usage(buffer_usage(class, sampler_heap))
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe { self.device.create_buffer(&buffer_info, None) }?;

        let requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };

        let Some(type_index) = self.memory_type_index(requirements.memory_type_bits, class)
        else {
            unsafe { self.device.destroy_buffer(buffer, None) };
            return Err(GpuError::UnsupportedMemoryClass(class));
        };

        let mut flags_info = vk::MemoryAllocateFlagsInfo::default()
            .flags(vk::MemoryAllocateFlags::DEVICE_ADDRESS);
        let alloc_info = vk::MemoryAllocateInfo::default()
            .allocation_size(requirements.size)
            .memory_type_index(type_index)
            .push_next(&mut flags_info);

        let memory = match unsafe { self.device.allocate_memory(&alloc_info, None) } {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { self.device.destroy_buffer(buffer, None) };
                return Err(match e {
                    vk::Result::ERROR_OUT_OF_DEVICE_MEMORY
                    | vk::Result::ERROR_OUT_OF_HOST_MEMORY => {
                        GpuError::OutOfMemory { requested: size }
                    }
                    other => other.into(),
                });
            }
        };

        if let Err(e) = unsafe { self.device.bind_buffer_memory(buffer, memory, 0) } {
            unsafe {
                self.device.destroy_buffer(buffer, None);
                self.device.free_memory(memory, None);
            }
            return Err(e.into());
        }

        let address_info = vk::BufferDeviceAddressInfo::default().buffer(buffer);
        let raw_address = unsafe { self.device.get_buffer_device_address(&address_info) };

        // Minimum forward shift that satisfies the requested alignment; the
        // identical shift is applied to the host view below, preserving
        // congruence.
        let align_offset = (alignment - raw_address % alignment) % alignment;
        let device_address = raw_address + align_offset;

        let host_ptr = if host_visible(class) {
            let raw = match unsafe {
                self.device
                    .map_memory(memory, 0, vk::WHOLE_SIZE, vk::MemoryMapFlags::empty())
            } {
                Ok(ptr) => ptr,
                Err(e) => {
                    unsafe {
                        self.device.destroy_buffer(buffer, None);
                        self.device.free_memory(memory, None);
                    }
                    return Err(e.into());
                }
            };
            NonNull::new(unsafe { raw.cast::<u8>().add(align_offset as usize) })
        } else {
            None
        };

        self.address_space.lock().insert(AllocationRecord {
            size,
            device_address,
            host_ptr,
            align_offset,
            buffer,
            memory,
        });

        log::debug!(
            "Allocated {size} bytes ({class:?}) at {device_address:#x}{}",
            if host_ptr.is_some() { ", host-mapped" } else { "" }
        );

        Ok(Allocation::new(size, device_address, host_ptr))
    }

    /// Frees an allocation through either of its views.
    ///
    /// A pointer that does not resolve to any live allocation is ignored
    /// with a warning — deliberately permissive; do not rely on it for
    /// error signaling.
    ///
    /// # Preconditions
    ///
    /// All GPU work reading or writing the block has completed (wait on the
    /// relevant timeline value first). Freeing in-use memory is a
    /// use-after-free this layer does not detect.
    pub fn free(&self, reference: impl Into<PtrOrAddress>) {
        let reference = reference.into();
        let Some(record) = self.address_space.lock().take(reference) else {
            log::warn!("free: {reference:?} does not match a live allocation, ignoring");
            return;
        };
        unsafe {
            if record.host_ptr.is_some() {
                self.device.unmap_memory(record.memory);
            }
            self.device.destroy_buffer(record.buffer, None);
            self.device.free_memory(record.memory, None);
        }
        log::debug!(
            "Freed {} bytes at {:#x}",
            record.size,
            record.device_address
        );
    }

    /// Translates a host pointer into the congruent device address.
    ///
    /// Fails with [`GpuError::UnresolvedPointer`] when `ptr` is not inside
    /// any live host-mapped allocation.
    pub fn to_device_address(&self, ptr: *const u8) -> Result<DeviceAddress> {
        self.address_space.lock().resolve(ptr)
    }

    /// Number of live allocations in the registry.
    #[must_use]
    pub fn live_allocations(&self) -> usize {
        self.address_space.lock().len()
    }

    fn memory_type_index(&self, type_bits: u32, class: MemoryClass) -> Option<u32> {
        let preferred = memory_properties(class);
        if let Some(index) = self.find_memory_type(type_bits, preferred) {
            return Some(index);
        }
        // GENERAL promises device-local only "when available".
        if class == MemoryClass::General {
            let fallback =
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
            return self.find_memory_type(type_bits, fallback);
        }
        None
    }

    fn find_memory_type(
        &self,
        type_bits: u32,
        properties: vk::MemoryPropertyFlags,
    ) -> Option<u32> {
        (0..self.memory_properties.memory_type_count).find(|&i| {
            type_bits & (1 << i) != 0
                && self.memory_properties.memory_types[i as usize]
                    .property_flags
                    .contains(properties)
        })
    }
}

fn host_visible(class: MemoryClass) -> bool {
    matches!(class, MemoryClass::General | MemoryClass::Readback)
}

fn memory_properties(class: MemoryClass) -> vk::MemoryPropertyFlags {
    match class {
        MemoryClass::General => {
            vk::MemoryPropertyFlags::DEVICE_LOCAL
                | vk::MemoryPropertyFlags::HOST_VISIBLE
                | vk::MemoryPropertyFlags::HOST_COHERENT
        }
        MemoryClass::DeviceOnly => vk::MemoryPropertyFlags::DEVICE_LOCAL,
        MemoryClass::Readback => {
            vk::MemoryPropertyFlags::HOST_VISIBLE
                | vk::MemoryPropertyFlags::HOST_COHERENT
                | vk::MemoryPropertyFlags::HOST_CACHED
        }
    }
}

fn buffer_usage(class: MemoryClass, sampler_heap: bool) -> vk::BufferUsageFlags {
    match class {
        MemoryClass::General => {
            let mut usage = vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS
                | vk::BufferUsageFlags::TRANSFER_SRC
                | vk::BufferUsageFlags::TRANSFER_DST
                | vk::BufferUsageFlags::UNIFORM_TEXEL_BUFFER
                | vk::BufferUsageFlags::STORAGE_TEXEL_BUFFER
                | vk::BufferUsageFlags::UNIFORM_BUFFER
                | vk::BufferUsageFlags::STORAGE_BUFFER
                | vk::BufferUsageFlags::INDEX_BUFFER
                | vk::BufferUsageFlags::VERTEX_BUFFER
                | vk::BufferUsageFlags::INDIRECT_BUFFER;
            // A general allocation can back a descriptor heap; the flavor
            // depends on which heap it is.
            usage |= if sampler_heap {
                vk::BufferUsageFlags::SAMPLER_DESCRIPTOR_BUFFER_EXT
            } else {
                vk::BufferUsageFlags::RESOURCE_DESCRIPTOR_BUFFER_EXT
            };
            usage
        }
        MemoryClass::DeviceOnly => {
            vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS
                | vk::BufferUsageFlags::TRANSFER_SRC
                | vk::BufferUsageFlags::TRANSFER_DST
                | vk::BufferUsageFlags::UNIFORM_TEXEL_BUFFER
                | vk::BufferUsageFlags::STORAGE_TEXEL_BUFFER
                | vk::BufferUsageFlags::UNIFORM_BUFFER
                | vk::BufferUsageFlags::STORAGE_BUFFER
                | vk::BufferUsageFlags::INDEX_BUFFER
                | vk::BufferUsageFlags::VERTEX_BUFFER
                | vk::BufferUsageFlags::INDIRECT_BUFFER
        }
        MemoryClass::Readback => {
            vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS | vk::BufferUsageFlags::TRANSFER_DST
        }
    }
}
