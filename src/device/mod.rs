//! Device Context
//!
//! The [`DeviceContext`] owns the connection to the GPU: instance, logical
//! device, submission queue, command pool, the fixed bindless layouts, and
//! the two pieces of CORE state — the live-allocation registry and the
//! in-flight batch map. It is an explicit object, not a global; independent
//! contexts can coexist (useful for tests and multi-GPU).
//!
//! # Threading
//!
//! `allocate` / `free` / `to_device_address` / `wait` and the semaphore
//! operations take `&self` and are safe to call from any thread — the
//! registry, the batch map, the semaphore table, and the command pool each
//! sit behind a mutex. Everything taking `&mut self` relies on Rust's
//! exclusivity for its synchronization.
//!
//! # Teardown
//!
//! Dropping the context waits for the device to go idle, releases every
//! still-tracked batch and live allocation, then destroys the native
//! objects in reverse creation order.

mod commands;
mod init;
mod layouts;
mod memory;
mod pipelines;
mod textures;

use std::time::Duration;

use ash::{ext, vk};
use parking_lot::Mutex;
use slotmap::SlotMap;

use crate::errors::{GpuError, Result};
use crate::handles::{CommandBufferKey, PipelineKey, QueueKey, SemaphoreKey, TextureKey};
use crate::memory::{AddressSpace, Allocation};
use crate::settings::DeviceConfig;
use crate::sync::ReclaimQueue;
use crate::types::TextureDesc;

use init::DescriptorHeapProperties;
use layouts::FixedLayouts;

pub(crate) struct PipelineSlot {
    pipeline: vk::Pipeline,
    bind_point: vk::PipelineBindPoint,
}

pub(crate) struct TextureSlot {
    desc: TextureDesc,
    image: vk::Image,
    view: vk::ImageView,
}

pub(crate) struct RecordingSlot {
    cb: vk::CommandBuffer,
    /// Bind point of the most recently bound pipeline; draws and dispatches
    /// push their addresses against the matching fixed layout.
    bound: Option<vk::PipelineBindPoint>,
}

/// The process-facing GPU device.
///
/// Create one with [`DeviceContext::new`]; every operation of the interface
/// hangs off this object.
pub struct DeviceContext {
    // Native handles. `entry` is held only to keep the loader alive.
    _entry: ash::Entry,
    instance: ash::Instance,
    physical: vk::PhysicalDevice,
    device: ash::Device,
    descriptor_ext: ext::descriptor_buffer::Device,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    descriptor_props: DescriptorHeapProperties,
    layouts: FixedLayouts,
    default_sampler: vk::Sampler,

    command_pool: Mutex<vk::CommandPool>,

    // CORE state (shared-access surface).
    address_space: Mutex<AddressSpace>,
    reclaim: Mutex<ReclaimQueue>,
    semaphores: Mutex<SlotMap<SemaphoreKey, vk::Semaphore>>,

    // Resource arenas (exclusive-access surface).
    queues: SlotMap<QueueKey, vk::Queue>,
    default_queue: QueueKey,
    pipelines: SlotMap<PipelineKey, PipelineSlot>,
    textures: SlotMap<TextureKey, TextureSlot>,
    recordings: SlotMap<CommandBufferKey, RecordingSlot>,

    /// Heap of sampler descriptors, created on first texture-heap bind.
    sampler_heap: Option<Allocation>,

    default_alignment: u64,
}

impl DeviceContext {
    /// Connects to the GPU and builds the fixed global state.
    ///
    /// Fails with [`GpuError::NoSuitableDevice`] when no installed device
    /// offers timeline semaphores, buffer device address, and descriptor
    /// buffers.
    pub fn new(config: &DeviceConfig) -> Result<Self> {
        let native = init::create_native(config)?;
        let descriptor_ext =
            ext::descriptor_buffer::Device::new(&native.instance, &native.device);

        let layouts =
            FixedLayouts::new(&native.device, &descriptor_ext, config.descriptor_capacity)?;

        let sampler_info = vk::SamplerCreateInfo::default()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::REPEAT)
            .address_mode_v(vk::SamplerAddressMode::REPEAT)
            .address_mode_w(vk::SamplerAddressMode::REPEAT)
            .border_color(vk::BorderColor::INT_OPAQUE_BLACK);
        let default_sampler = unsafe { native.device.create_sampler(&sampler_info, None) }?;

        let pool_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(native.queue_family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let command_pool = unsafe { native.device.create_command_pool(&pool_info, None) }?;

        let mut queues = SlotMap::with_key();
        let default_queue = queues.insert(native.queue);

        log::debug!(
            "Device context ready (queue family {}, descriptor capacity {})",
            native.queue_family,
            config.descriptor_capacity
        );

        Ok(Self {
            _entry: native.entry,
            instance: native.instance,
            physical: native.physical,
            device: native.device,
            descriptor_ext,
            memory_properties: native.memory_properties,
            descriptor_props: native.descriptor_props,
            layouts,
            default_sampler,
            command_pool: Mutex::new(command_pool),
            address_space: Mutex::new(AddressSpace::default()),
            reclaim: Mutex::new(ReclaimQueue::default()),
            semaphores: Mutex::new(SlotMap::with_key()),
            queues,
            default_queue,
            pipelines: SlotMap::with_key(),
            textures: SlotMap::with_key(),
            recordings: SlotMap::with_key(),
            sampler_heap: None,
            default_alignment: config.default_alignment,
        })
    }

    /// The context's graphics+compute queue.
    #[inline]
    #[must_use]
    pub fn default_queue(&self) -> QueueKey {
        self.default_queue
    }

    /// Marketing name of the selected physical device.
    #[must_use]
    pub fn device_name(&self) -> String {
        let properties = unsafe { self.instance.get_physical_device_properties(self.physical) };
        properties
            .device_name_as_c_str()
            .map_or_else(|_| "<unknown>".into(), |n| n.to_string_lossy().into_owned())
    }

    // ========================================================================
    // Timeline semaphores
    // ========================================================================

    /// Creates a timeline semaphore with the given initial counter value.
    pub fn create_timeline(&self, initial_value: u64) -> Result<SemaphoreKey> {
        let mut type_info = vk::SemaphoreTypeCreateInfo::default()
            .semaphore_type(vk::SemaphoreType::TIMELINE)
            .initial_value(initial_value);
        let info = vk::SemaphoreCreateInfo::default().push_next(&mut type_info);
        let semaphore = unsafe { self.device.create_semaphore(&info, None) }?;
        Ok(self.semaphores.lock().insert(semaphore))
    }

    /// Destroys a timeline semaphore.
    ///
    /// Precondition: every batch submitted against it has been waited past,
    /// and no other thread is blocked in [`wait`](Self::wait) on it.
    /// Batches still tracked at destruction stay tracked (and are released
    /// at context teardown), since their completion can no longer be
    /// observed.
    pub fn destroy_semaphore(&self, semaphore: SemaphoreKey) -> Result<()> {
        let handle = self
            .semaphores
            .lock()
            .remove(semaphore)
            .ok_or(GpuError::StaleHandle { kind: "semaphore" })?;
        let in_flight = self.reclaim.lock().tracked_for(semaphore);
        if in_flight > 0 {
            log::warn!("Semaphore destroyed with {in_flight} batch(es) still in flight");
        }
        unsafe { self.device.destroy_semaphore(handle, None) };
        Ok(())
    }

    /// The semaphore's current GPU-observed counter value.
    pub fn timeline_value(&self, semaphore: SemaphoreKey) -> Result<u64> {
        let handle = self.semaphore_handle(semaphore)?;
        Ok(unsafe { self.device.get_semaphore_counter_value(handle) }?)
    }

    /// Blocks until the semaphore's counter reaches at least `value`, then
    /// reclaims every tracked batch in the contiguous run ending at `value`.
    ///
    /// `None` waits forever. On [`GpuError::Timeout`] nothing is reclaimed;
    /// the batches stay tracked for a future wait. Waiting on a value that
    /// was never submitted can only end in a timeout.
    pub fn wait(
        &self,
        semaphore: SemaphoreKey,
        value: u64,
        timeout: Option<Duration>,
    ) -> Result<()> {
        let handle = self.semaphore_handle(semaphore)?;

        let semaphores = [handle];
        let values = [value];
        let wait_info = vk::SemaphoreWaitInfo::default()
            .semaphores(&semaphores)
            .values(&values);
        let timeout_ns =
            timeout.map_or(u64::MAX, |t| u64::try_from(t.as_nanos()).unwrap_or(u64::MAX));

        // The native wait happens without any lock held; other threads keep
        // allocating and submitting while this one blocks.
        match unsafe { self.device.wait_semaphores(&wait_info, timeout_ns) } {
            Ok(()) => {}
            Err(vk::Result::TIMEOUT) => return Err(GpuError::Timeout { value }),
            Err(e) => return Err(e.into()),
        }

        let reclaimed = self.reclaim.lock().drain_completed(semaphore, value);
        if !reclaimed.is_empty() {
            let pool = self.command_pool.lock();
            unsafe { self.device.free_command_buffers(*pool, &reclaimed) };
            log::trace!(
                "Reclaimed {} command buffer(s) at timeline value {value}",
                reclaimed.len()
            );
        }
        Ok(())
    }

    /// Blocks until every submitted batch on every queue has completed.
    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle() }?;
        Ok(())
    }

    /// Number of submitted batches not yet reclaimed by a wait.
    #[must_use]
    pub fn in_flight_batches(&self) -> usize {
        self.reclaim.lock().len()
    }

    /// Whether the batch submitted against `(semaphore, value)` is still
    /// tracked (i.e. no successful wait has reached it yet).
    #[must_use]
    pub fn is_batch_tracked(&self, semaphore: SemaphoreKey, value: u64) -> bool {
        self.reclaim.lock().is_tracked(semaphore, value)
    }

    // ========================================================================
    // Internal lookups
    // ========================================================================

    pub(crate) fn semaphore_handle(&self, key: SemaphoreKey) -> Result<vk::Semaphore> {
        self.semaphores
            .lock()
            .get(key)
            .copied()
            .ok_or(GpuError::StaleHandle { kind: "semaphore" })
    }

    pub(crate) fn queue_handle(&self, key: QueueKey) -> Result<vk::Queue> {
        self.queues
            .get(key)
            .copied()
            .ok_or(GpuError::StaleHandle { kind: "queue" })
    }

    pub(crate) fn recording(&self, key: CommandBufferKey) -> Result<&RecordingSlot> {
        self.recordings.get(key).ok_or(GpuError::StaleHandle {
            kind: "command buffer",
        })
    }

    pub(crate) fn recording_mut(&mut self, key: CommandBufferKey) -> Result<&mut RecordingSlot> {
        self.recordings.get_mut(key).ok_or(GpuError::StaleHandle {
            kind: "command buffer",
        })
    }

    pub(crate) fn pipeline(&self, key: PipelineKey) -> Result<&PipelineSlot> {
        self.pipelines
            .get(key)
            .ok_or(GpuError::StaleHandle { kind: "pipeline" })
    }

    pub(crate) fn texture(&self, key: TextureKey) -> Result<&TextureSlot> {
        self.textures
            .get(key)
            .ok_or(GpuError::StaleHandle { kind: "texture" })
    }
}

impl Drop for DeviceContext {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                log::error!("device_wait_idle failed during teardown: {e}");
            }

            let pool = *self.command_pool.get_mut();

            // Batches whose completion was never waited on, plus any
            // recordings never submitted. The idle wait above made both safe
            // to release.
            let leftover = self.reclaim.get_mut().drain_all();
            if !leftover.is_empty() {
                log::debug!("Releasing {} unreclaimed command buffer(s)", leftover.len());
                self.device.free_command_buffers(pool, &leftover);
            }
            let recordings: Vec<vk::CommandBuffer> =
                self.recordings.drain().map(|(_, slot)| slot.cb).collect();
            if !recordings.is_empty() {
                self.device.free_command_buffers(pool, &recordings);
            }

            for (_, semaphore) in self.semaphores.get_mut().drain() {
                self.device.destroy_semaphore(semaphore, None);
            }
            for (_, slot) in self.pipelines.drain() {
                self.device.destroy_pipeline(slot.pipeline, None);
            }
            for (_, slot) in self.textures.drain() {
                self.device.destroy_image_view(slot.view, None);
                self.device.destroy_image(slot.image, None);
            }

            let live = self.address_space.get_mut().drain();
            if !live.is_empty() {
                log::debug!("Releasing {} leaked allocation(s)", live.len());
            }
            for record in live {
                if record.host_ptr.is_some() {
                    self.device.unmap_memory(record.memory);
                }
                self.device.destroy_buffer(record.buffer, None);
                self.device.free_memory(record.memory, None);
            }

            self.device.destroy_sampler(self.default_sampler, None);
            self.device.destroy_command_pool(pool, None);
            self.layouts.destroy(&self.device);
            self.device.destroy_device(None);
            self.instance.destroy_instance(None);
        }
    }
}
