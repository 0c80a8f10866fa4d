//! Native Bootstrap
//!
//! Instance creation, physical-device selection, and logical-device creation.
//! Everything here runs once inside [`DeviceContext::new`] and the resulting
//! handles live for the context's lifetime.
//!
//! Required device capabilities (all Vulkan 1.2/1.3 core plus one
//! extension):
//! - timeline semaphores and buffer device address (1.2) — the CORE is
//!   built on both
//! - synchronization2 and dynamic rendering (1.3)
//! - `VK_EXT_descriptor_buffer` — bindless heaps live in plain
//!   GPU-addressable memory
//!
//! [`DeviceContext::new`]: super::DeviceContext::new

use std::ffi::CStr;

use ash::{ext, vk};

use crate::errors::{GpuError, Result};
use crate::settings::DeviceConfig;

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Handles produced by the bootstrap, consumed by `DeviceContext::new`.
pub(crate) struct NativeDevice {
    pub entry: ash::Entry,
    pub instance: ash::Instance,
    pub physical: vk::PhysicalDevice,
    pub device: ash::Device,
    pub queue_family: u32,
    pub queue: vk::Queue,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    pub descriptor_props: DescriptorHeapProperties,
}

/// Device-specific descriptor-buffer parameters, queried once.
#[derive(Debug, Clone, Copy)]
pub(crate) struct DescriptorHeapProperties {
    pub sampled_image_size: usize,
    pub storage_image_size: usize,
    pub sampler_size: usize,
    pub offset_alignment: u64,
}

pub(crate) fn create_native(config: &DeviceConfig) -> Result<NativeDevice> {
    let entry = unsafe { ash::Entry::load() }
        .map_err(|e| GpuError::InitFailed(format!("Vulkan loader unavailable: {e}")))?;

    let instance = create_instance(&entry, config)?;

    let selection = match pick_physical_device(&instance, config) {
        Ok(selection) => selection,
        Err(e) => {
            unsafe { instance.destroy_instance(None) };
            return Err(e);
        }
    };

    let device = match create_logical_device(&instance, selection.physical, selection.queue_family)
    {
        Ok(device) => device,
        Err(e) => {
            unsafe { instance.destroy_instance(None) };
            return Err(e);
        }
    };

    let queue = unsafe { device.get_device_queue(selection.queue_family, 0) };

    let memory_properties =
        unsafe { instance.get_physical_device_memory_properties(selection.physical) };

    let mut db_props = vk::PhysicalDeviceDescriptorBufferPropertiesEXT::default();
    let mut props2 = vk::PhysicalDeviceProperties2::default().push_next(&mut db_props);
    unsafe { instance.get_physical_device_properties2(selection.physical, &mut props2) };

    let descriptor_props = DescriptorHeapProperties {
        sampled_image_size: db_props.sampled_image_descriptor_size,
        storage_image_size: db_props.storage_image_descriptor_size,
        sampler_size: db_props.sampler_descriptor_size,
        offset_alignment: db_props.descriptor_buffer_offset_alignment,
    };

    Ok(NativeDevice {
        entry,
        instance,
        physical: selection.physical,
        device,
        queue_family: selection.queue_family,
        queue,
        memory_properties,
        descriptor_props,
    })
}

fn create_instance(entry: &ash::Entry, config: &DeviceConfig) -> Result<ash::Instance> {
    let app_info = vk::ApplicationInfo::default()
        .application_name(c"vanta")
        .engine_name(c"vanta")
        .api_version(vk::API_VERSION_1_3);

    let mut layers = Vec::new();
    if config.validation {
        let available = unsafe { entry.enumerate_instance_layer_properties() }?;
        let supported = available.iter().any(|l| {
            l.layer_name_as_c_str()
                .is_ok_and(|name| name == VALIDATION_LAYER)
        });
        if supported {
            layers.push(VALIDATION_LAYER.as_ptr());
        } else {
            log::warn!("Validation requested but VK_LAYER_KHRONOS_validation is not installed");
        }
    }

    let instance_info = vk::InstanceCreateInfo::default()
        .application_info(&app_info)
        .enabled_layer_names(&layers);

    unsafe { entry.create_instance(&instance_info, None) }
        .map_err(|e| GpuError::InitFailed(format!("instance creation failed: {e}")))
}

struct Selection {
    physical: vk::PhysicalDevice,
    queue_family: u32,
}

fn pick_physical_device(instance: &ash::Instance, config: &DeviceConfig) -> Result<Selection> {
    let physicals = unsafe { instance.enumerate_physical_devices() }?;
    if physicals.is_empty() {
        return Err(GpuError::NoSuitableDevice("no Vulkan devices present".into()));
    }

    let mut fallback = None;
    for (index, &physical) in physicals.iter().enumerate() {
        if let Some(forced) = config.adapter_index
            && forced != index
        {
            continue;
        }

        let Some(queue_family) = suitable_queue_family(instance, physical) else {
            continue;
        };
        if !supports_required_features(instance, physical) {
            continue;
        }

        let properties = unsafe { instance.get_physical_device_properties(physical) };
        let name = properties
            .device_name_as_c_str()
            .map_or_else(|_| "<unknown>".into(), |n| n.to_string_lossy().into_owned());

        if properties.device_type == vk::PhysicalDeviceType::DISCRETE_GPU
            || config.adapter_index.is_some()
        {
            log::info!("Selected GPU: {name}");
            return Ok(Selection {
                physical,
                queue_family,
            });
        }
        if fallback.is_none() {
            log::debug!("Candidate GPU: {name}");
            fallback = Some(Selection {
                physical,
                queue_family,
            });
        }
    }

    fallback.ok_or_else(|| {
        GpuError::NoSuitableDevice(
            "no device supports timeline semaphores, buffer device address, \
             and descriptor buffers"
                .into(),
        )
    })
}

/// A single family serving both graphics and compute keeps submission on one
/// timeline, matching the ordering guarantees the tracker relies on.
fn suitable_queue_family(instance: &ash::Instance, physical: vk::PhysicalDevice) -> Option<u32> {
    let families = unsafe { instance.get_physical_device_queue_family_properties(physical) };
    families.iter().position(|f| {
        f.queue_flags
            .contains(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE)
    }).map(|i| i as u32)
}

fn supports_required_features(instance: &ash::Instance, physical: vk::PhysicalDevice) -> bool {
    let extensions = unsafe { instance.enumerate_device_extension_properties(physical) }
        .unwrap_or_default();
    let has_descriptor_buffer = extensions.iter().any(|e| {
        e.extension_name_as_c_str()
            .is_ok_and(|name| name == ext::descriptor_buffer::NAME)
    });
    if !has_descriptor_buffer {
        return false;
    }

    let mut f12 = vk::PhysicalDeviceVulkan12Features::default();
    let mut f13 = vk::PhysicalDeviceVulkan13Features::default();
    let mut fdb = vk::PhysicalDeviceDescriptorBufferFeaturesEXT::default();
    let mut features = vk::PhysicalDeviceFeatures2::default()
        .push_next(&mut f12)
        .push_next(&mut f13)
        .push_next(&mut fdb);
    unsafe { instance.get_physical_device_features2(physical, &mut features) };

    f12.timeline_semaphore == vk::TRUE
        && f12.buffer_device_address == vk::TRUE
        && f12.runtime_descriptor_array == vk::TRUE
        && f13.synchronization2 == vk::TRUE
        && f13.dynamic_rendering == vk::TRUE
        && fdb.descriptor_buffer == vk::TRUE
}

fn create_logical_device(
    instance: &ash::Instance,
    physical: vk::PhysicalDevice,
    queue_family: u32,
) -> Result<ash::Device> {
    let queue_priorities = [1.0_f32];
    let queue_infos = [vk::DeviceQueueCreateInfo::default()
        .queue_family_index(queue_family)
        .queue_priorities(&queue_priorities)];

    let extensions = [ext::descriptor_buffer::NAME.as_ptr()];

    let base_features = vk::PhysicalDeviceFeatures::default().shader_int64(true);
    let mut features2 = vk::PhysicalDeviceFeatures2::default().features(base_features);
    let mut f12 = vk::PhysicalDeviceVulkan12Features::default()
        .timeline_semaphore(true)
        .buffer_device_address(true)
        .runtime_descriptor_array(true);
    let mut f13 = vk::PhysicalDeviceVulkan13Features::default()
        .synchronization2(true)
        .dynamic_rendering(true);
    let mut fdb =
        vk::PhysicalDeviceDescriptorBufferFeaturesEXT::default().descriptor_buffer(true);

    let device_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_infos)
        .enabled_extension_names(&extensions)
        .push_next(&mut features2)
        .push_next(&mut f12)
        .push_next(&mut f13)
        .push_next(&mut fdb);

    unsafe { instance.create_device(physical, &device_info, None) }
        .map_err(|e| GpuError::InitFailed(format!("device creation failed: {e}")))
}
