//! Device Configuration
//!
//! Global configuration consumed once during [`DeviceContext::new`] to set up
//! the instance, pick a physical device, and size the bindless heaps. No
//! runtime reconfiguration; create a second context instead.
//!
//! [`DeviceContext::new`]: crate::DeviceContext::new

/// Configuration for device-context initialization.
///
/// | Field                 | Description                             | Default      |
/// |-----------------------|-----------------------------------------|--------------|
/// | `validation`          | Enable the Khronos validation layer     | `false`      |
/// | `adapter_index`       | Force a physical device by index        | `None`       |
/// | `descriptor_capacity` | Entries per bindless descriptor heap    | `1024`       |
/// | `default_alignment`   | Alignment used by untyped allocations   | `256`        |
///
/// # Example
///
/// ```rust,ignore
/// use vanta::{DeviceConfig, DeviceContext};
///
/// let gpu = DeviceContext::new(&DeviceConfig {
///     validation: cfg!(debug_assertions),
///     ..Default::default()
/// })?;
/// ```
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    /// Enable `VK_LAYER_KHRONOS_validation` on the instance.
    ///
    /// Validation costs CPU time on every call; leave off in release builds.
    pub validation: bool,

    /// Force selection of a specific physical device by enumeration index.
    ///
    /// `None` picks the first device satisfying the required feature set,
    /// preferring discrete GPUs.
    pub adapter_index: Option<usize>,

    /// Number of entries in each bindless descriptor heap
    /// (sampled textures, storage textures, samplers).
    pub descriptor_capacity: u32,

    /// Alignment applied when an allocation does not request one explicitly.
    pub default_alignment: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            validation: false,
            adapter_index: None,
            descriptor_capacity: 1024,
            default_alignment: 256,
        }
    }
}
