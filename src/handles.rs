//! Resource Handles
//!
//! Every GPU object category gets its own generational key type, backed by a
//! slot map owned by the [`DeviceContext`]. Destroying a resource removes its
//! slot; any key kept past that point fails with
//! [`GpuError::StaleHandle`](crate::GpuError::StaleHandle) instead of
//! dereferencing freed native state.
//!
//! [`DeviceContext`]: crate::DeviceContext

use slotmap::new_key_type;

new_key_type! {
    /// Handle to a compiled compute or raster pipeline.
    pub struct PipelineKey;
    /// Handle to a texture (image + view) bound to caller-owned memory.
    pub struct TextureKey;
    /// Handle to a submission queue.
    pub struct QueueKey;
    /// Handle to a command buffer in the recording state.
    ///
    /// Retired at submission; the key goes stale once the batch is handed
    /// to the queue.
    pub struct CommandBufferKey;
    /// Handle to a timeline semaphore.
    pub struct SemaphoreKey;
}
