//! GPU-Visible Memory
//!
//! Allocation records, the live-allocation registry, and the public
//! [`Allocation`] handle returned by
//! [`DeviceContext::allocate`](crate::DeviceContext::allocate).

mod address_space;

pub(crate) use address_space::{AddressSpace, AllocationRecord};

use std::ptr::NonNull;

use crate::types::DeviceAddress;

/// A live GPU-visible memory block.
///
/// The device address and the optional host pointer are two views of the
/// same bytes: `host_ptr + k` and `device_address + k` denote the same
/// underlying byte for all `0 <= k < size`, for the lifetime of the
/// allocation.
///
/// This is a plain value; dropping it does not free anything. Call
/// [`DeviceContext::free`](crate::DeviceContext::free) with either view.
///
/// # Preconditions
///
/// Freeing while previously submitted GPU work still reads or writes the
/// block is a use-after-free. This layer does not detect it; wait on the
/// relevant timeline value first.
#[derive(Debug, Clone, Copy)]
pub struct Allocation {
    size: u64,
    device_address: DeviceAddress,
    host_ptr: Option<NonNull<u8>>,
}

// The host pointer targets persistently mapped device memory, which is not
// tied to the creating thread.
unsafe impl Send for Allocation {}
unsafe impl Sync for Allocation {}

impl Allocation {
    pub(crate) fn new(size: u64, device_address: DeviceAddress, host_ptr: Option<NonNull<u8>>) -> Self {
        Self {
            size,
            device_address,
            host_ptr,
        }
    }

    /// Usable size in bytes (the requested size rounded up to alignment).
    #[inline]
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Base GPU virtual address of the block.
    #[inline]
    #[must_use]
    pub fn device_address(&self) -> DeviceAddress {
        self.device_address
    }

    /// Base host pointer, present only for host-visible memory classes.
    #[inline]
    #[must_use]
    pub fn host_ptr(&self) -> Option<NonNull<u8>> {
        self.host_ptr
    }

    /// Writes a plain-old-data value through the host mapping.
    ///
    /// Returns `false` when the allocation has no host mapping or the value
    /// does not fit at `offset`.
    ///
    /// # Safety
    ///
    /// The caller must guarantee no concurrent access (CPU or GPU) to the
    /// written range.
    pub unsafe fn write_pod<T: bytemuck::NoUninit>(&self, offset: u64, value: &T) -> bool {
        let len = size_of::<T>() as u64;
        let Some(ptr) = self.host_ptr else {
            return false;
        };
        if offset.checked_add(len).is_none_or(|end| end > self.size) {
            return false;
        }
        let bytes = bytemuck::bytes_of(value);
        unsafe {
            std::ptr::copy_nonoverlapping(
                bytes.as_ptr(),
                ptr.as_ptr().add(offset as usize),
                bytes.len(),
            );
        }
        true
    }

    /// Reads a plain-old-data value through the host mapping.
    ///
    /// # Safety
    ///
    /// The caller must guarantee no concurrent GPU write to the read range.
    pub unsafe fn read_pod<T: bytemuck::AnyBitPattern>(&self, offset: u64) -> Option<T> {
        let len = size_of::<T>() as u64;
        let ptr = self.host_ptr?;
        if offset.checked_add(len).is_none_or(|end| end > self.size) {
            return None;
        }
        let mut value = T::zeroed();
        unsafe {
            std::ptr::copy_nonoverlapping(
                ptr.as_ptr().add(offset as usize),
                std::ptr::from_mut(&mut value).cast::<u8>(),
                len as usize,
            );
        }
        Some(value)
    }
}
