//! Unified CPU/GPU Address Space
//!
//! The registry of live allocations and the containment lookup that turns an
//! arbitrary pointer — host or device — back into the record that owns it.
//!
//! # Design
//!
//! 1. Each record covers two congruent half-open byte ranges: the device
//!    range `[device_address, device_address + size)` and, when host-mapped,
//!    the host range of identical length. `host + k` and `device + k` name
//!    the same byte.
//! 2. Ranges from distinct records never overlap — every record is backed by
//!    an independent native allocation — so a containment scan finds at most
//!    one owner and scan order is irrelevant to correctness.
//! 3. The registry is an insertion-ordered `Vec` with a linear scan. That is
//!    a deliberate ceiling: live-allocation counts under this interface sit
//!    in the tens to low hundreds, where a scan beats tree bookkeeping. If
//!    that ever changes, the non-overlap guarantee admits a sorted-by-base
//!    binary search without touching callers.
//!
//! Native resource creation and release live in the device layer; this
//! module only manages the records, so its logic is testable without a GPU.

use std::ptr::NonNull;

use ash::vk;

use crate::errors::{GpuError, Result};
use crate::types::{DeviceAddress, PtrOrAddress};

/// One live allocation: the pair of congruent views plus the exclusively
/// owned native backing handles.
pub(crate) struct AllocationRecord {
    /// Usable size in bytes of both views.
    pub size: u64,
    /// Base GPU virtual address, already adjusted for the requested
    /// alignment. Never 0 for a live record.
    pub device_address: DeviceAddress,
    /// Base host pointer, adjusted by the same alignment offset as
    /// `device_address`. `None` for device-local-only memory.
    pub host_ptr: Option<NonNull<u8>>,
    /// Forward offset applied to both views to satisfy alignment.
    /// `device_address - align_offset` is the native buffer's base address.
    pub align_offset: u64,
    /// Owned native buffer; destroyed exactly once, on removal.
    pub buffer: vk::Buffer,
    /// Owned native memory; freed exactly once, on removal.
    pub memory: vk::DeviceMemory,
}

// Host pointers target persistently mapped device memory; records move
// freely across threads under the registry lock.
unsafe impl Send for AllocationRecord {}

impl AllocationRecord {
    /// Half-open device-range containment. The base itself is contained;
    /// `base + size` is not.
    #[inline]
    fn contains_address(&self, address: DeviceAddress) -> bool {
        address >= self.device_address && address - self.device_address < self.size
    }

    /// Half-open host-range containment; always false when not host-mapped.
    #[inline]
    fn contains_host(&self, ptr: *const u8) -> bool {
        match self.host_ptr {
            Some(base) => {
                let base = base.as_ptr() as usize;
                let p = ptr as usize;
                p >= base && p - base < self.size as usize
            }
            None => false,
        }
    }

    fn contains(&self, reference: PtrOrAddress) -> bool {
        match reference {
            PtrOrAddress::Host(ptr) => self.contains_host(ptr),
            PtrOrAddress::Device(address) => self.contains_address(address),
        }
    }
}

/// Insertion-ordered collection of live allocation records.
#[derive(Default)]
pub(crate) struct AddressSpace {
    records: Vec<AllocationRecord>,
}

impl AddressSpace {
    pub fn insert(&mut self, record: AllocationRecord) {
        debug_assert!(record.size > 0);
        debug_assert!(record.device_address != 0);
        self.records.push(record);
    }

    /// Finds the record whose device range contains `address`.
    pub fn find_by_address(&self, address: DeviceAddress) -> Option<&AllocationRecord> {
        self.records.iter().find(|r| r.contains_address(address))
    }

    /// Removes and returns the owning record, handing backing-handle
    /// ownership to the caller. `None` when nothing contains `reference`.
    pub fn take(&mut self, reference: PtrOrAddress) -> Option<AllocationRecord> {
        let index = self.records.iter().position(|r| r.contains(reference))?;
        Some(self.records.swap_remove(index))
    }

    /// Translates a host pointer to the congruent device address.
    pub fn resolve(&self, ptr: *const u8) -> Result<DeviceAddress> {
        for record in &self.records {
            if let Some(base) = record.host_ptr {
                let base = base.as_ptr() as usize;
                let p = ptr as usize;
                if p >= base && p - base < record.size as usize {
                    // Congruence: identical offset from either base.
                    return Ok(record.device_address + (p - base) as u64);
                }
            }
        }
        Err(GpuError::UnresolvedPointer(ptr as u64))
    }

    /// Resolves a device address to `(record, byte offset within it)`, the
    /// form copy and draw commands need.
    pub fn locate(&self, address: DeviceAddress) -> Result<(&AllocationRecord, u64)> {
        let record = self
            .find_by_address(address)
            .ok_or(GpuError::UnresolvedPointer(address))?;
        Ok((record, address - record.device_address))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Removes every record, for device teardown.
    pub fn drain(&mut self) -> Vec<AllocationRecord> {
        std::mem::take(&mut self.records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Synthetic records: real host backing from leaked boxes, fabricated
    // device addresses, null native handles. The registry never touches the
    // native handles, so no device is needed.
    fn record(device_base: u64, size: u64, host: bool) -> AllocationRecord {
        let host_ptr = host.then(|| {
            let block = Box::leak(vec![0_u8; size as usize].into_boxed_slice());
            NonNull::new(block.as_mut_ptr()).unwrap()
        });
        AllocationRecord {
            size,
            device_address: device_base,
            host_ptr,
            align_offset: 0,
            buffer: vk::Buffer::null(),
            memory: vk::DeviceMemory::null(),
        }
    }

    #[test]
    fn base_is_contained_end_is_not() {
        let mut space = AddressSpace::default();
        space.insert(record(0x1000, 256, false));

        assert!(space.find_by_address(0x1000).is_some());
        assert!(space.find_by_address(0x1000 + 255).is_some());
        // Exclusive upper bound.
        assert!(space.find_by_address(0x1000 + 256).is_none());
        assert!(space.find_by_address(0x0fff).is_none());
    }

    #[test]
    fn interior_pointer_resolves_to_owner() {
        let mut space = AddressSpace::default();
        space.insert(record(0x1000, 256, false));
        space.insert(record(0x8000, 4096, false));
        space.insert(record(0x2_0000, 64, false));

        let (owner, offset) = space.locate(0x8000 + 100).unwrap();
        assert_eq!(owner.device_address, 0x8000);
        assert_eq!(offset, 100);
    }

    #[test]
    fn resolve_roundtrip_through_host_view() {
        let mut space = AddressSpace::default();
        space.insert(record(0x4000, 512, true));

        let base = space.find_by_address(0x4000).unwrap().host_ptr.unwrap();
        // Base pointer resolves to the base address.
        assert_eq!(space.resolve(base.as_ptr()).unwrap(), 0x4000);
        // Interior pointer keeps the identical offset (congruence).
        let interior = unsafe { base.as_ptr().add(37) };
        assert_eq!(space.resolve(interior).unwrap(), 0x4000 + 37);
    }

    #[test]
    fn host_end_pointer_does_not_resolve() {
        let mut space = AddressSpace::default();
        space.insert(record(0x4000, 512, true));

        let base = space.find_by_address(0x4000).unwrap().host_ptr.unwrap();
        let end = unsafe { base.as_ptr().add(512) };
        assert!(matches!(
            space.resolve(end),
            Err(GpuError::UnresolvedPointer(_))
        ));
    }

    #[test]
    fn resolve_unknown_pointer_fails() {
        let space = AddressSpace::default();
        let stray = 0xdead_usize as *const u8;
        assert!(matches!(
            space.resolve(stray),
            Err(GpuError::UnresolvedPointer(_))
        ));
    }

    #[test]
    fn take_removes_record_through_either_view() {
        let mut space = AddressSpace::default();
        space.insert(record(0x4000, 512, true));
        space.insert(record(0x9000, 128, false));

        let host = space.find_by_address(0x4000).unwrap().host_ptr.unwrap();
        let taken = space
            .take(PtrOrAddress::Host(host.as_ptr().cast_const()))
            .unwrap();
        assert_eq!(taken.device_address, 0x4000);
        assert_eq!(space.len(), 1);
        // A later resolve through the freed host view must fail.
        assert!(space.resolve(host.as_ptr()).is_err());

        let taken = space.take(PtrOrAddress::Device(0x9000 + 64)).unwrap();
        assert_eq!(taken.device_address, 0x9000);
        assert_eq!(space.len(), 0);
    }

    #[test]
    fn take_unknown_reference_is_none() {
        let mut space = AddressSpace::default();
        space.insert(record(0x4000, 512, false));

        assert!(space.take(PtrOrAddress::Device(0x7777)).is_none());
        assert_eq!(space.len(), 1);
    }

    #[test]
    fn disjoint_records_each_own_their_range() {
        let mut space = AddressSpace::default();
        // Adjacent but non-overlapping: [0x1000, 0x1100) and [0x1100, 0x1200).
        space.insert(record(0x1000, 0x100, false));
        space.insert(record(0x1100, 0x100, false));

        assert_eq!(space.find_by_address(0x10ff).unwrap().device_address, 0x1000);
        assert_eq!(space.find_by_address(0x1100).unwrap().device_address, 0x1100);
    }
}
