use core::ffi::c_void;
use core::ptr::NonNull;
use std::num::NonZeroUsize;

use nix::sys::mman;

/// Page-aligned anonymous mapping backing the ring arena.
///
/// `mmap` hands out whole pages, so the base address is always
/// page-aligned. The address-to-set mapping of the nodes depends on
/// that: a block starting mid-page would shift every line into a
/// different set than the one derived from its index.
pub struct MappedRegion {
    pointer: NonNull<c_void>,
    size: usize,
}

impl MappedRegion {
    pub fn new(length: NonZeroUsize) -> nix::Result<MappedRegion> {
        let pointer = unsafe {
            mman::mmap_anonymous(
                None,
                length,
                mman::ProtFlags::PROT_READ | mman::ProtFlags::PROT_WRITE,
                mman::MapFlags::MAP_PRIVATE | mman::MapFlags::MAP_ANONYMOUS,
            )
        }?;
        Ok(MappedRegion {
            pointer,
            size: length.get(),
        })
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.pointer.as_ptr() as *mut u8
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }
}

impl Drop for MappedRegion {
    fn drop(&mut self) {
        // Nothing sensible to do about an unmap failure at teardown.
        let _ = unsafe { mman::munmap(self.pointer, self.size) };
    }
}
