//! Buffer allocator - linear packing into a single block

use core::cell::Cell;
use core::ptr::NonNull;

use void_core::is_buffer_range_valid;

use crate::allocator::{empty_block, Allocator, Capabilities};
use crate::error::{AllocError, Result};
use crate::region::Region;
use crate::stats::{AllocatorStats, Counters};
use crate::{align_up, checked_aligned_size, effective_alignment};

/// Buffer allocator - packs several objects into one fixed buffer
///
/// Allocations are served linearly. Individual deallocations are not
/// supported, so [`crate::keep_pointer`] reports `None`: the memory goes
/// away with the buffer.
pub struct BufferAllocator<'a> {
    /// Backing memory
    region: Region<'a>,
    /// Current allocation offset
    offset: Cell<usize>,
    counters: Counters,
}

impl<'a> BufferAllocator<'a> {
    /// Create a buffer allocator over a caller buffer
    pub fn from_buffer(buffer: &'a mut [u8]) -> Result<Self> {
        Ok(Self::from_region(Region::borrowed(buffer)?))
    }

    /// Create a buffer allocator over raw memory
    ///
    /// # Safety
    /// `ptr` must be valid for reads and writes of `len` bytes for `'a` and
    /// must not be accessed through any other path meanwhile.
    pub unsafe fn from_raw_parts(ptr: NonNull<u8>, len: usize) -> Result<Self> {
        Ok(Self::from_region(Region::from_raw_parts(ptr, len)?))
    }

    /// Create a buffer allocator over `capacity` bytes reserved from `parent`
    pub fn with_parent(parent: &'a (dyn Allocator + Sync), capacity: usize) -> Result<Self> {
        Ok(Self::from_region(Region::from_parent(parent, capacity)?))
    }

    fn from_region(region: Region<'a>) -> Self {
        Self {
            region,
            offset: Cell::new(0),
            counters: Counters::new(),
        }
    }

    /// Total capacity in bytes
    #[inline]
    pub fn capacity(&self) -> usize {
        self.region.len()
    }

    /// Bytes consumed so far, alignment padding included
    #[inline]
    pub fn used(&self) -> usize {
        self.offset.get()
    }

    /// Rewind to the start of the buffer
    pub fn reset(&mut self) {
        self.offset.set(0);
        self.counters.clear();
    }
}

impl Allocator for BufferAllocator<'_> {
    fn alloc(&self, size: usize, alignment: usize) -> Result<NonNull<u8>> {
        let alignment = effective_alignment(alignment)?;
        if size == 0 {
            return Ok(empty_block());
        }

        let size = checked_aligned_size(size)
            .ok_or(AllocError::InvalidArgument("allocation size overflows"))?;

        // Calculate aligned offset
        let current = self.offset.get();
        let base = self.region.addr();
        let aligned_offset = align_up(base + current, alignment) - base;

        if !is_buffer_range_valid(aligned_offset, size, self.capacity()) {
            return Err(AllocError::CapacityExceeded {
                requested: aligned_offset.saturating_add(size) - current,
                available: self.capacity() - current,
            });
        }

        self.offset.set(aligned_offset + size);
        self.counters.add(size);
        self.counters.record_alloc();

        // SAFETY: aligned_offset + size <= capacity
        Ok(unsafe { self.region.at(aligned_offset) })
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::ALLOC_ONLY
    }

    fn stats(&self) -> AllocatorStats {
        self.counters.snapshot()
    }
}
