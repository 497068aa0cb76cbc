//! Pool allocator - fixed-size chunk allocation

use core::ptr::NonNull;

use parking_lot::Mutex;

use crate::allocator::{empty_block, is_empty_block, Allocator, Capabilities};
use crate::error::{AllocError, Result};
use crate::region::Region;
use crate::stats::{AllocatorStats, Counters};
use crate::{checked_aligned_size, effective_alignment, ALLOC_ALIGNMENT};

/// End of the free list
const NONE: usize = usize::MAX;

/// Free list bookkeeping
///
/// Chunks at or past `initialized_count` have never been handed out and are
/// linked implicitly, so creating a pool does not touch the buffer.
#[derive(Debug)]
struct PoolState {
    /// First free chunk, or [`NONE`]
    head: usize,
    free_count: usize,
    initialized_count: usize,
}

impl PoolState {
    const fn new(chunk_count: usize) -> Self {
        Self {
            head: 0,
            free_count: chunk_count,
            initialized_count: 0,
        }
    }
}

/// Pool allocator for fixed-size chunks
///
/// O(1) allocation and deallocation for objects of at most one chunk. The
/// free list lives inside the free chunks themselves. Thread-safe.
pub struct PoolAllocator<'a> {
    /// Backing memory
    region: Region<'a>,
    /// Chunk size, rounded up to [`ALLOC_ALIGNMENT`]
    chunk_size: usize,
    chunk_count: usize,
    state: Mutex<PoolState>,
    counters: Counters,
}

impl<'a> PoolAllocator<'a> {
    /// Bytes of backing memory needed for `chunk_count` chunks of `chunk_size`
    pub const fn buffer_size(chunk_size: usize, chunk_count: usize) -> Option<usize> {
        match checked_aligned_size(chunk_size) {
            Some(aligned) => aligned.checked_mul(chunk_count),
            None => None,
        }
    }

    /// Create a pool over a caller buffer of at least
    /// [`PoolAllocator::buffer_size`] bytes
    pub fn from_buffer(
        chunk_size: usize,
        chunk_count: usize,
        buffer: &'a mut [u8],
    ) -> Result<Self> {
        let needed = Self::required_size(chunk_size, chunk_count)?;
        if buffer.len() < needed {
            return Err(AllocError::InvalidArgument("pool buffer is too small"));
        }
        let region = Region::borrowed(&mut buffer[..needed])?;
        Ok(Self::from_region(region, chunk_count))
    }

    /// Create a pool whose chunks are reserved from `parent`
    pub fn with_parent(
        parent: &'a (dyn Allocator + Sync),
        chunk_size: usize,
        chunk_count: usize,
    ) -> Result<Self> {
        let needed = Self::required_size(chunk_size, chunk_count)?;
        let region = Region::from_parent(parent, needed)?;
        Ok(Self::from_region(region, chunk_count))
    }

    fn required_size(chunk_size: usize, chunk_count: usize) -> Result<usize> {
        if chunk_size == 0 || chunk_count == 0 {
            return Err(AllocError::InvalidArgument("pool chunk size and count must be non-zero"));
        }
        Self::buffer_size(chunk_size, chunk_count)
            .ok_or(AllocError::InvalidArgument("pool size overflows"))
    }

    fn from_region(region: Region<'a>, chunk_count: usize) -> Self {
        let chunk_size = region.len() / chunk_count;
        log::debug!("Pool allocator created with {} chunks of {} bytes", chunk_count, chunk_size);
        Self {
            region,
            chunk_size,
            chunk_count,
            state: Mutex::new(PoolState::new(chunk_count)),
            counters: Counters::new(),
        }
    }

    /// Aligned size of every chunk
    #[inline]
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    #[inline]
    pub fn chunk_count(&self) -> usize {
        self.chunk_count
    }

    /// Chunks available for allocation
    pub fn free_count(&self) -> usize {
        self.state.lock().free_count
    }

    /// Chunks that have been handed out at least once since creation or reset
    pub fn initialized_count(&self) -> usize {
        self.state.lock().initialized_count
    }

    /// Index of the next chunk to hand out
    pub fn head(&self) -> Option<usize> {
        Some(self.state.lock().head).filter(|head| *head != NONE)
    }

    /// Return every chunk to the pool at once
    pub fn reset(&mut self) {
        *self.state.get_mut() = PoolState::new(self.chunk_count);
        self.counters.clear();
    }

    /// Check the free list for consistency
    pub fn validate(&self) -> bool {
        let state = self.state.lock();
        if state.free_count > self.chunk_count || state.initialized_count > self.chunk_count {
            return false;
        }

        let mut index = state.head;
        let mut seen = 0;
        while index != NONE {
            if index >= self.chunk_count
                || index > state.initialized_count
                || seen >= state.free_count
            {
                return false;
            }
            if index == state.initialized_count {
                seen += self.chunk_count - state.initialized_count;
                break;
            }
            seen += 1;
            // SAFETY: index < initialized_count, so the chunk holds a link
            index = unsafe { self.next_of(index) };
        }

        seen == state.free_count
    }

    #[inline]
    fn chunk(&self, index: usize) -> NonNull<u8> {
        debug_assert!(index < self.chunk_count);
        // SAFETY: index < chunk_count keeps the offset inside the region
        unsafe { self.region.at(index * self.chunk_size) }
    }

    /// # Safety
    /// The chunk must be free and initialized.
    #[inline]
    unsafe fn next_of(&self, index: usize) -> usize {
        self.chunk(index).cast::<usize>().as_ptr().read()
    }

    #[inline]
    unsafe fn set_next(&self, index: usize, next: usize) {
        self.chunk(index).cast::<usize>().as_ptr().write(next);
    }

    /// Chunk index for a pointer previously returned by this pool
    fn index_of(&self, ptr: NonNull<u8>, state: &PoolState) -> Result<usize> {
        self.region
            .offset_of(ptr)
            .filter(|offset| offset % self.chunk_size == 0)
            .map(|offset| offset / self.chunk_size)
            .filter(|index| *index < state.initialized_count)
            .ok_or(AllocError::InvalidArgument("pointer not allocated from this pool"))
    }
}

impl Allocator for PoolAllocator<'_> {
    fn alloc(&self, size: usize, alignment: usize) -> Result<NonNull<u8>> {
        if effective_alignment(alignment)? > ALLOC_ALIGNMENT {
            return Err(AllocError::InvalidArgument("pool chunks are 16-byte aligned"));
        }
        if size == 0 {
            return Ok(empty_block());
        }
        if size > self.chunk_size {
            return Err(AllocError::InvalidArgument("allocation larger than the pool chunk size"));
        }

        let mut state = self.state.lock();
        if state.head == NONE {
            log::trace!("Pool allocator exhausted ({} chunks)", self.chunk_count);
            return Err(AllocError::CapacityExceeded {
                requested: self.chunk_size,
                available: 0,
            });
        }

        let index = state.head;
        if index == state.initialized_count {
            state.head = if index + 1 < self.chunk_count { index + 1 } else { NONE };
            state.initialized_count += 1;
        } else {
            // SAFETY: index is a free, initialized chunk
            state.head = unsafe { self.next_of(index) };
        }
        state.free_count -= 1;

        self.counters.add(self.chunk_size);
        self.counters.record_alloc();
        Ok(self.chunk(index))
    }

    unsafe fn free(&self, ptr: NonNull<u8>) -> Result<()> {
        if is_empty_block(ptr) {
            return Ok(());
        }

        let mut state = self.state.lock();
        let index = self.index_of(ptr, &state)?;
        if state.free_count >= self.chunk_count {
            return Err(AllocError::InvalidArgument("pool has no live chunks"));
        }

        self.set_next(index, state.head);
        state.head = index;
        state.free_count += 1;

        self.counters.release(self.chunk_size);
        self.counters.record_free();
        Ok(())
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::ALLOC_FREE
    }

    fn stats(&self) -> AllocatorStats {
        self.counters.snapshot()
    }
}

impl Drop for PoolAllocator<'_> {
    fn drop(&mut self) {
        let live = self.counters.snapshot().current_allocations;
        if live > 0 {
            log::warn!("Pool allocator dropped with {} chunks still allocated", live);
        }
    }
}
