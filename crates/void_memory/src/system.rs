//! System allocator - thread-safe heap wrapper with counters and a limit

use core::mem;
use core::ptr::{self, NonNull};
use std::alloc::{self as heap, Layout};

use crate::allocator::{empty_block, is_empty_block, Allocator, Capabilities};
use crate::config::MemoryConfig;
use crate::error::{AllocError, Result};
use crate::stats::{AllocatorStats, Counters};
use crate::{aligned_size, checked_aligned_size, effective_alignment};

/// Limit value meaning the allocator is unbounded
pub const NO_LIMIT: usize = usize::MAX;

/// Bookkeeping stored immediately before every user block
#[repr(C)]
#[derive(Clone, Copy)]
struct BlockHeader {
    /// Aligned size of the user block
    size: usize,
    /// Alignment the block was allocated with
    alignment: usize,
}

/// Top-level allocator over the process heap
///
/// Counters are updated atomically and the limit is enforced before the heap
/// is touched, so one instance can be shared by every thread in the engine.
///
/// # Example
///
/// ```
/// use void_memory::prelude::*;
///
/// let system = SystemAllocator::new(1024 * 1024).unwrap();
/// let ptr = alloc(&system, 100).unwrap();
/// assert_eq!(system.stats().size, 112);
/// unsafe { free(&system, ptr).unwrap() };
/// ```
pub struct SystemAllocator {
    counters: Counters,
    limit: usize,
}

impl SystemAllocator {
    const HEADER_SIZE: usize = aligned_size(mem::size_of::<BlockHeader>());

    /// Create an allocator that refuses to hold more than `limit` bytes
    ///
    /// Pass [`NO_LIMIT`] for an unbounded allocator. A limit of zero is
    /// rejected.
    pub fn new(limit: usize) -> Result<Self> {
        if limit == 0 {
            return Err(AllocError::InvalidArgument("limit must not be zero"));
        }
        if limit == NO_LIMIT {
            log::debug!("System allocator created without limit");
        } else {
            log::debug!("System allocator created with {} byte limit", limit);
        }
        Ok(Self {
            counters: Counters::new(),
            limit,
        })
    }

    /// Create an allocator without limit
    pub const fn unbounded() -> Self {
        Self {
            counters: Counters::new(),
            limit: NO_LIMIT,
        }
    }

    /// Create from the engine memory configuration
    pub fn from_config(config: &MemoryConfig) -> Result<Self> {
        config.validate()?;
        Self::new(config.system_limit.unwrap_or(NO_LIMIT))
    }

    /// The configured limit, [`NO_LIMIT`] if unbounded
    #[inline]
    pub const fn limit(&self) -> usize {
        self.limit
    }

    /// Bytes that can still be allocated before reaching the limit
    pub fn remaining(&self) -> usize {
        self.limit.saturating_sub(self.counters.snapshot().size)
    }

    #[inline]
    const fn header_len(alignment: usize) -> usize {
        if alignment > Self::HEADER_SIZE {
            alignment
        } else {
            Self::HEADER_SIZE
        }
    }

    fn block_layout(size: usize, alignment: usize) -> Result<Layout> {
        Self::header_len(alignment)
            .checked_add(size)
            .and_then(|total| Layout::from_size_align(total, alignment).ok())
            .ok_or(AllocError::InvalidArgument("allocation size overflows"))
    }

    #[inline]
    unsafe fn header(ptr: NonNull<u8>) -> *mut BlockHeader {
        ptr.as_ptr().sub(mem::size_of::<BlockHeader>()).cast()
    }

    /// Base pointer and layout of the heap block behind `ptr`
    #[inline]
    unsafe fn heap_block(ptr: NonNull<u8>, header: BlockHeader) -> (*mut u8, Layout) {
        let header_len = Self::header_len(header.alignment);
        let layout = Layout::from_size_align_unchecked(header_len + header.size, header.alignment);
        (ptr.as_ptr().sub(header_len), layout)
    }

    /// Write the header into a fresh heap block and return the user pointer
    #[inline]
    unsafe fn init_block(base: NonNull<u8>, size: usize, alignment: usize) -> NonNull<u8> {
        let ptr = NonNull::new_unchecked(base.as_ptr().add(Self::header_len(alignment)));
        Self::header(ptr).write(BlockHeader { size, alignment });
        ptr
    }

    unsafe fn resize(
        &self,
        ptr: NonNull<u8>,
        header: BlockHeader,
        new_layout: Layout,
        size: usize,
        alignment: usize,
    ) -> Option<NonNull<u8>> {
        let (old_base, old_layout) = Self::heap_block(ptr, header);

        if header.alignment == alignment {
            let base = NonNull::new(heap::realloc(old_base, old_layout, new_layout.size()))?;
            return Some(Self::init_block(base, size, alignment));
        }

        let base = NonNull::new(heap::alloc(new_layout))?;
        let block = Self::init_block(base, size, alignment);
        ptr::copy_nonoverlapping(ptr.as_ptr(), block.as_ptr(), header.size.min(size));
        heap::dealloc(old_base, old_layout);
        Some(block)
    }
}

impl Allocator for SystemAllocator {
    fn alloc(&self, size: usize, alignment: usize) -> Result<NonNull<u8>> {
        let alignment = effective_alignment(alignment)?;
        if size == 0 {
            return Ok(empty_block());
        }

        let size = checked_aligned_size(size)
            .ok_or(AllocError::InvalidArgument("allocation size overflows"))?;
        let layout = Self::block_layout(size, alignment)?;

        self.counters.reserve(size, self.limit).map_err(|err| {
            log::trace!("System allocator refused {} bytes: {}", size, err);
            err
        })?;

        // SAFETY: layout has a non-zero size
        let Some(base) = NonNull::new(unsafe { heap::alloc(layout) }) else {
            self.counters.release(size);
            return Err(AllocError::HeapExhausted { size });
        };

        // SAFETY: base points to header_len + size fresh bytes
        let ptr = unsafe { Self::init_block(base, size, alignment) };
        self.counters.record_alloc();
        Ok(ptr)
    }

    unsafe fn realloc(
        &self,
        ptr: Option<NonNull<u8>>,
        size: usize,
        alignment: usize,
    ) -> Result<NonNull<u8>> {
        let alignment = effective_alignment(alignment)?;
        let Some(ptr) = ptr.filter(|ptr| !is_empty_block(*ptr)) else {
            return self.alloc(size, alignment);
        };

        if size == 0 {
            self.free(ptr)?;
            return Ok(empty_block());
        }

        let size = checked_aligned_size(size)
            .ok_or(AllocError::InvalidArgument("allocation size overflows"))?;
        let new_layout = Self::block_layout(size, alignment)?;
        let header = Self::header(ptr).read();

        let growth = size.saturating_sub(header.size);
        if growth > 0 {
            self.counters.reserve(growth, self.limit)?;
        }

        match self.resize(ptr, header, new_layout, size, alignment) {
            Some(block) => {
                self.counters.release(header.size.saturating_sub(size));
                self.counters.record_realloc();
                Ok(block)
            }
            None => {
                self.counters.release(growth);
                Err(AllocError::HeapExhausted { size })
            }
        }
    }

    unsafe fn free(&self, ptr: NonNull<u8>) -> Result<()> {
        if is_empty_block(ptr) {
            return Ok(());
        }

        let header = Self::header(ptr).read();
        let (base, layout) = Self::heap_block(ptr, header);
        heap::dealloc(base, layout);

        self.counters.release(header.size);
        self.counters.record_free();
        Ok(())
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::ALL
    }

    fn stats(&self) -> AllocatorStats {
        self.counters.snapshot()
    }
}

impl Default for SystemAllocator {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl Drop for SystemAllocator {
    fn drop(&mut self) {
        let stats = self.counters.snapshot();
        if !stats.is_empty() {
            log::warn!(
                "System allocator dropped with {} live allocations ({} bytes)",
                stats.current_allocations,
                stats.size
            );
        }
    }
}
