//! Stack allocator - LIFO allocation with markers

use core::cell::{Cell, RefCell};
use core::ptr::{self, NonNull};

use void_core::is_buffer_range_valid;

use crate::allocator::{empty_block, is_empty_block, Allocator, Capabilities};
use crate::error::{AllocError, Result};
use crate::region::Region;
use crate::stats::{AllocatorStats, Counters};
use crate::{align_up, checked_aligned_size, effective_alignment, is_aligned};

/// Record of one stack allocation
#[derive(Clone, Copy, Debug)]
struct StackEntry {
    /// Offset of the block from the region start
    offset: usize,
    /// Previous stack top (for deallocation)
    previous_top: usize,
    /// Aligned size of the block
    size: usize,
    /// Index of the entry a realloc moved this block to
    moved_to: Option<usize>,
}

impl StackEntry {
    fn is_live(&self) -> bool {
        self.moved_to.is_none()
    }
}

/// Stack allocator - LIFO allocation with markers
///
/// Fast allocator for frame-local and load-local data. Memory comes from a
/// caller buffer or a region reserved from a parent allocator. Individual
/// frees are accepted for the most recent allocation only; everything else is
/// reclaimed in bulk through [`StackAllocator::rollback`],
/// [`StackScope`] or [`StackAllocator::reset`].
///
/// Allocation records are kept outside the region, so every byte of the
/// capacity is available to blocks.
///
/// Not thread-safe: use one stack per thread.
pub struct StackAllocator<'a> {
    /// Backing memory
    region: Region<'a>,
    /// Current top of stack
    top: Cell<usize>,
    /// Allocations in stack order
    entries: RefCell<Vec<StackEntry>>,
    counters: Counters,
}

impl<'a> StackAllocator<'a> {
    /// Create a stack over a caller buffer
    ///
    /// The buffer must be non-empty and aligned to [`crate::ALLOC_ALIGNMENT`].
    pub fn from_buffer(buffer: &'a mut [u8]) -> Result<Self> {
        Ok(Self::from_region(Region::borrowed(buffer)?))
    }

    /// Create a stack over `capacity` bytes reserved from `parent`
    ///
    /// The region is returned to the parent when the stack is dropped, if the
    /// parent supports freeing.
    pub fn with_parent(parent: &'a (dyn Allocator + Sync), capacity: usize) -> Result<Self> {
        Ok(Self::from_region(Region::from_parent(parent, capacity)?))
    }

    fn from_region(region: Region<'a>) -> Self {
        log::debug!("Stack allocator created with {} bytes", region.len());
        Self {
            region,
            top: Cell::new(0),
            entries: RefCell::new(Vec::new()),
            counters: Counters::new(),
        }
    }

    /// Total capacity in bytes
    #[inline]
    pub fn capacity(&self) -> usize {
        self.region.len()
    }

    /// Current top position, alignment padding included
    #[inline]
    pub fn used(&self) -> usize {
        self.top.get()
    }

    /// Bytes left above the top
    #[inline]
    pub fn available(&self) -> usize {
        self.capacity() - self.used()
    }

    /// Get a marker for the current stack position
    pub fn marker(&self) -> StackMarker {
        StackMarker {
            top: self.top.get(),
            entries: self.entries.borrow().len(),
            stats: self.counters.snapshot(),
        }
    }

    /// Rollback to a previous marker, invalidating everything allocated since
    pub fn rollback(&self, marker: StackMarker) {
        let mut entries = self.entries.borrow_mut();
        if marker.top <= self.top.get() && marker.entries <= entries.len() {
            entries.truncate(marker.entries);
            // Blocks moved after the marker are live again
            for entry in entries.iter_mut() {
                if entry.moved_to.is_some_and(|to| to >= marker.entries) {
                    entry.moved_to = None;
                }
            }
            self.top.set(marker.top);
            self.counters.restore(marker.stats);
        }
    }

    /// Open a scope that rolls back when dropped
    pub fn scope(&self) -> StackScope<'_, 'a> {
        StackScope::new(self)
    }

    /// Invalidate every allocation at once
    pub fn reset(&mut self) {
        self.entries.get_mut().clear();
        self.top.set(0);
        self.counters.clear();
    }

    /// Position of the live allocation starting at `ptr` in the entry stack
    fn find(&self, entries: &[StackEntry], ptr: NonNull<u8>) -> Result<usize> {
        self.region
            .offset_of(ptr)
            .and_then(|offset| {
                entries
                    .iter()
                    .rposition(|entry| entry.is_live() && entry.offset == offset)
            })
            .ok_or(AllocError::InvalidArgument("pointer not allocated from this stack"))
    }

    /// Pop the top entry and any moved-from entries it uncovers
    fn pop(&self, entries: &mut Vec<StackEntry>) {
        while let Some(entry) = entries.pop() {
            self.top.set(entry.previous_top);
            if entries.last().map_or(true, StackEntry::is_live) {
                break;
            }
        }
    }

    fn capacity_exceeded(&self, end: usize) -> AllocError {
        let top = self.top.get();
        AllocError::CapacityExceeded {
            requested: end.saturating_sub(top),
            available: self.capacity() - top,
        }
    }
}

impl Allocator for StackAllocator<'_> {
    fn alloc(&self, size: usize, alignment: usize) -> Result<NonNull<u8>> {
        let alignment = effective_alignment(alignment)?;
        if size == 0 {
            return Ok(empty_block());
        }

        let size = checked_aligned_size(size)
            .ok_or(AllocError::InvalidArgument("allocation size overflows"))?;

        let top = self.top.get();
        let base = self.region.addr();

        // Calculate aligned offset
        let offset = align_up(base + top, alignment) - base;

        if !is_buffer_range_valid(offset, size, self.capacity()) {
            let err = self.capacity_exceeded(offset.saturating_add(size));
            log::trace!("Stack allocator refused {} bytes: {}", size, err);
            return Err(err);
        }

        self.entries.borrow_mut().push(StackEntry {
            offset,
            previous_top: top,
            size,
            moved_to: None,
        });
        self.top.set(offset + size);
        self.counters.add(size);
        self.counters.record_alloc();

        // SAFETY: offset < capacity
        Ok(unsafe { self.region.at(offset) })
    }

    /// Resizes the most recent allocation in place; any other block is moved
    /// to a new allocation and its old slot is reclaimed once everything
    /// above it is gone.
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

        let new_size = checked_aligned_size(size)
            .ok_or(AllocError::InvalidArgument("allocation size overflows"))?;

        let mut entries = self.entries.borrow_mut();
        let index = self.find(&entries, ptr)?;
        let entry = entries[index];

        if index + 1 == entries.len() && is_aligned(ptr.as_ptr(), alignment) {
            if !is_buffer_range_valid(entry.offset, new_size, self.capacity()) {
                return Err(self.capacity_exceeded(entry.offset.saturating_add(new_size)));
            }

            entries[index].size = new_size;
            self.top.set(entry.offset + new_size);
            if new_size > entry.size {
                self.counters.add(new_size - entry.size);
            } else {
                self.counters.release(entry.size - new_size);
            }
            self.counters.record_realloc();
            return Ok(ptr);
        }

        drop(entries);
        let block = self.alloc(size, alignment)?;
        ptr::copy_nonoverlapping(ptr.as_ptr(), block.as_ptr(), entry.size.min(new_size));

        let mut entries = self.entries.borrow_mut();
        let moved_to = entries.len() - 1;
        entries[index].moved_to = Some(moved_to);
        self.counters.release(entry.size);
        self.counters.record_free();
        Ok(block)
    }

    unsafe fn free(&self, ptr: NonNull<u8>) -> Result<()> {
        if is_empty_block(ptr) {
            return Ok(());
        }

        let mut entries = self.entries.borrow_mut();
        let index = self.find(&entries, ptr)?;

        // Verify this is the top allocation
        if index + 1 != entries.len() {
            return Err(AllocError::NotMostRecent);
        }

        let size = entries[index].size;
        self.pop(&mut entries);
        self.counters.release(size);
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

impl Drop for StackAllocator<'_> {
    fn drop(&mut self) {
        let live = self.counters.snapshot().current_allocations;
        if live > 0 {
            log::debug!("Stack allocator released with {} live allocations", live);
        }
    }
}

/// Marker for stack position
#[derive(Clone, Copy, Debug)]
pub struct StackMarker {
    top: usize,
    entries: usize,
    stats: AllocatorStats,
}

impl StackMarker {
    /// Stack position captured by the marker
    pub fn position(&self) -> usize {
        self.top
    }
}

/// Scoped stack allocator guard
pub struct StackScope<'s, 'a> {
    stack: &'s StackAllocator<'a>,
    marker: StackMarker,
}

impl<'s, 'a> StackScope<'s, 'a> {
    /// Create a new scoped stack
    pub fn new(stack: &'s StackAllocator<'a>) -> Self {
        Self {
            marker: stack.marker(),
            stack,
        }
    }

    /// Access the stack for allocations
    pub fn stack(&self) -> &StackAllocator<'a> {
        self.stack
    }
}

impl Drop for StackScope<'_, '_> {
    fn drop(&mut self) {
        self.stack.rollback(self.marker);
    }
}
