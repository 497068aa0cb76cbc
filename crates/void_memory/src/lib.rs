//! # void_memory - Custom Memory Allocators
//!
//! Every engine subsystem allocates through the [`Allocator`] contract.
//! Concrete strategies:
//! - System: thread-safe heap wrapper with counters and an optional limit
//! - Stack: linear allocation over a fixed region with LIFO frees and markers
//! - Pool: fixed-size chunk allocation
//! - Buffer: linear packing into a fixed region, no individual frees
//!
//! Allocators without a native resize go through
//! [`realloc_with_fallback`], and owners consult [`keep_pointer`] to decide
//! whether they must remember an allocator to free what they got from it.

pub mod allocator;
pub mod buffer;
pub mod config;
pub mod error;
pub mod pool;
pub mod stack;
pub mod stats;
pub mod system;

mod region;

#[cfg(feature = "tracking")]
pub mod tracker;

pub use allocator::{
    alloc, alloc_aligned, empty_block, free, is_empty_block, keep_pointer, realloc,
    realloc_with_fallback, Allocator, Capabilities, Restrict,
};
pub use buffer::BufferAllocator;
pub use config::{MemoryConfig, PoolConfig};
pub use error::{AllocError, Result};
pub use pool::PoolAllocator;
pub use stack::{StackAllocator, StackMarker, StackScope};
pub use stats::AllocatorStats;
pub use system::{SystemAllocator, NO_LIMIT};

#[cfg(feature = "tracking")]
pub use tracker::TrackingAllocator;

pub use void_core::is_buffer_range_valid;

/// Alignment of every block handed out by the engine allocators.
///
/// Large enough for SIMD vector and matrix types.
pub const ALLOC_ALIGNMENT: usize = 16;

/// Largest alignment an allocation may request
pub const MAX_ALIGNMENT: usize = 4096;

/// Round `size` up to the next multiple of [`ALLOC_ALIGNMENT`]
///
/// Sizes within `ALLOC_ALIGNMENT - 1` of `usize::MAX` overflow; use
/// [`checked_aligned_size`] for untrusted sizes.
#[inline]
pub const fn aligned_size(size: usize) -> usize {
    align_up(size, ALLOC_ALIGNMENT)
}

/// [`aligned_size`] that reports overflow instead of wrapping
#[inline]
pub const fn checked_aligned_size(size: usize) -> Option<usize> {
    match size.checked_add(ALLOC_ALIGNMENT - 1) {
        Some(padded) => Some(padded & !(ALLOC_ALIGNMENT - 1)),
        None => None,
    }
}

/// Align a value up to the given alignment
#[inline]
pub const fn align_up(value: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    (value + align - 1) & !(align - 1)
}

/// Align a value down to the given alignment
#[inline]
pub const fn align_down(value: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    value & !(align - 1)
}

/// Check if a pointer is aligned
#[inline]
pub fn is_aligned(ptr: *const u8, align: usize) -> bool {
    (ptr as usize) & (align - 1) == 0
}

/// Validate a requested alignment and widen it to [`ALLOC_ALIGNMENT`]
#[inline]
pub(crate) fn effective_alignment(alignment: usize) -> Result<usize> {
    if !alignment.is_power_of_two() || alignment > MAX_ALIGNMENT {
        return Err(AllocError::InvalidArgument("alignment must be a power of two up to 4096"));
    }
    Ok(alignment.max(ALLOC_ALIGNMENT))
}

pub mod prelude {
    pub use crate::{
        alloc, alloc_aligned, free, keep_pointer, realloc, realloc_with_fallback, Allocator,
        AllocError, AllocatorStats, BufferAllocator, Capabilities, PoolAllocator, StackAllocator,
        SystemAllocator,
    };
    pub use crate::{aligned_size, align_down, align_up, is_aligned, ALLOC_ALIGNMENT, NO_LIMIT};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aligned_size_bounds() {
        for x in 0..1024usize {
            let a = aligned_size(x);
            assert!(a >= x);
            assert_eq!(a % ALLOC_ALIGNMENT, 0);
            assert!(a < x + ALLOC_ALIGNMENT);
        }
        assert_eq!(aligned_size(0), 0);
        assert_eq!(aligned_size(1), 16);
        assert_eq!(aligned_size(16), 16);
        assert_eq!(aligned_size(17), 32);
    }

    #[test]
    fn test_checked_aligned_size() {
        assert_eq!(checked_aligned_size(24), Some(32));
        assert_eq!(checked_aligned_size(usize::MAX - 15), Some(usize::MAX - 15));
        assert_eq!(checked_aligned_size(usize::MAX - 14), None);
        assert_eq!(checked_aligned_size(usize::MAX), None);
    }

    #[test]
    fn test_effective_alignment() {
        assert_eq!(effective_alignment(1).unwrap(), ALLOC_ALIGNMENT);
        assert_eq!(effective_alignment(16).unwrap(), 16);
        assert_eq!(effective_alignment(64).unwrap(), 64);
        assert!(effective_alignment(0).is_err());
        assert!(effective_alignment(24).is_err());
        assert!(effective_alignment(MAX_ALIGNMENT * 2).is_err());
    }
}
