//! Allocation bookkeeping

use core::sync::atomic::{AtomicUsize, Ordering};

use crate::error::{AllocError, Result};

/// Snapshot of an allocator's counters
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AllocatorStats {
    /// Bytes currently allocated (aligned sizes)
    pub size: usize,
    /// Successful allocations and reallocations over the allocator's lifetime
    pub total_allocations: usize,
    /// Allocations that have not been freed yet
    pub current_allocations: usize,
}

impl AllocatorStats {
    /// True when nothing is outstanding
    pub const fn is_empty(&self) -> bool {
        self.size == 0 && self.current_allocations == 0
    }
}

/// Shared counter block used by every allocator
///
/// All updates are atomic so the block can be shared between threads; the
/// single-threaded allocators pay nothing measurable for it.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    size: AtomicUsize,
    total: AtomicUsize,
    current: AtomicUsize,
}

impl Counters {
    pub(crate) const fn new() -> Self {
        Self {
            size: AtomicUsize::new(0),
            total: AtomicUsize::new(0),
            current: AtomicUsize::new(0),
        }
    }

    /// Claim `bytes` against `limit`, leaving the counters untouched on failure
    pub(crate) fn reserve(&self, bytes: usize, limit: usize) -> Result<()> {
        let mut current = self.size.load(Ordering::Relaxed);
        loop {
            let next = match current.checked_add(bytes) {
                Some(next) if next <= limit => next,
                _ => {
                    return Err(AllocError::CapacityExceeded {
                        requested: bytes,
                        available: limit.saturating_sub(current),
                    })
                }
            };

            match self.size.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Ok(()),
                Err(actual) => current = actual,
            }
        }
    }

    /// Add bytes whose capacity has already been checked by the caller
    #[inline]
    pub(crate) fn add(&self, bytes: usize) {
        self.size.fetch_add(bytes, Ordering::AcqRel);
    }

    /// Give back previously counted bytes
    #[inline]
    pub(crate) fn release(&self, bytes: usize) {
        let previous = self
            .size
            .fetch_update(Ordering::AcqRel, Ordering::Relaxed, |size| {
                Some(size.saturating_sub(bytes))
            })
            .unwrap_or(0);
        debug_assert!(previous >= bytes, "allocator size counter underflow");
    }

    #[inline]
    pub(crate) fn record_alloc(&self) {
        self.total.fetch_add(1, Ordering::Relaxed);
        self.current.fetch_add(1, Ordering::AcqRel);
    }

    #[inline]
    pub(crate) fn record_realloc(&self) {
        self.total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_free(&self) {
        let previous = self
            .current
            .fetch_update(Ordering::AcqRel, Ordering::Relaxed, |count| {
                Some(count.saturating_sub(1))
            })
            .unwrap_or(0);
        debug_assert!(previous > 0, "allocator allocation counter underflow");
    }

    /// Drop every live allocation at once (arena reset)
    pub(crate) fn clear(&self) {
        self.size.store(0, Ordering::Release);
        self.current.store(0, Ordering::Release);
    }

    /// Rewind live counters to an earlier snapshot
    pub(crate) fn restore(&self, stats: AllocatorStats) {
        self.size.store(stats.size, Ordering::Release);
        self.current.store(stats.current_allocations, Ordering::Release);
    }

    pub(crate) fn snapshot(&self) -> AllocatorStats {
        AllocatorStats {
            size: self.size.load(Ordering::Acquire),
            total_allocations: self.total.load(Ordering::Acquire),
            current_allocations: self.current.load(Ordering::Acquire),
        }
    }
}
