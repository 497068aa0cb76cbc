//! Tracking allocator - provenance checks and leak reports

use core::ptr::NonNull;
use std::collections::HashMap;

use parking_lot::Mutex;

use crate::allocator::{is_empty_block, Allocator, Capabilities};
use crate::error::{AllocError, Result};
use crate::stats::AllocatorStats;
use crate::aligned_size;

/// Wraps an allocator and remembers every block it handed out
///
/// Frees and reallocs of pointers the wrapper does not know are rejected
/// before they reach the inner allocator. Blocks still live when the tracker
/// is dropped are reported as leaks.
pub struct TrackingAllocator<A> {
    inner: A,
    label: &'static str,
    /// Live block address -> aligned size
    live: Mutex<HashMap<usize, usize>>,
}

impl<A: Allocator> TrackingAllocator<A> {
    pub fn new(inner: A, label: &'static str) -> Self {
        Self {
            inner,
            label,
            live: Mutex::new(HashMap::new()),
        }
    }

    pub fn inner(&self) -> &A {
        &self.inner
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    /// Number of blocks currently live
    pub fn live_allocations(&self) -> usize {
        self.live.lock().len()
    }

    /// Bytes currently live (aligned sizes)
    pub fn live_bytes(&self) -> usize {
        self.live.lock().values().sum()
    }

    /// Whether `ptr` is a live block from this allocator
    pub fn owns(&self, ptr: NonNull<u8>) -> bool {
        self.live.lock().contains_key(&(ptr.as_ptr() as usize))
    }

    fn record(&self, ptr: NonNull<u8>, size: usize) {
        if !is_empty_block(ptr) {
            self.live.lock().insert(ptr.as_ptr() as usize, aligned_size(size));
        }
    }

    fn unknown(&self, ptr: NonNull<u8>) -> AllocError {
        log::warn!("[{}] rejected unknown pointer {:p}", self.label, ptr);
        AllocError::InvalidArgument("pointer not allocated from this allocator")
    }
}

impl<A: Allocator> Allocator for TrackingAllocator<A> {
    fn alloc(&self, size: usize, alignment: usize) -> Result<NonNull<u8>> {
        let ptr = self.inner.alloc(size, alignment)?;
        self.record(ptr, size);
        Ok(ptr)
    }

    unsafe fn realloc(
        &self,
        ptr: Option<NonNull<u8>>,
        size: usize,
        alignment: usize,
    ) -> Result<NonNull<u8>> {
        let old = ptr.filter(|ptr| !is_empty_block(*ptr));
        if let Some(old) = old {
            if !self.owns(old) {
                return Err(self.unknown(old));
            }
        }

        let new = self.inner.realloc(ptr, size, alignment)?;

        let mut live = self.live.lock();
        if let Some(old) = old {
            live.remove(&(old.as_ptr() as usize));
        }
        if !is_empty_block(new) {
            live.insert(new.as_ptr() as usize, aligned_size(size));
        }
        Ok(new)
    }

    unsafe fn free(&self, ptr: NonNull<u8>) -> Result<()> {
        if is_empty_block(ptr) {
            return Ok(());
        }

        let addr = ptr.as_ptr() as usize;
        let size = self.live.lock().remove(&addr).ok_or_else(|| self.unknown(ptr))?;

        if let Err(err) = self.inner.free(ptr) {
            self.live.lock().insert(addr, size);
            return Err(err);
        }
        Ok(())
    }

    fn capabilities(&self) -> Capabilities {
        self.inner.capabilities()
    }

    fn stats(&self) -> AllocatorStats {
        self.inner.stats()
    }
}

impl<A> Drop for TrackingAllocator<A> {
    fn drop(&mut self) {
        let live = self.live.get_mut();
        if live.is_empty() {
            return;
        }

        let bytes: usize = live.values().sum();
        log::warn!(
            "[{}] {} allocations ({} bytes) leaked",
            self.label,
            live.len(),
            bytes
        );
        for (addr, size) in live.iter() {
            log::debug!("[{}] leaked {} bytes at {:#x}", self.label, size, addr);
        }
    }
}
