//! Backing memory for the linear and pool allocators

use core::marker::PhantomData;
use core::ptr::NonNull;

use crate::allocator::{alloc, keep_pointer, Allocator};
use crate::error::{AllocError, Result};
use crate::{is_aligned, ALLOC_ALIGNMENT};

/// A contiguous byte region, either borrowed from the caller or obtained from
/// a parent allocator.
///
/// A parent-owned region goes back to the parent on drop, but only when the
/// parent can free; otherwise the parent reclaims it with its own lifetime.
pub(crate) struct Region<'a> {
    base: NonNull<u8>,
    len: usize,
    owner: Option<&'a (dyn Allocator + Sync)>,
    _marker: PhantomData<&'a mut [u8]>,
}

// Safety: the region exclusively owns its bytes for 'a; access is mediated by
// the allocator that embeds it, and the owner is itself Sync.
unsafe impl Send for Region<'_> {}
unsafe impl Sync for Region<'_> {}

impl<'a> Region<'a> {
    /// Borrow a caller buffer for the region's lifetime
    pub(crate) fn borrowed(buffer: &'a mut [u8]) -> Result<Self> {
        let len = buffer.len();
        let base = NonNull::new(buffer.as_mut_ptr())
            .filter(|_| len > 0)
            .ok_or(AllocError::InvalidArgument("buffer must not be empty"))?;
        // SAFETY: base/len come from a live exclusive borrow
        unsafe { Self::from_raw_parts(base, len) }
    }

    /// Wrap raw memory the caller keeps alive and does not touch for 'a
    ///
    /// # Safety
    /// `base` must be valid for reads and writes of `len` bytes for 'a.
    pub(crate) unsafe fn from_raw_parts(base: NonNull<u8>, len: usize) -> Result<Self> {
        if len == 0 {
            return Err(AllocError::InvalidArgument("buffer must not be empty"));
        }
        if !is_aligned(base.as_ptr(), ALLOC_ALIGNMENT) {
            return Err(AllocError::InvalidArgument("buffer must be 16-byte aligned"));
        }
        Ok(Self {
            base,
            len,
            owner: None,
            _marker: PhantomData,
        })
    }

    /// Reserve `len` bytes from `parent`
    pub(crate) fn from_parent(parent: &'a (dyn Allocator + Sync), len: usize) -> Result<Self> {
        if len == 0 {
            return Err(AllocError::InvalidArgument("capacity must not be zero"));
        }
        let base = alloc(parent, len)?;
        Ok(Self {
            base,
            len,
            owner: keep_pointer(parent),
            _marker: PhantomData,
        })
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub(crate) fn addr(&self) -> usize {
        self.base.as_ptr() as usize
    }

    /// Offset of `ptr` from the start of the region, if it lies inside it
    /// (one-past-the-end included)
    #[inline]
    pub(crate) fn offset_of(&self, ptr: NonNull<u8>) -> Option<usize> {
        let offset = (ptr.as_ptr() as usize).checked_sub(self.addr())?;
        void_core::is_buffer_range_valid(offset, 0, self.len).then_some(offset)
    }

    /// Pointer to `offset` bytes into the region
    ///
    /// # Safety
    /// `offset` must not exceed the region length.
    #[inline]
    pub(crate) unsafe fn at(&self, offset: usize) -> NonNull<u8> {
        debug_assert!(offset <= self.len);
        NonNull::new_unchecked(self.base.as_ptr().add(offset))
    }
}

impl Drop for Region<'_> {
    fn drop(&mut self) {
        if let Some(owner) = self.owner.take() {
            // SAFETY: base was allocated from owner in from_parent
            if let Err(err) = unsafe { owner.free(self.base) } {
                log::warn!("Failed to return {} byte region to parent: {}", self.len, err);
            }
        }
    }
}
