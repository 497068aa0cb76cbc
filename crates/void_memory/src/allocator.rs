//! The allocator contract and its dispatch functions
//!
//! Engine code never talks to a concrete allocator directly. It receives an
//! `&dyn Allocator` (or a generic `A: Allocator`) and goes through the free
//! functions in this module, which honour the capability set each allocator
//! declares.

use core::ptr::{self, NonNull};

use crate::error::{AllocError, Result};
use crate::stats::AllocatorStats;
use crate::{ALLOC_ALIGNMENT, MAX_ALIGNMENT};

/// Optional operations an allocator provides beyond `alloc`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Capabilities {
    /// Blocks can be resized through [`Allocator::realloc`]
    pub realloc: bool,
    /// Blocks can be individually released through [`Allocator::free`]
    pub free: bool,
}

impl Capabilities {
    /// Allocation only (linear/static regions)
    pub const ALLOC_ONLY: Self = Self { realloc: false, free: false };
    /// Allocation and free, resizing must use the fallback
    pub const ALLOC_FREE: Self = Self { realloc: false, free: true };
    /// Every operation
    pub const ALL: Self = Self { realloc: true, free: true };

    /// Operations present in both sets
    pub const fn intersect(self, other: Self) -> Self {
        Self {
            realloc: self.realloc && other.realloc,
            free: self.free && other.free,
        }
    }
}

/// Common trait for all allocators
///
/// `realloc` and `free` are optional: an allocator that does not provide them
/// leaves the default bodies, which report [`AllocError::Unsupported`], and
/// declares their absence through [`Allocator::capabilities`].
///
/// Zero-size requests succeed with [`empty_block`], which is never
/// dereferenced and is always accepted back by `realloc` and `free`.
pub trait Allocator {
    /// Allocate `size` bytes aligned to at least `alignment`
    ///
    /// The returned block is aligned to `max(alignment, ALLOC_ALIGNMENT)`.
    fn alloc(&self, size: usize, alignment: usize) -> Result<NonNull<u8>>;

    /// Resize a block, in place or by moving it
    ///
    /// `None` allocates a fresh block. A size of zero frees the block and
    /// returns [`empty_block`]. On failure the original block is unchanged.
    ///
    /// # Safety
    /// `ptr` must be `None`, [`empty_block`], or a live block returned by this
    /// allocator.
    unsafe fn realloc(
        &self,
        ptr: Option<NonNull<u8>>,
        size: usize,
        alignment: usize,
    ) -> Result<NonNull<u8>> {
        let _ = (ptr, size, alignment);
        Err(AllocError::Unsupported("realloc"))
    }

    /// Release a block back to this allocator
    ///
    /// # Safety
    /// `ptr` must be [`empty_block`] or a live block returned by this
    /// allocator. It must not be used after a successful free.
    unsafe fn free(&self, ptr: NonNull<u8>) -> Result<()> {
        let _ = ptr;
        Err(AllocError::Unsupported("free"))
    }

    /// Which optional operations this allocator provides
    fn capabilities(&self) -> Capabilities;

    /// Current counters
    fn stats(&self) -> AllocatorStats;

    /// Whether blocks can be given back individually
    #[inline]
    fn supports_free(&self) -> bool {
        self.capabilities().free
    }

    /// Whether blocks can be resized natively
    #[inline]
    fn supports_realloc(&self) -> bool {
        self.capabilities().realloc
    }
}

impl<A: Allocator + ?Sized> Allocator for &A {
    #[inline]
    fn alloc(&self, size: usize, alignment: usize) -> Result<NonNull<u8>> {
        (**self).alloc(size, alignment)
    }

    #[inline]
    unsafe fn realloc(
        &self,
        ptr: Option<NonNull<u8>>,
        size: usize,
        alignment: usize,
    ) -> Result<NonNull<u8>> {
        (**self).realloc(ptr, size, alignment)
    }

    #[inline]
    unsafe fn free(&self, ptr: NonNull<u8>) -> Result<()> {
        (**self).free(ptr)
    }

    #[inline]
    fn capabilities(&self) -> Capabilities {
        (**self).capabilities()
    }

    #[inline]
    fn stats(&self) -> AllocatorStats {
        (**self).stats()
    }
}

/// Sentinel returned for zero-size allocations.
///
/// Its address is aligned for every supported alignment, it is never null,
/// and it must never be dereferenced.
#[inline]
pub const fn empty_block() -> NonNull<u8> {
    // SAFETY: MAX_ALIGNMENT is non-zero
    unsafe { NonNull::new_unchecked(MAX_ALIGNMENT as *mut u8) }
}

/// Whether `ptr` is the zero-size sentinel
#[inline]
pub fn is_empty_block(ptr: NonNull<u8>) -> bool {
    ptr == empty_block()
}

/// Allocate `size` bytes with the default alignment
#[inline]
pub fn alloc<A: Allocator + ?Sized>(allocator: &A, size: usize) -> Result<NonNull<u8>> {
    allocator.alloc(size, ALLOC_ALIGNMENT)
}

/// Allocate `size` bytes with an explicit alignment
#[inline]
pub fn alloc_aligned<A: Allocator + ?Sized>(
    allocator: &A,
    size: usize,
    alignment: usize,
) -> Result<NonNull<u8>> {
    allocator.alloc(size, alignment)
}

/// Resize through the allocator's native realloc
///
/// Fails with [`AllocError::InvalidArgument`] when the allocator has none;
/// use [`realloc_with_fallback`] to cover those allocators as well.
///
/// # Safety
/// Same contract as [`Allocator::realloc`].
pub unsafe fn realloc<A: Allocator + ?Sized>(
    allocator: &A,
    ptr: Option<NonNull<u8>>,
    size: usize,
) -> Result<NonNull<u8>> {
    if !allocator.supports_realloc() {
        return Err(AllocError::InvalidArgument("allocator has no realloc"));
    }
    allocator.realloc(ptr, size, ALLOC_ALIGNMENT)
}

/// Resize a block, emulating realloc with alloc + copy + free when the
/// allocator has no native resize.
///
/// `orig_size` is the size the block was allocated with and bounds the copy.
/// If the new allocation fails, the original block and its contents stay
/// valid and nothing is freed.
///
/// # Safety
/// `ptr` must be `None`, [`empty_block`], or a live block of at least
/// `orig_size` bytes returned by `allocator`.
pub unsafe fn realloc_with_fallback<A: Allocator + ?Sized>(
    allocator: &A,
    ptr: Option<NonNull<u8>>,
    orig_size: usize,
    new_size: usize,
) -> Result<NonNull<u8>> {
    if allocator.supports_realloc() {
        return allocator.realloc(ptr, new_size, ALLOC_ALIGNMENT);
    }

    if !allocator.supports_free() {
        return Err(AllocError::InvalidArgument("fallback realloc requires free"));
    }

    let original = ptr.filter(|ptr| !is_empty_block(*ptr));

    if new_size == 0 {
        if let Some(original) = original {
            allocator.free(original)?;
        }
        return Ok(empty_block());
    }

    let block = allocator.alloc(new_size, ALLOC_ALIGNMENT)?;

    if let Some(original) = original {
        ptr::copy_nonoverlapping(original.as_ptr(), block.as_ptr(), orig_size.min(new_size));

        if let Err(err) = allocator.free(original) {
            // Keep the original as the live block
            let _ = allocator.free(block);
            return Err(err);
        }
    }

    Ok(block)
}

/// Release a block
///
/// An allocator without the free capability reports
/// [`AllocError::Unsupported`] and the block stays valid. The zero-size
/// sentinel is accepted by every allocator.
///
/// # Safety
/// Same contract as [`Allocator::free`].
pub unsafe fn free<A: Allocator + ?Sized>(allocator: &A, ptr: NonNull<u8>) -> Result<()> {
    if is_empty_block(ptr) {
        return Ok(());
    }
    if !allocator.supports_free() {
        return Err(AllocError::Unsupported("free"));
    }
    allocator.free(ptr)
}

/// The allocator to remember for freeing later, if there is anything to free.
///
/// Owners store the result: `Some` means memory must be routed back through
/// this allocator, `None` means the allocator cannot free and the memory is
/// reclaimed with the allocator itself.
#[inline]
pub fn keep_pointer<A: Allocator + ?Sized>(allocator: &A) -> Option<&A> {
    if allocator.supports_free() {
        Some(allocator)
    } else {
        None
    }
}

/// Exposes a subset of another allocator's capabilities.
///
/// Useful for handing a general allocator to code that must treat it as a
/// bulk-reclaimed or non-resizing strategy.
#[derive(Debug)]
pub struct Restrict<A> {
    inner: A,
    mask: Capabilities,
}

impl<A: Allocator> Restrict<A> {
    /// Wrap `inner`, keeping only the capabilities in `mask`
    pub fn new(inner: A, mask: Capabilities) -> Self {
        Self { inner, mask }
    }

    /// `inner` without the free capability
    pub fn without_free(inner: A) -> Self {
        Self::new(inner, Capabilities { realloc: true, free: false })
    }

    /// `inner` without native realloc
    pub fn without_realloc(inner: A) -> Self {
        Self::new(inner, Capabilities::ALLOC_FREE)
    }

    /// The wrapped allocator
    pub fn inner(&self) -> &A {
        &self.inner
    }

    /// Unwrap
    pub fn into_inner(self) -> A {
        self.inner
    }
}

impl<A: Allocator> Allocator for Restrict<A> {
    fn alloc(&self, size: usize, alignment: usize) -> Result<NonNull<u8>> {
        self.inner.alloc(size, alignment)
    }

    unsafe fn realloc(
        &self,
        ptr: Option<NonNull<u8>>,
        size: usize,
        alignment: usize,
    ) -> Result<NonNull<u8>> {
        if !self.supports_realloc() {
            return Err(AllocError::Unsupported("realloc"));
        }
        // Resizing to zero frees the block
        if size == 0 && !self.supports_free() && ptr.is_some_and(|p| !is_empty_block(p)) {
            return Err(AllocError::Unsupported("free"));
        }
        self.inner.realloc(ptr, size, alignment)
    }

    unsafe fn free(&self, ptr: NonNull<u8>) -> Result<()> {
        if !self.supports_free() {
            return Err(AllocError::Unsupported("free"));
        }
        self.inner.free(ptr)
    }

    fn capabilities(&self) -> Capabilities {
        self.inner.capabilities().intersect(self.mask)
    }

    fn stats(&self) -> AllocatorStats {
        self.inner.stats()
    }
}
