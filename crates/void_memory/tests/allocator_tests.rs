//! Allocator contract tests for void_memory
//!
//! Every allocator is driven through `&dyn Allocator` and the dispatch
//! functions, the way engine subsystems use them.

use std::ptr::NonNull;

use void_memory::prelude::*;
use void_memory::{empty_block, is_empty_block, Restrict, TrackingAllocator};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[repr(C, align(16))]
struct Storage([u8; 4096]);

impl Storage {
    fn new() -> Box<Self> {
        Box::new(Self([0; 4096]))
    }
}

/// Array that frees its block on drop only if its allocator asked to be kept
struct OwnedArray<'a> {
    data: NonNull<u8>,
    len: usize,
    allocator: Option<&'a dyn Allocator>,
}

impl<'a> OwnedArray<'a> {
    fn new(allocator: &'a dyn Allocator, len: usize) -> void_memory::Result<Self> {
        let data = alloc(allocator, len)?;
        Ok(Self {
            data,
            len,
            allocator: keep_pointer(allocator),
        })
    }

    fn fill(&mut self, value: u8) {
        unsafe { self.data.as_ptr().write_bytes(value, self.len) };
    }

    fn get(&self, index: usize) -> u8 {
        assert!(index < self.len);
        unsafe { *self.data.as_ptr().add(index) }
    }
}

impl Drop for OwnedArray<'_> {
    fn drop(&mut self) {
        if let Some(allocator) = self.allocator {
            unsafe { free(allocator, self.data) }.unwrap();
        }
    }
}

fn check_alignment(allocator: &dyn Allocator) -> Vec<NonNull<u8>> {
    [1, 7, 16, 33, 100]
        .into_iter()
        .map(|size| {
            let ptr = alloc(allocator, size).unwrap();
            assert!(is_aligned(ptr.as_ptr(), ALLOC_ALIGNMENT), "size {}", size);
            assert!(!is_empty_block(ptr));
            ptr
        })
        .collect()
}

#[test]
fn test_every_allocator_aligns() {
    init_logging();

    let system = SystemAllocator::unbounded();
    let mut stack_storage = Storage::new();
    let mut buffer_storage = Storage::new();
    let mut pool_storage = Storage::new();

    let stack = StackAllocator::from_buffer(&mut stack_storage.0).unwrap();
    let buffer = BufferAllocator::from_buffer(&mut buffer_storage.0).unwrap();
    let pool = PoolAllocator::from_buffer(128, 32, &mut pool_storage.0).unwrap();

    // The stack, buffer and pool reclaim their regions wholesale
    check_alignment(&stack);
    check_alignment(&buffer);
    check_alignment(&pool);

    let tracker = TrackingAllocator::new(&system, "alignment");
    let blocks = check_alignment(&tracker);
    assert_eq!(tracker.live_allocations(), blocks.len());
    for ptr in blocks {
        unsafe { free(&tracker, ptr) }.unwrap();
    }
    assert_eq!(tracker.live_allocations(), 0);
    assert!(system.stats().is_empty());
}

#[test]
fn test_zero_size_block() {
    init_logging();

    let system = SystemAllocator::unbounded();
    let mut storage = Storage::new();
    let stack = StackAllocator::from_buffer(&mut storage.0).unwrap();

    for allocator in [&system as &dyn Allocator, &stack] {
        let ptr = alloc(allocator, 0).unwrap();
        assert_eq!(ptr, empty_block());
        assert!(allocator.stats().is_empty());

        let grown = unsafe { realloc(allocator, Some(ptr), 32) }.unwrap();
        assert!(!is_empty_block(grown));
        unsafe { free(allocator, grown) }.unwrap();
        unsafe { free(allocator, empty_block()) }.unwrap();
    }
    assert!(system.stats().is_empty());
}

#[test]
fn test_keep_pointer_owner() {
    init_logging();

    let system = SystemAllocator::unbounded();
    {
        let mut array = OwnedArray::new(&system, 64).unwrap();
        array.fill(5);
        assert_eq!(array.get(63), 5);
        assert!(array.allocator.is_some());
        assert_eq!(system.stats().current_allocations, 1);
    }
    assert!(system.stats().is_empty());

    let mut storage = Storage::new();
    let buffer = BufferAllocator::from_buffer(&mut storage.0).unwrap();
    {
        let mut array = OwnedArray::new(&buffer, 64).unwrap();
        array.fill(9);
        assert!(array.allocator.is_none());
    }
    assert_eq!(buffer.stats().current_allocations, 1);

    let no_free = Restrict::without_free(&system);
    let block;
    {
        let array = OwnedArray::new(&no_free, 32).unwrap();
        assert!(array.allocator.is_none());
        block = array.data;
    }
    assert_eq!(system.stats().current_allocations, 1);
    unsafe { free(&system, block) }.unwrap();
}

#[test]
fn test_fallback_realloc_across_allocators() {
    init_logging();

    let system = SystemAllocator::unbounded();
    let mut storage = Storage::new();
    let pool = PoolAllocator::from_buffer(256, 16, &mut storage.0).unwrap();
    let no_realloc = Restrict::without_realloc(&system);

    for allocator in [&pool as &dyn Allocator, &no_realloc, &system] {
        let ptr = alloc(allocator, 64).unwrap();
        for i in 0..64 {
            unsafe { *ptr.as_ptr().add(i) = i as u8 };
        }

        let grown = unsafe { realloc_with_fallback(allocator, Some(ptr), 64, 200) }.unwrap();
        for i in 0..64 {
            assert_eq!(unsafe { *grown.as_ptr().add(i) }, i as u8);
        }

        let shrunk = unsafe { realloc_with_fallback(allocator, Some(grown), 200, 16) }.unwrap();
        for i in 0..16 {
            assert_eq!(unsafe { *shrunk.as_ptr().add(i) }, i as u8);
        }

        let gone = unsafe { realloc_with_fallback(allocator, Some(shrunk), 16, 0) }.unwrap();
        assert!(is_empty_block(gone));
        assert!(allocator.stats().is_empty());
    }
    assert!(system.stats().is_empty());
    assert!(pool.validate());
}

#[test]
fn test_fallback_failure_keeps_original() {
    init_logging();

    let system = SystemAllocator::new(256).unwrap();
    let no_realloc = Restrict::without_realloc(&system);

    let ptr = alloc(&no_realloc, 100).unwrap();
    unsafe { ptr.as_ptr().write_bytes(0xAB, 100) };

    let err = unsafe { realloc_with_fallback(&no_realloc, Some(ptr), 100, 200) }.unwrap_err();
    assert!(err.is_out_of_memory());
    assert_eq!(unsafe { *ptr.as_ptr().add(99) }, 0xAB);
    assert_eq!(system.stats().current_allocations, 1);

    unsafe { free(&no_realloc, ptr) }.unwrap();
}

#[test]
fn test_stack_on_system_parent() {
    init_logging();

    let system = SystemAllocator::new(64 * 1024).unwrap();
    {
        let stack = StackAllocator::with_parent(&system, 16 * 1024).unwrap();
        assert_eq!(system.stats().size, 16 * 1024);

        for _frame in 0..10 {
            let scope = stack.scope();
            for i in 1..=32 {
                let ptr = alloc(scope.stack(), i * 8).unwrap();
                unsafe { ptr.as_ptr().write_bytes(i as u8, i * 8) };
            }
            assert_eq!(stack.stats().current_allocations, 32);
        }
        assert_eq!(stack.used(), 0);
        assert_eq!(stack.stats().total_allocations, 320);

        // Parent limit still applies next to the region
        assert!(alloc(&system, 64 * 1024).is_err());
    }
    assert!(system.stats().is_empty());
}

#[test]
fn test_buffer_packs_objects() {
    init_logging();

    #[derive(Clone, Copy, Debug, PartialEq)]
    #[repr(C)]
    struct Vertex {
        position: [f32; 3],
        uv: [f32; 2],
    }

    let system = SystemAllocator::unbounded();
    let count = 8;
    let header_size = aligned_size(std::mem::size_of::<u64>());
    let vertices_size = aligned_size(std::mem::size_of::<Vertex>() * count);
    let total = header_size + vertices_size;

    let block = alloc(&system, total).unwrap();
    {
        let buffer = unsafe { BufferAllocator::from_raw_parts(block, total) }.unwrap();
        let header = alloc(&buffer, std::mem::size_of::<u64>()).unwrap();
        let vertices = alloc(&buffer, std::mem::size_of::<Vertex>() * count).unwrap();
        assert_eq!(header, block);
        assert_eq!(buffer.used(), total);
        assert!(alloc(&buffer, 1).is_err());

        unsafe {
            header.cast::<u64>().as_ptr().write(count as u64);
            let vertices = vertices.cast::<Vertex>().as_ptr();
            for i in 0..count {
                vertices.add(i).write(Vertex { position: [i as f32; 3], uv: [0.5; 2] });
            }
            assert_eq!((*vertices.add(7)).position, [7.0; 3]);
        }
    }

    // One free releases the packed objects together
    unsafe { free(&system, block) }.unwrap();
    assert!(system.stats().is_empty());
}

#[test]
fn test_error_codes() {
    use void_core::ErrorCode;

    let system = SystemAllocator::new(64).unwrap();
    let err = alloc(&system, 128).unwrap_err();
    assert_eq!(err.code(), ErrorCode::OutOfMemory);
    assert_eq!(void_core::error_string(err.code()), "Out of memory");

    let mut storage = Storage::new();
    let buffer = BufferAllocator::from_buffer(&mut storage.0).unwrap();
    let ptr = alloc(&buffer, 8).unwrap();
    assert_eq!(unsafe { free(&buffer, ptr) }.unwrap_err().code(), ErrorCode::Unsupported);

    assert_eq!(alloc_aligned(&system, 8, 3).unwrap_err().code(), ErrorCode::InvalidArgument);
}
