//! Memory configuration

use crate::allocator::Allocator;
use crate::error::{AllocError, Result};
use crate::pool::PoolAllocator;
use crate::stack::StackAllocator;

/// Memory budget for an engine instance
///
/// Loaded by the host from its settings file; every field has a default.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct MemoryConfig {
    /// Byte limit for the system allocator, unbounded when `None`
    pub system_limit: Option<usize>,
    /// Capacity of the per-frame stack
    pub frame_stack_size: usize,
    /// Fixed-size pools to create at startup
    pub pools: Vec<PoolConfig>,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            system_limit: None,
            frame_stack_size: 1024 * 1024,
            pools: Vec::new(),
        }
    }
}

impl MemoryConfig {
    /// Check the configuration for values no allocator can satisfy
    pub fn validate(&self) -> Result<()> {
        if self.system_limit == Some(0) {
            return Err(AllocError::InvalidArgument("system limit must be non-zero"));
        }
        if self.frame_stack_size == 0 {
            return Err(AllocError::InvalidArgument("frame stack size must be non-zero"));
        }

        let mut total = self.frame_stack_size;
        for pool in &self.pools {
            total = total
                .checked_add(pool.buffer_size()?)
                .ok_or(AllocError::InvalidArgument("memory budget overflows"))?;
        }

        match self.system_limit {
            Some(limit) if total > limit => Err(AllocError::CapacityExceeded {
                requested: total,
                available: limit,
            }),
            _ => Ok(()),
        }
    }

    /// Create the per-frame stack from `parent`
    pub fn frame_stack<'a>(
        &self,
        parent: &'a (dyn Allocator + Sync),
    ) -> Result<StackAllocator<'a>> {
        StackAllocator::with_parent(parent, self.frame_stack_size)
    }

    /// Create every configured pool from `parent`
    pub fn build_pools<'a>(
        &self,
        parent: &'a (dyn Allocator + Sync),
    ) -> Result<Vec<PoolAllocator<'a>>> {
        self.pools.iter().map(|pool| pool.build(parent)).collect()
    }
}

/// Layout of one fixed-size pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PoolConfig {
    pub chunk_size: usize,
    pub chunk_count: usize,
}

impl PoolConfig {
    /// Backing bytes the pool needs
    pub fn buffer_size(&self) -> Result<usize> {
        if self.chunk_size == 0 || self.chunk_count == 0 {
            return Err(AllocError::InvalidArgument("pool chunk size and count must be non-zero"));
        }
        PoolAllocator::buffer_size(self.chunk_size, self.chunk_count)
            .ok_or(AllocError::InvalidArgument("pool size overflows"))
    }

    pub fn build<'a>(&self, parent: &'a (dyn Allocator + Sync)) -> Result<PoolAllocator<'a>> {
        PoolAllocator::with_parent(parent, self.chunk_size, self.chunk_count)
    }
}
