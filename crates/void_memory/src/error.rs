//! Allocation errors

use thiserror::Error;
use void_core::ErrorCode;

/// Errors returned by allocators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AllocError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("Capacity exceeded: requested {requested} bytes, {available} available")]
    CapacityExceeded { requested: usize, available: usize },

    #[error("Heap exhausted allocating {size} bytes")]
    HeapExhausted { size: usize },

    #[error("Allocator does not support {0}")]
    Unsupported(&'static str),

    #[error("Only the most recent stack allocation can be freed")]
    NotMostRecent,
}

impl AllocError {
    /// Engine-wide error code for this failure
    pub const fn code(&self) -> ErrorCode {
        match self {
            AllocError::InvalidArgument(_) | AllocError::NotMostRecent => {
                ErrorCode::InvalidArgument
            }
            AllocError::CapacityExceeded { .. } | AllocError::HeapExhausted { .. } => {
                ErrorCode::OutOfMemory
            }
            AllocError::Unsupported(_) => ErrorCode::Unsupported,
        }
    }

    /// Whether the request failed for lack of space
    pub const fn is_out_of_memory(&self) -> bool {
        matches!(self.code(), ErrorCode::OutOfMemory)
    }
}

/// Result type alias
pub type Result<T> = core::result::Result<T, AllocError>;
