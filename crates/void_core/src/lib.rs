//! # void_core - Void Engine Core
//!
//! Zero-dependency primitives shared by every engine crate:
//! - **Error codes**: the engine-wide failure taxonomy and its messages
//! - **Range validation**: overflow-safe offset/size checks against a buffer
//!
//! Streams, loaders and allocators all validate untrusted offsets through
//! [`is_buffer_range_valid`] before touching memory.

#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(not(feature = "std"))]
extern crate alloc;

#[cfg(feature = "std")]
extern crate std as alloc;

pub mod error;
pub mod range;

pub use error::*;
pub use range::*;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::error::{error_string, ErrorCode};
    pub use crate::range::{checked_range, is_buffer_range_valid, RangeError};
}
