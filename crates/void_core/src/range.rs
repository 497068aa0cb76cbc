//! Overflow-safe buffer range validation

use core::fmt;
use core::ops::Range;

use crate::error::ErrorCode;

/// Check that `range_size` bytes starting at `offset` fit in `buffer_size`.
///
/// An empty range is valid at any offset up to and including the end of the
/// buffer. The end of the range is computed without wrapping, so an offset
/// near `usize::MAX` can never alias the start of the buffer.
#[inline]
pub const fn is_buffer_range_valid(offset: usize, range_size: usize, buffer_size: usize) -> bool {
    if offset > buffer_size {
        return false;
    }
    match offset.checked_add(range_size) {
        Some(end) => end <= buffer_size,
        None => false,
    }
}

/// Validated sub-range of a buffer, as a `Range` ready for slicing
pub fn checked_range(
    offset: usize,
    range_size: usize,
    buffer_size: usize,
) -> Result<Range<usize>, RangeError> {
    if is_buffer_range_valid(offset, range_size, buffer_size) {
        Ok(offset..offset + range_size)
    } else {
        Err(RangeError {
            offset,
            size: range_size,
            buffer_size,
        })
    }
}

/// A range that does not fit its buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeError {
    /// Requested start offset
    pub offset: usize,
    /// Requested length
    pub size: usize,
    /// Capacity of the buffer the range was checked against
    pub buffer_size: usize,
}

impl RangeError {
    /// Error code for this failure
    pub const fn code(&self) -> ErrorCode {
        if self.offset.checked_add(self.size).is_none() {
            ErrorCode::Overflow
        } else {
            ErrorCode::InvalidArgument
        }
    }
}

impl fmt::Display for RangeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Range of {} bytes at offset {} exceeds buffer of {} bytes",
            self.size, self.offset, self.buffer_size
        )
    }
}

#[cfg(feature = "std")]
impl std::error::Error for RangeError {}
