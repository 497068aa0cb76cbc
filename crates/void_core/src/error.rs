//! Engine-wide error codes

use core::fmt;
use alloc::string::String;

/// Failure classes reported by core services
///
/// Every crate-specific error maps onto one of these so callers can decide
/// between retrying, falling back to another strategy, or giving up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// An argument was malformed (bad alignment, foreign pointer, short buffer)
    InvalidArgument,
    /// A capacity or limit would be exceeded
    OutOfMemory,
    /// The operation is not provided by this implementation
    Unsupported,
    /// An offset/size computation would overflow
    Overflow,
}

impl ErrorCode {
    /// Static description of the code
    pub const fn as_str(self) -> &'static str {
        match self {
            ErrorCode::InvalidArgument => "Invalid argument",
            ErrorCode::OutOfMemory => "Out of memory",
            ErrorCode::Unsupported => "Operation not supported",
            ErrorCode::Overflow => "Value out of range",
        }
    }

    /// Whether the caller can reasonably recover by trying something else
    pub const fn is_recoverable(self) -> bool {
        matches!(self, ErrorCode::OutOfMemory | ErrorCode::Unsupported)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Formats an error code into an owned message.
///
/// Each call returns a fresh string, so it is safe from any thread.
pub fn error_string(code: ErrorCode) -> String {
    String::from(code.as_str())
}
