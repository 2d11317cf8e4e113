//! Core types for the native bridge library
//!
//! This module defines the error types shared by every component and the
//! opaque handle used to reference counters living on the native side.

use std::fmt;
use std::time::Duration;

/// Result type for library operations
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Errors that can occur while serving a call
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("Vector length mismatch: {left} != {right}")]
    LengthMismatch { left: usize, right: usize },

    #[error("Invalid counter handle: {0}")]
    InvalidHandle(CounterHandle),

    #[error("Invalid string encoding: {0}")]
    EncodingError(String),

    #[error("Callback failed: {0}")]
    CallbackFailure(#[from] CallbackError),

    #[error("Null pointer passed for {0}")]
    NullPointer(&'static str),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Counter overflow: {0}")]
    Overflow(CounterHandle),

    #[error("Failed to spawn worker thread: {0}")]
    WorkerSpawn(#[from] std::io::Error),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),
}

/// Failure raised by caller-supplied callback logic
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CallbackError {
    /// A foreign callback returned a non-zero status
    #[error("callback returned status {0}")]
    Status(i32),

    /// A Rust callback reported a failure
    #[error("{0}")]
    Message(String),

    /// The callback panicked while being invoked
    #[error("callback panicked")]
    Panicked,
}

impl CallbackError {
    /// Convenience constructor for Rust callbacks
    pub fn message(msg: impl Into<String>) -> Self {
        CallbackError::Message(msg.into())
    }
}

/// Opaque identifier of a counter owned by a [`CounterRegistry`](crate::CounterRegistry)
///
/// The raw value packs a magic tag, a slot generation and a slot index:
///
/// ```text
///  63          48 47        32 31                     0
/// +--------------+------------+------------------------+
/// |  0x4D4C tag  | generation |         index          |
/// +--------------+------------+------------------------+
/// ```
///
/// A handle is never a memory address. Values that do not carry the tag
/// (zero, `1337`, a pointer) are rejected without touching any state.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CounterHandle(u64);

impl CounterHandle {
    /// Tag stored in the upper 16 bits of every handle ("ML")
    pub const MAGIC: u16 = 0x4D4C;

    pub(crate) fn new(index: u32, generation: u16) -> Self {
        Self(((Self::MAGIC as u64) << 48) | ((generation as u64) << 32) | index as u64)
    }

    /// Reinterpret a raw value received from a caller
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw value handed out across the boundary
    pub fn raw(self) -> u64 {
        self.0
    }

    /// True if the magic tag is present
    pub fn has_magic(self) -> bool {
        (self.0 >> 48) as u16 == Self::MAGIC
    }

    pub(crate) fn index(self) -> u32 {
        self.0 as u32
    }

    pub(crate) fn generation(self) -> u16 {
        (self.0 >> 32) as u16
    }
}

impl fmt::Display for CounterHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016X}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_layout() {
        let handle = CounterHandle::new(7, 3);
        assert!(handle.has_magic());
        assert_eq!(handle.index(), 7);
        assert_eq!(handle.generation(), 3);
        assert_eq!(handle.raw() >> 48, 0x4D4C);
    }

    #[test]
    fn test_raw_values_without_magic() {
        assert!(!CounterHandle::from_raw(0).has_magic());
        assert!(!CounterHandle::from_raw(1337).has_magic());
        assert!(!CounterHandle::from_raw(0x7fff_dead_beef).has_magic());
    }

    #[test]
    fn test_error_display() {
        let err = BridgeError::LengthMismatch { left: 4, right: 3 };
        assert_eq!(err.to_string(), "Vector length mismatch: 4 != 3");

        let err = BridgeError::from(CallbackError::Status(2));
        assert_eq!(err.to_string(), "Callback failed: callback returned status 2");

        let err = BridgeError::InvalidHandle(CounterHandle::from_raw(1337));
        assert_eq!(err.to_string(), "Invalid counter handle: 0x0000000000000539");
    }
}
