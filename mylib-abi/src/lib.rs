//! mylib ABI types
//!
//! The data types, callback signatures and constants of the mylib C ABI.
//! The library exports its functions in terms of these; a host that loads
//! the shared library at runtime depends on this crate alone to call them.

use std::ffi::{c_char, c_void};

/// Progress value reported by the final step of every computation
pub const PROGRESS_COMPLETE: i64 = 100;

/// Result code returned by every exported function
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MylibStatus {
    Ok = 0,
    LengthMismatch = 1,
    InvalidHandle = 2,
    EncodingError = 3,
    CallbackFailure = 4,
    NullPointer = 5,
    InvalidArgument = 6,
    Overflow = 7,
    SpawnFailed = 8,
    Timeout = 9,
    Panic = 10,
}

impl MylibStatus {
    pub fn is_ok(self) -> bool {
        self == MylibStatus::Ok
    }
}

/// List of boxed, possibly null, 64-bit integers
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct MylibLongList {
    pub items: *const *const i64,
    pub len: usize,
}

/// Options for `mylib_async_computation_with`
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct MylibAsyncOptions {
    /// Number of steps after the initial 0% report (1..=100)
    pub steps: u32,
    /// Pause between two progress reports in milliseconds
    pub step_interval_ms: u64,
}

/// Invoked with the caller's context and a value; non-zero return means failure
pub type MylibCallback = Option<extern "C" fn(user_data: *mut c_void, value: i64) -> i32>;

/// Invoked exactly once when the library drops its reference to `user_data`
pub type MylibRelease = Option<extern "C" fn(user_data: *mut c_void)>;

/// Invoked from a worker thread when an async computation fails
pub type MylibErrorCallback = Option<
    extern "C" fn(user_data: *mut c_void, computation: u64, status: MylibStatus, message: *const c_char),
>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::size_of;

    #[test]
    fn test_status_codes_are_stable() {
        let codes = [
            (MylibStatus::Ok, 0),
            (MylibStatus::LengthMismatch, 1),
            (MylibStatus::InvalidHandle, 2),
            (MylibStatus::EncodingError, 3),
            (MylibStatus::CallbackFailure, 4),
            (MylibStatus::NullPointer, 5),
            (MylibStatus::InvalidArgument, 6),
            (MylibStatus::Overflow, 7),
            (MylibStatus::SpawnFailed, 8),
            (MylibStatus::Timeout, 9),
            (MylibStatus::Panic, 10),
        ];
        for (status, code) in codes {
            assert_eq!(status as i32, code, "{:?}", status);
            assert_eq!(status.is_ok(), code == 0);
        }
    }

    #[test]
    fn test_layouts() {
        assert_eq!(size_of::<MylibStatus>(), size_of::<i32>());
        assert_eq!(size_of::<MylibLongList>(), 2 * size_of::<usize>());
        assert_eq!(size_of::<MylibAsyncOptions>(), 16);
        // Null callbacks are represented as null pointers
        assert_eq!(size_of::<MylibCallback>(), size_of::<usize>());
        assert_eq!(size_of::<MylibErrorCallback>(), size_of::<usize>());
    }
}
