//! Status codes and last-error reporting for the C ABI

use crate::types::{BridgeError, Result};
use mylib_abi::MylibStatus;
use std::cell::RefCell;
use std::ffi::{c_char, CString};
use std::panic::{catch_unwind, AssertUnwindSafe};

impl From<&BridgeError> for MylibStatus {
    fn from(error: &BridgeError) -> Self {
        match error {
            BridgeError::LengthMismatch { .. } => MylibStatus::LengthMismatch,
            BridgeError::InvalidHandle(_) => MylibStatus::InvalidHandle,
            BridgeError::EncodingError(_) => MylibStatus::EncodingError,
            BridgeError::CallbackFailure(_) => MylibStatus::CallbackFailure,
            BridgeError::NullPointer(_) => MylibStatus::NullPointer,
            BridgeError::InvalidArgument(_) => MylibStatus::InvalidArgument,
            BridgeError::Overflow(_) => MylibStatus::Overflow,
            BridgeError::WorkerSpawn(_) => MylibStatus::SpawnFailed,
            BridgeError::Timeout(_) => MylibStatus::Timeout,
        }
    }
}

thread_local! {
    /// Message of the last failed call made on this thread
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

pub(crate) fn set_last_error(message: String) {
    // Interior NULs would truncate the message on the C side anyway
    let message = CString::new(message.replace('\0', " ")).unwrap_or_default();
    LAST_ERROR.with(|slot| *slot.borrow_mut() = Some(message));
}

fn clear_last_error() {
    LAST_ERROR.with(|slot| *slot.borrow_mut() = None);
}

/// Message describing the last failed call on the calling thread
///
/// Returns null if the last call succeeded. The pointer stays valid until
/// the next call into the library from the same thread.
#[no_mangle]
pub extern "C" fn mylib_last_error_message() -> *const c_char {
    LAST_ERROR.with(|slot| {
        slot.borrow()
            .as_ref()
            .map_or(std::ptr::null(), |message| message.as_ptr())
    })
}

/// Run the body of an export: record failures and keep panics on this side
pub(crate) fn guard<F>(call: &'static str, body: F) -> MylibStatus
where
    F: FnOnce() -> Result<()>,
{
    match catch_unwind(AssertUnwindSafe(body)) {
        Ok(Ok(())) => {
            clear_last_error();
            MylibStatus::Ok
        }
        Ok(Err(error)) => {
            log::debug!("{} failed: {}", call, error);
            let status = MylibStatus::from(&error);
            set_last_error(error.to_string());
            status
        }
        Err(_) => {
            log::error!("{} panicked", call);
            set_last_error(format!("{} panicked", call));
            MylibStatus::Panic
        }
    }
}
