//! C callbacks handed to the library
//!
//! `user_data` is always a pointer to a [`Recorder`]. For retained callbacks
//! it is produced by `Arc::into_raw` and [`release_recorder`] gives that
//! reference back when the library lets go of it.

use crate::state::Recorder;
use mylib_abi::MylibStatus;
use std::ffi::{c_char, c_void, CStr};
use std::sync::Arc;

/// Turn a shared recorder into `user_data` owned by the library
pub fn into_user_data(recorder: Arc<Recorder>) -> *mut c_void {
    Arc::into_raw(recorder) as *mut c_void
}

/// Lend a recorder as `user_data` for a callback that is not retained
pub fn borrow_user_data(recorder: &Recorder) -> *mut c_void {
    recorder as *const Recorder as *mut c_void
}

pub extern "C" fn record_value(user_data: *mut c_void, value: i64) -> i32 {
    let recorder = unsafe { &*(user_data as *const Recorder) };
    recorder.record(value);
    0
}

pub extern "C" fn release_recorder(user_data: *mut c_void) {
    let recorder = unsafe { Arc::from_raw(user_data as *const Recorder) };
    log::debug!("Library released {:?} callback", recorder.kind());
}

pub extern "C" fn record_error(
    user_data: *mut c_void,
    computation: u64,
    status: MylibStatus,
    message: *const c_char,
) {
    let recorder = unsafe { &*(user_data as *const Recorder) };
    let message = if message.is_null() {
        String::from("Unknown error")
    } else {
        unsafe { CStr::from_ptr(message) }.to_string_lossy().into_owned()
    };
    recorder.record_error(computation, status, message);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::CallbackKind;

    #[test]
    fn test_record_value_through_user_data() {
        let recorder = Recorder::new(CallbackKind::DotProduct, false);
        assert_eq!(record_value(borrow_user_data(&recorder), 80), 0);
        assert_eq!(recorder.values(), vec![80]);
    }

    #[test]
    fn test_release_returns_reference() {
        let recorder = Arc::new(Recorder::new(CallbackKind::Count, false));
        let user_data = into_user_data(Arc::clone(&recorder));
        assert_eq!(Arc::strong_count(&recorder), 2);

        record_value(user_data, 1);
        release_recorder(user_data);
        assert_eq!(Arc::strong_count(&recorder), 1);
        assert_eq!(recorder.values(), vec![1]);
    }

    #[test]
    fn test_record_error_null_message() {
        let recorder = Recorder::new(CallbackKind::Progress, false);
        record_error(
            borrow_user_data(&recorder),
            1,
            MylibStatus::CallbackFailure,
            std::ptr::null(),
        );
        assert_eq!(recorder.errors()[0].message, "Unknown error");
    }
}
