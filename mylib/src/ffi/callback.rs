//! Foreign callbacks: a C function pointer plus the caller's context

use crate::callback::{Callback, CallbackRef};
use crate::runner::ErrorSink;
use crate::types::{BridgeError, CallbackError};
use mylib_abi::{MylibCallback, MylibErrorCallback, MylibRelease, MylibStatus};
use std::ffi::{c_char, c_void, CString};
use std::sync::Arc;

/// A caller-provided callback retained by the library
pub(crate) struct ForeignCallback {
    func: extern "C" fn(*mut c_void, i64) -> i32,
    user_data: *mut c_void,
    release: MylibRelease,
}

// The caller guarantees `user_data` may be used from any thread for as long
// as the library holds it; that is the documented contract of every export
// that retains a callback.
unsafe impl Send for ForeignCallback {}
unsafe impl Sync for ForeignCallback {}

impl ForeignCallback {
    pub(crate) fn new(
        func: MylibCallback,
        user_data: *mut c_void,
        release: MylibRelease,
    ) -> crate::Result<Self> {
        let func = func.ok_or(BridgeError::NullPointer("callback"))?;
        Ok(Self {
            func,
            user_data,
            release,
        })
    }

    pub(crate) fn into_ref(self) -> CallbackRef {
        Arc::new(self)
    }
}

impl Callback for ForeignCallback {
    fn call(&self, value: i64) -> Result<(), CallbackError> {
        match (self.func)(self.user_data, value) {
            0 => Ok(()),
            status => Err(CallbackError::Status(status)),
        }
    }
}

impl Drop for ForeignCallback {
    fn drop(&mut self) {
        if let Some(release) = self.release {
            log::trace!("Releasing foreign callback context {:p}", self.user_data);
            release(self.user_data);
        }
    }
}

/// Error callback for async computations
pub(crate) struct ForeignErrorSink {
    func: extern "C" fn(*mut c_void, u64, MylibStatus, *const c_char),
    user_data: *mut c_void,
}

// Same contract as `ForeignCallback`.
unsafe impl Send for ForeignErrorSink {}
unsafe impl Sync for ForeignErrorSink {}

impl ForeignErrorSink {
    pub(crate) fn new(func: MylibErrorCallback, user_data: *mut c_void) -> Option<Self> {
        func.map(|func| Self { func, user_data })
    }
}

impl ErrorSink for ForeignErrorSink {
    fn report(&self, computation: u64, error: &BridgeError) {
        let message = CString::new(error.to_string().replace('\0', " ")).unwrap_or_default();
        (self.func)(
            self.user_data,
            computation,
            MylibStatus::from(error),
            message.as_ptr(),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callback::deliver;
    use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};

    struct Context {
        last: AtomicI64,
        released: AtomicUsize,
    }

    extern "C" fn store(user_data: *mut c_void, value: i64) -> i32 {
        let ctx = unsafe { &*(user_data as *const Context) };
        ctx.last.store(value, Ordering::SeqCst);
        if value < 0 {
            1
        } else {
            0
        }
    }

    extern "C" fn release(user_data: *mut c_void) {
        let ctx = unsafe { &*(user_data as *const Context) };
        ctx.released.fetch_add(1, Ordering::SeqCst);
    }

    #[test]
    fn test_foreign_callback_roundtrip() {
        let ctx = Context {
            last: AtomicI64::new(0),
            released: AtomicUsize::new(0),
        };
        let user_data = &ctx as *const Context as *mut c_void;

        let callback = ForeignCallback::new(Some(store), user_data, Some(release))
            .unwrap()
            .into_ref();

        deliver(callback.as_ref(), 80).unwrap();
        assert_eq!(ctx.last.load(Ordering::SeqCst), 80);
        assert_eq!(deliver(callback.as_ref(), -1), Err(CallbackError::Status(1)));

        let retained = Arc::clone(&callback);
        drop(callback);
        assert_eq!(ctx.released.load(Ordering::SeqCst), 0);
        drop(retained);
        assert_eq!(ctx.released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_null_function_rejected() {
        let result = ForeignCallback::new(None, std::ptr::null_mut(), None);
        assert!(matches!(result, Err(BridgeError::NullPointer("callback"))));
    }
}
