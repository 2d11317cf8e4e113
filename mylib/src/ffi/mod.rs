//! C ABI exports
//!
//! This is the only boundary of the library. Every function returns a
//! [`MylibStatus`]; results are written through out-pointers, and the message
//! of a failed call can be read with [`mylib_last_error_message`].
//!
//! Ownership rules:
//! - strings returned by the library belong to the caller and must be freed
//!   with [`mylib_string_free`]
//! - input buffers are only read during the call
//! - a callback passed together with a `release` hook is retained; the hook
//!   runs exactly once when the library lets go of `user_data` (counter
//!   destroyed, computation finished, or the call that would have retained
//!   it failed after taking ownership)
//! - counter handles are opaque 64-bit values; stale or made-up handles are
//!   rejected with [`MylibStatus::InvalidHandle`]

mod callback;
mod convert;
mod status;

pub use mylib_abi::{
    MylibAsyncOptions, MylibCallback, MylibErrorCallback, MylibLongList, MylibRelease, MylibStatus,
};
pub use status::mylib_last_error_message;

use crate::config::ComputationConfig;
use crate::counter;
use crate::ops;
use crate::runner::{self, ErrorSinkRef};
use crate::types::{BridgeError, CounterHandle};
use callback::{ForeignCallback, ForeignErrorSink};
use convert::{borrow_slice, borrow_str, copy_vector, into_c_string, unbox_list, write_out};
use status::guard;
use std::ffi::{c_char, c_void, CString};
use std::sync::Arc;
use std::time::Duration;

impl From<MylibAsyncOptions> for ComputationConfig {
    fn from(options: MylibAsyncOptions) -> Self {
        ComputationConfig {
            steps: options.steps,
            step_interval_ms: options.step_interval_ms,
        }
    }
}

/// Library version as a static NUL-terminated string
#[no_mangle]
pub extern "C" fn mylib_version() -> *const c_char {
    concat!(env!("CARGO_PKG_VERSION"), "\0").as_ptr() as *const c_char
}

/// Install a logger inside the library
///
/// A host loading the library at runtime does not share its logger with
/// it. Levels: `<= 0` off, 1 error, 2 warn, 3 info, 4 debug, `>= 5` trace.
/// Calling again only changes the level.
#[no_mangle]
pub extern "C" fn mylib_init_logging(level: i32) -> MylibStatus {
    use log::LevelFilter;
    use std::io::Write;

    let filter = match level {
        i32::MIN..=0 => LevelFilter::Off,
        1 => LevelFilter::Error,
        2 => LevelFilter::Warn,
        3 => LevelFilter::Info,
        4 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    guard("mylib_init_logging", || {
        let installed = env_logger::Builder::new()
            .filter_level(filter)
            .format(|buf, record| {
                writeln!(
                    buf,
                    "[{} {}] {}",
                    record.level(),
                    record.target(),
                    record.args()
                )
            })
            .try_init()
            .is_ok();
        log::set_max_level(filter);
        log::debug!("Library logging at {} (fresh logger: {})", filter, installed);
        Ok(())
    })
}

/// Build the greeting for `input` and hand it to the caller
///
/// # Safety
///
/// `input` must be a NUL-terminated string; `out` must be valid for writes.
#[no_mangle]
pub unsafe extern "C" fn mylib_hello(input: *const c_char, out: *mut *mut c_char) -> MylibStatus {
    guard("mylib_hello", || {
        if out.is_null() {
            return Err(BridgeError::NullPointer("out"));
        }
        let name = borrow_str(input, "input")?;
        let greeting = into_c_string(ops::hello(name))?;
        write_out(out, greeting, "out")
    })
}

/// Free a string returned by the library
///
/// # Safety
///
/// `s` must be null or a pointer returned by this library, freed only once.
#[no_mangle]
pub unsafe extern "C" fn mylib_string_free(s: *mut c_char) {
    if !s.is_null() {
        drop(CString::from_raw(s));
    }
}

/// Dot product over copies of both arrays
///
/// # Safety
///
/// Each array pointer must be null with length 0, or point to that many
/// integers. `out` must be valid for writes.
#[no_mangle]
pub unsafe extern "C" fn mylib_dot_product(
    vector_a: *const i64,
    len_a: usize,
    vector_b: *const i64,
    len_b: usize,
    out: *mut i64,
) -> MylibStatus {
    guard("mylib_dot_product", || {
        let a = copy_vector(vector_a, len_a, "vector_a")?;
        let b = copy_vector(vector_b, len_b, "vector_b")?;
        write_out(out, a.dot(&b)?, "out")
    })
}

/// Dot product read directly from the caller's arrays, without copying
///
/// # Safety
///
/// Same as [`mylib_dot_product`]; the arrays must not be modified during
/// the call.
#[no_mangle]
pub unsafe extern "C" fn mylib_dot_product_critical(
    vector_a: *const i64,
    len_a: usize,
    vector_b: *const i64,
    len_b: usize,
    out: *mut i64,
) -> MylibStatus {
    guard("mylib_dot_product_critical", || {
        let a = borrow_slice(vector_a, len_a, "vector_a")?;
        let b = borrow_slice(vector_b, len_b, "vector_b")?;
        write_out(out, ops::dot_product_critical(a, b)?, "out")
    })
}

/// Dot product over two lists of boxed integers
///
/// # Safety
///
/// See [`MylibLongList`]; `out` must be valid for writes.
#[no_mangle]
pub unsafe extern "C" fn mylib_dot_product_list(
    vector_a: MylibLongList,
    vector_b: MylibLongList,
    out: *mut i64,
) -> MylibStatus {
    guard("mylib_dot_product_list", || {
        let a = unbox_list(vector_a, "vector_a")?;
        let b = unbox_list(vector_b, "vector_b")?;
        write_out(out, ops::dot_product_list(&a, &b)?, "out")
    })
}

/// Compute the dot product and pass it to `callback` before returning
///
/// The callback is not retained. A non-zero return from it is reported as
/// [`MylibStatus::CallbackFailure`].
///
/// # Safety
///
/// Array requirements as in [`mylib_dot_product`].
#[no_mangle]
pub unsafe extern "C" fn mylib_dot_product_consume(
    vector_a: *const i64,
    len_a: usize,
    vector_b: *const i64,
    len_b: usize,
    callback: MylibCallback,
    user_data: *mut c_void,
) -> MylibStatus {
    guard("mylib_dot_product_consume", || {
        let consumer = ForeignCallback::new(callback, user_data, None)?;
        let a = borrow_slice(vector_a, len_a, "vector_a")?;
        let b = borrow_slice(vector_b, len_b, "vector_b")?;
        ops::dot_product_consume(a, b, &consumer).map(|_| ())
    })
}

/// Create a counter starting at 0 and write its handle to `out`
///
/// `callback` is invoked with the new count after every increment, on the
/// thread calling [`mylib_counter_inc`]. It is not invoked here.
///
/// # Safety
///
/// `out` must be valid for writes. `user_data` must remain usable from any
/// thread until `release` is called (or until [`mylib_counter_des`] returns
/// if `release` is null).
#[no_mangle]
pub unsafe extern "C" fn mylib_counter_new(
    callback: MylibCallback,
    user_data: *mut c_void,
    release: MylibRelease,
    out: *mut u64,
) -> MylibStatus {
    guard("mylib_counter_new", || {
        if out.is_null() {
            return Err(BridgeError::NullPointer("out"));
        }
        let callback = ForeignCallback::new(callback, user_data, release)?;
        let handle = counter::counter_new(callback.into_ref())?;
        write_out(out, handle.raw(), "out")
    })
}

/// Increment a counter and notify its callback
#[no_mangle]
pub extern "C" fn mylib_counter_inc(handle: u64) -> MylibStatus {
    guard("mylib_counter_inc", || {
        counter::counter_inc(CounterHandle::from_raw(handle)).map(|_| ())
    })
}

/// Read the current value of a counter
///
/// # Safety
///
/// `out` must be valid for writes.
#[no_mangle]
pub unsafe extern "C" fn mylib_counter_get(handle: u64, out: *mut i64) -> MylibStatus {
    guard("mylib_counter_get", || {
        let count = counter::counter_get(CounterHandle::from_raw(handle))?;
        write_out(out, count, "out")
    })
}

/// Destroy a counter; the handle is invalid afterwards
///
/// Callbacks of this counter still running on other threads finish before
/// this returns, so the callback is not invoked once it has returned.
#[no_mangle]
pub extern "C" fn mylib_counter_des(handle: u64) -> MylibStatus {
    guard("mylib_counter_des", || {
        counter::counter_des(CounterHandle::from_raw(handle))
    })
}

/// Start a background computation reporting progress 0, 10, ..., 100
///
/// Returns once the worker thread is running. Progress is delivered on the
/// worker thread, one second apart. A failing callback stops the worker and
/// is logged; use [`mylib_async_computation_with`] to be notified.
///
/// # Safety
///
/// `user_data` must be usable from the worker thread until `release` is
/// called.
#[no_mangle]
pub unsafe extern "C" fn mylib_async_computation(
    callback: MylibCallback,
    user_data: *mut c_void,
    release: MylibRelease,
) -> MylibStatus {
    guard("mylib_async_computation", || {
        let callback = ForeignCallback::new(callback, user_data, release)?;
        runner::async_computation(callback.into_ref())
    })
}

/// Start a background computation with explicit options and error reporting
///
/// `options` may be null for defaults. `on_error` (may be null) receives
/// the same `user_data` and runs on the worker thread before `release`.
/// The computation id is written to `out_id` when it is not null.
///
/// # Safety
///
/// As for [`mylib_async_computation`]; `options` must be null or valid for
/// reads and `out_id` null or valid for writes.
#[no_mangle]
pub unsafe extern "C" fn mylib_async_computation_with(
    callback: MylibCallback,
    user_data: *mut c_void,
    release: MylibRelease,
    on_error: MylibErrorCallback,
    options: *const MylibAsyncOptions,
    out_id: *mut u64,
) -> MylibStatus {
    guard("mylib_async_computation_with", || {
        let config = options
            .as_ref()
            .map(|options| ComputationConfig::from(*options))
            .unwrap_or_default();
        let callback = ForeignCallback::new(callback, user_data, release)?;
        let sink = ForeignErrorSink::new(on_error, user_data)
            .map(|sink| Arc::new(sink) as ErrorSinkRef);

        let computation = runner::global().spawn(callback.into_ref(), sink, &config)?;
        if !out_id.is_null() {
            out_id.write(computation.id());
        }
        Ok(())
    })
}

/// Number of background computations still running
#[no_mangle]
pub extern "C" fn mylib_async_pending() -> usize {
    runner::global().active()
}

/// Wait for all background computations to finish
///
/// A negative `timeout_ms` waits indefinitely. Returns
/// [`MylibStatus::Timeout`] if computations are still running afterwards,
/// and [`MylibStatus::InvalidArgument`] when called from a progress or
/// error callback, which runs on one of the workers being waited for.
#[no_mangle]
pub extern "C" fn mylib_async_wait(timeout_ms: i64) -> MylibStatus {
    guard("mylib_async_wait", || {
        let timeout = u64::try_from(timeout_ms).ok().map(Duration::from_millis);
        runner::global().wait_idle(timeout)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CStr;

    #[test]
    fn test_version_string() {
        let version = unsafe { CStr::from_ptr(mylib_version()) };
        assert_eq!(version.to_str().unwrap(), env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn test_init_logging_is_idempotent() {
        assert!(mylib_init_logging(0).is_ok());
        assert!(mylib_init_logging(4).is_ok());
        assert!(mylib_init_logging(0).is_ok());
    }

    #[test]
    fn test_async_options_conversion() {
        let config = ComputationConfig::from(MylibAsyncOptions {
            steps: 4,
            step_interval_ms: 25,
        });
        let expected = ComputationConfig::new()
            .with_steps(4)
            .with_step_interval(Duration::from_millis(25));
        assert_eq!(config, expected);
    }
}
