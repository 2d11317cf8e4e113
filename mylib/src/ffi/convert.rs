//! Boundary conversion
//!
//! Raw pointers coming from the caller are validated here, once, before any
//! operation sees them. Everything past this module works on safe Rust
//! values.

use crate::ops::Vector;
use crate::types::{BridgeError, Result};
use mylib_abi::MylibLongList;
use std::ffi::{c_char, CStr, CString};

/// Reject element counts no caller allocation can hold
fn check_len<T>(len: usize, what: &'static str) -> Result<()> {
    let max = isize::MAX as usize / std::mem::size_of::<T>().max(1);
    if len > max {
        return Err(BridgeError::InvalidArgument(format!(
            "{} length {} exceeds {}",
            what, len, max
        )));
    }
    Ok(())
}

/// Borrow a NUL-terminated UTF-8 string
///
/// # Safety
///
/// `ptr` must be null or point to a NUL-terminated string that stays alive
/// for `'a`.
pub(crate) unsafe fn borrow_str<'a>(ptr: *const c_char, what: &'static str) -> Result<&'a str> {
    if ptr.is_null() {
        return Err(BridgeError::NullPointer(what));
    }
    CStr::from_ptr(ptr)
        .to_str()
        .map_err(|e| BridgeError::EncodingError(format!("{}: {}", what, e)))
}

/// Borrow `len` integers starting at `ptr` without copying
///
/// A null pointer is accepted only together with `len == 0`.
///
/// # Safety
///
/// A non-null `ptr` must point to `len` initialised integers that stay
/// alive and unmodified for `'a`.
pub(crate) unsafe fn borrow_slice<'a>(
    ptr: *const i64,
    len: usize,
    what: &'static str,
) -> Result<&'a [i64]> {
    if ptr.is_null() {
        if len == 0 {
            return Ok(&[]);
        }
        return Err(BridgeError::NullPointer(what));
    }
    check_len::<i64>(len, what)?;
    Ok(std::slice::from_raw_parts(ptr, len))
}

/// Copy `len` integers starting at `ptr`
///
/// # Safety
///
/// Same requirements as [`borrow_slice`], for the duration of the call.
pub(crate) unsafe fn copy_vector(ptr: *const i64, len: usize, what: &'static str) -> Result<Vector> {
    borrow_slice(ptr, len, what).map(Vector::copy_from)
}

/// Unbox every element of a list; absent elements are kept as `None`
///
/// # Safety
///
/// `list.items` must be null (with `len == 0`) or point to `len` pointers,
/// each null or pointing to an initialised integer.
pub(crate) unsafe fn unbox_list(list: MylibLongList, what: &'static str) -> Result<Vec<Option<i64>>> {
    if list.items.is_null() {
        if list.len == 0 {
            return Ok(Vec::new());
        }
        return Err(BridgeError::NullPointer(what));
    }
    check_len::<*const i64>(list.len, what)?;
    let items = std::slice::from_raw_parts(list.items, list.len);
    Ok(items.iter().map(|item| item.as_ref().copied()).collect())
}

/// Hand a string to the caller, who frees it with `mylib_string_free`
pub(crate) fn into_c_string(value: String) -> Result<*mut c_char> {
    CString::new(value)
        .map(CString::into_raw)
        .map_err(|e| BridgeError::EncodingError(format!("interior NUL at byte {}", e.nul_position())))
}

/// Write `value` through an out-pointer
///
/// # Safety
///
/// A non-null `out` must be valid for writes.
pub(crate) unsafe fn write_out<T>(out: *mut T, value: T, what: &'static str) -> Result<()> {
    if out.is_null() {
        return Err(BridgeError::NullPointer(what));
    }
    out.write(value);
    Ok(())
}
