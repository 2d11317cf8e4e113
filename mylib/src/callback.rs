//! Callback delivery
//!
//! A callback is caller-owned logic taking one `i64`. The library either
//! invokes it on the caller's stack ([`deliver`]) or retains a
//! [`CallbackRef`] so it can be invoked later, from a counter or from a
//! worker thread. The retained reference is released as soon as its last
//! owner inside the library is dropped.

use crate::types::CallbackError;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// Caller-supplied logic invoked with a single integer
///
/// Implementations must be `Send + Sync`: retained callbacks may be invoked
/// from a thread other than the one that registered them.
pub trait Callback: Send + Sync {
    fn call(&self, value: i64) -> Result<(), CallbackError>;
}

impl<F> Callback for F
where
    F: Fn(i64) -> Result<(), CallbackError> + Send + Sync,
{
    fn call(&self, value: i64) -> Result<(), CallbackError> {
        self(value)
    }
}

/// Reference-counted callback retained by the library
pub type CallbackRef = Arc<dyn Callback>;

/// Wrap a closure into a retained callback reference
pub fn callback_ref<F>(f: F) -> CallbackRef
where
    F: Fn(i64) -> Result<(), CallbackError> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Invoke `callback` once with `value`
///
/// A panic raised by the callback is caught and reported as
/// [`CallbackError::Panicked`] instead of unwinding into the library.
pub fn deliver(callback: &dyn Callback, value: i64) -> Result<(), CallbackError> {
    log::trace!("Delivering value {} to callback", value);
    match catch_unwind(AssertUnwindSafe(|| callback.call(value))) {
        Ok(result) => result,
        Err(_) => {
            log::error!("Callback panicked while receiving value {}", value);
            Err(CallbackError::Panicked)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI64, Ordering};

    #[test]
    fn test_deliver_closure() {
        let last = AtomicI64::new(0);
        let callback = |v: i64| -> Result<(), CallbackError> {
            last.store(v, Ordering::SeqCst);
            Ok(())
        };

        deliver(&callback, 42).unwrap();
        assert_eq!(last.load(Ordering::SeqCst), 42);
    }

    #[test]
    fn test_deliver_propagates_error() {
        let callback = |_: i64| -> Result<(), CallbackError> { Err(CallbackError::Status(3)) };
        assert_eq!(deliver(&callback, 1), Err(CallbackError::Status(3)));
    }

    #[test]
    fn test_deliver_catches_panic() {
        let callback = |_: i64| -> Result<(), CallbackError> { panic!("boom") };
        assert_eq!(deliver(&callback, 1), Err(CallbackError::Panicked));
    }

    #[test]
    fn test_callback_ref_outlives_registration_scope() {
        let hits = Arc::new(AtomicI64::new(0));
        let retained = {
            let hits = Arc::clone(&hits);
            callback_ref(move |v| {
                hits.fetch_add(v, Ordering::SeqCst);
                Ok(())
            })
        };

        deliver(retained.as_ref(), 2).unwrap();
        deliver(retained.as_ref(), 3).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 5);

        drop(retained);
        assert_eq!(Arc::strong_count(&hits), 1);
    }
}
