//! mylib - Native Bridge Library
//!
//! A small native library meant to be loaded by a managed runtime (or any
//! other host) through a plain C ABI. It offers:
//! - Greeting construction and dot products over 64-bit integer vectors
//! - Synchronous callback delivery on the caller's thread
//! - Counter objects living on the native side, addressed by opaque handles
//! - Background computations reporting progress from a worker thread
//!
//! # Architecture
//!
//! The safe Rust API (this crate's public modules) carries all semantics.
//! The [`ffi`] module is a thin boundary on top of it: it validates raw
//! input once, converts it, calls the Rust API and maps errors to status
//! codes.
//!
//! The library does NOT:
//! - Hand out memory addresses as handles (handles are tagged arena indices)
//! - Let panics or caller errors unwind across the boundary
//! - Cancel running computations
//!
//! # Example Usage
//!
//! ```
//! use mylib::{callback_ref, CounterRegistry};
//!
//! let registry = CounterRegistry::new();
//! let counter = registry
//!     .create(callback_ref(|count| {
//!         println!("count = {}", count);
//!         Ok(())
//!     }))
//!     .unwrap();
//!
//! registry.increment(counter).unwrap();
//! registry.increment(counter).unwrap();
//! assert_eq!(registry.get(counter).unwrap(), 2);
//!
//! registry.destroy(counter).unwrap();
//! assert!(registry.increment(counter).is_err());
//! ```

// Public modules
pub mod callback;
pub mod config;
pub mod counter;
pub mod ffi;
pub mod ops;
pub mod runner;
pub mod types;

// Re-export main types for convenience
pub use callback::{callback_ref, deliver, Callback, CallbackRef};
pub use config::{ComputationConfig, PROGRESS_COMPLETE};
pub use counter::CounterRegistry;
pub use ops::{
    dot_product, dot_product_consume, dot_product_critical, dot_product_list, hello, Vector,
};
pub use runner::{AsyncRunner, Computation, ComputationReport, ErrorSink, ErrorSinkRef};
pub use types::{BridgeError, CallbackError, CounterHandle, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_basics() {
        // Smoke test: the example vectors from the demo program
        assert_eq!(dot_product(&[1, 3, 3, 7], &[1, 9, 8, 4]).unwrap(), 80);
        assert_eq!(hello("Alice"), "Hello Alice");
        assert!(!VERSION.is_empty());
    }
}
