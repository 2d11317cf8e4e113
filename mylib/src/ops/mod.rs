//! Pure scalar and vector operations
//!
//! These functions hold no state. Callers on the far side of the C ABI
//! reach them through `crate::ffi`, Rust callers use them directly.

pub mod greeting;
pub mod vector;

// Re-export operation entry points
pub use greeting::{hello, hello_utf8};
pub use vector::{
    dot_product, dot_product_consume, dot_product_critical, dot_product_list, Vector,
};
