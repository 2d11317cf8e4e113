//! Dot product over 64-bit integer vectors
//!
//! All variants share [`dot_product_critical`]. They only differ in how the
//! operands reached the library:
//! - [`Vector`] holds a copy made at the boundary
//! - plain slices are borrowed straight from the caller's buffers (zero copy)
//! - lists carry boxed elements that may be absent
//!
//! Arithmetic wraps on overflow (two's complement), matching native integer
//! semantics.

use crate::callback::{deliver, Callback};
use crate::types::{BridgeError, Result};

/// An owned, immutable vector of signed 64-bit integers
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Vector(Vec<i64>);

impl Vector {
    /// Copy the elements of `values`
    pub fn copy_from(values: &[i64]) -> Self {
        Self(values.to_vec())
    }

    pub fn as_slice(&self) -> &[i64] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Dot product with another copied vector
    pub fn dot(&self, other: &Vector) -> Result<i64> {
        dot_product_critical(&self.0, &other.0)
    }
}

impl From<Vec<i64>> for Vector {
    fn from(values: Vec<i64>) -> Self {
        Self(values)
    }
}

impl FromIterator<i64> for Vector {
    fn from_iter<T: IntoIterator<Item = i64>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Dot product over copies of the operands
pub fn dot_product(a: &[i64], b: &[i64]) -> Result<i64> {
    Vector::copy_from(a).dot(&Vector::copy_from(b))
}

/// Dot product directly over the given buffers
pub fn dot_product_critical(a: &[i64], b: &[i64]) -> Result<i64> {
    if a.len() != b.len() {
        return Err(BridgeError::LengthMismatch {
            left: a.len(),
            right: b.len(),
        });
    }

    log::trace!("a = {:?}", a);
    log::trace!("b = {:?}", b);

    Ok(a
        .iter()
        .zip(b.iter())
        .fold(0i64, |acc, (x, y)| acc.wrapping_add(x.wrapping_mul(*y))))
}

/// Dot product over list-like operands whose elements may be absent
pub fn dot_product_list(a: &[Option<i64>], b: &[Option<i64>]) -> Result<i64> {
    let unbox = |list: &[Option<i64>]| -> Result<Vector> {
        list.iter()
            .map(|item| item.ok_or(BridgeError::NullPointer("list element")))
            .collect::<Result<Vec<i64>>>()
            .map(Vector::from)
    };

    unbox(a)?.dot(&unbox(b)?)
}

/// Compute the dot product and hand it to `callback` before returning
///
/// The callback runs exactly once, on the calling thread. The result is
/// also returned so Rust callers do not have to capture it.
pub fn dot_product_consume(a: &[i64], b: &[i64], callback: &dyn Callback) -> Result<i64> {
    let result = dot_product_critical(a, b)?;
    log::debug!("Delivering dot product {} to consumer", result);
    deliver(callback, result)?;
    Ok(result)
}
