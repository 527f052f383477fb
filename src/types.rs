//! Scalar bound shared by every module.

pub use ndarray_linalg::types::Lapack;
pub use ndarray_linalg::Scalar;

/// Element types this crate can factorize and solve against.
///
/// Just a convenience bound bundling `ndarray_linalg`'s own `Scalar` and
/// `Lapack` traits so call sites don't have to spell both out; this crate
/// never adds capabilities to it.
pub trait Elem: Scalar + Lapack {}
impl<T: Scalar + Lapack> Elem for T {}
