//! Scalar reference kernels: the oracle side of differential kernel testing.
//!
//! These serve as:
//! 1. Golden reference for bit-exact comparison against optimized kernels.
//! 2. A fixed statement of summation order: every output element is produced
//!    by one scalar accumulator walked in a documented order, so rounding is
//!    reproducible on every platform.
//!
//! This crate is compiled with `opt-level = 1` in dev/test profiles
//! (configured in the workspace root Cargo.toml) so sweeps stay tractable in
//! debug runs without letting the compiler reassociate anything: floating
//! point adds are never reordered by rustc, only vectorized when that is
//! exact, so the loop structure here is the rounding contract.
//!
//! All entry points take slices and panic if a slice is shorter than its
//! geometry requires; callers size buffers from the same geometry types.

pub mod blas;
pub mod conv;
pub mod pool;
pub mod shape;

pub use blas::{scalar_sgemm, SgemmDims, Transpose};
pub use conv::{scalar_conv, scalar_im2col};
pub use pool::{scalar_pool, PoolingKind};
pub use shape::{volume, ConvGeometry, IndexIter, PoolGeometry};
