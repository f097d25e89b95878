//! nistats-linalg: Linear algebra wrappers for nistats-rs
//!
//! Provides the dense matrix type shared by every crate in the workspace,
//! plus the decompositions the GLM relies on: Cholesky, symmetric
//! eigendecomposition, and an SVD pseudo-inverse with numerical rank.

pub mod decomposition;
pub mod dense;

pub use decomposition::LinalgError;
pub use dense::DenseMatrix;
