//! nistats-io: Input/output for nistats-rs
//!
//! Provides the in-memory `Image` type (3D grid x frames + affine) with its
//! serde container format, and the delimited-text design matrix loader.

pub mod design;
pub mod image;

pub use design::{load_design_matrix, DesignMatrix};
pub use image::{identity_affine, load_image, save_image, Affine, Image};
