//! Numeric helpers shared across the GLM.

pub mod math;
