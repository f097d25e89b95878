//! nistats-core: First-level fMRI GLM estimation for nistats-rs
//!
//! Implements per-voxel OLS and AR(1) regression with coefficient batching,
//! t / F / conjunction contrasts with variance propagation, the
//! multi-session model, EPI mask estimation and model serialization.

pub mod contrast;
pub mod error;
pub mod glm;
pub mod model;
pub mod util;

pub use contrast::{Contrast, ContrastStatConfig, ContrastType};
pub use error::GlmError;
pub use glm::{data_scaling, session_glm, FittedGlm, GeneralLinearModel, NoiseModel};
pub use model::{ContrastOptions, FitOptions, FmriLinearModel, MaskInput};
