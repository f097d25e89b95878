//! Single-session general linear model.

pub mod noise;
pub mod regression;
pub mod scaling;
pub mod session;

pub use noise::{BatchLabel, NoiseModel, DEFAULT_AR_BINS};
pub use regression::{FContrastResults, RegressionModel, RegressionResults, TContrastResults};
pub use scaling::data_scaling;
pub use session::{session_glm, FittedGlm, GeneralLinearModel, SessionFit};
