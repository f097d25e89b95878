//! Error type shared by the GLM core.

use nistats_linalg::LinalgError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GlmError {
    #[error("Dimension mismatch in {what}: expected {expected}, got {got}")]
    DimensionMismatch {
        what: String,
        expected: usize,
        got: usize,
    },

    #[error("Unknown noise model '{0}' (expected 'ols' or 'ar1')")]
    InvalidNoiseModel(String),

    #[error("Unknown contrast type '{0}' (expected 't', 'F' or 'tmin-conjunction')")]
    InvalidContrastType(String),

    #[error("Incompatible number of sessions: {what} has {got} entries, expected {expected}")]
    SessionCountMismatch {
        what: String,
        expected: usize,
        got: usize,
    },

    #[error("Cannot combine contrasts: {0}")]
    IncompatibleContrasts(String),

    #[error("The model has not been estimated yet; run fit() first")]
    NotFitted,

    #[error("Every session contrast is null")]
    NullContrast,

    #[error("Invalid mask: {0}")]
    InvalidMask(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Linalg(#[from] LinalgError),

    #[error(transparent)]
    Io(#[from] anyhow::Error),
}

impl GlmError {
    pub(crate) fn dims(what: impl Into<String>, expected: usize, got: usize) -> Self {
        GlmError::DimensionMismatch {
            what: what.into(),
            expected,
            got,
        }
    }
}
