//! ModelArchive: a fitted multi-session model in serializable form.
//!
//! Matrices are stored as flat column-major vectors with their dimensions,
//! so the archive depends only on serde and can be written as bincode or
//! JSON.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use nistats_io::Image;
use nistats_linalg::DenseMatrix;

use super::multi_session::{FitOptions, FittedModel};
use crate::error::GlmError;
use crate::glm::{BatchLabel, FittedGlm, RegressionResults};

/// A fitted model, written to .nsglm files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelArchive {
    /// Magic bytes for validation.
    pub magic: [u8; 4],
    /// Version number for forward compatibility.
    pub version: u32,
    /// Options the model was fit with.
    pub options: FitOptions,
    /// Binary analysis mask; carries the grid shape and affine.
    pub mask: Image,
    /// Per-session mean images.
    pub means: Vec<Image>,
    pub sessions: Vec<SessionRecord>,
}

/// One fitted session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub n_scans: usize,
    pub n_regressors: usize,
    /// Design matrix as flat col-major vector (n_scans x n_regressors).
    pub design: Vec<f64>,
    /// Batch label of every masked voxel.
    pub labels: Vec<BatchLabel>,
    pub batches: Vec<BatchRecord>,
}

/// Regression results of one batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRecord {
    pub label: BatchLabel,
    pub rho: f64,
    pub n_units: usize,
    /// Coefficients as flat col-major vector (n_regressors x n_units).
    pub theta: Vec<f64>,
    pub dispersion: Vec<f64>,
    pub log_likelihood: Vec<f64>,
    /// Normalized covariance as flat col-major vector.
    pub normalized_cov: Vec<f64>,
    pub df_resid: usize,
    pub df_model: usize,
    pub n_obs: usize,
}

impl ModelArchive {
    /// Magic bytes: "NSGL" (NiStats GLm).
    pub const MAGIC: [u8; 4] = [b'N', b'S', b'G', b'L'];
    /// Current archive version.
    pub const VERSION: u32 = 1;

    pub fn from_fitted(model: &FittedModel) -> Self {
        let sessions = model
            .sessions()
            .iter()
            .map(|glm| SessionRecord {
                n_scans: glm.design().nrows(),
                n_regressors: glm.n_regressors(),
                design: glm.design().to_col_major(),
                labels: glm.labels().to_vec(),
                batches: glm
                    .results()
                    .iter()
                    .map(|(label, res)| BatchRecord {
                        label: *label,
                        rho: res.rho,
                        n_units: res.n_units(),
                        theta: res.theta.to_col_major(),
                        dispersion: res.dispersion.clone(),
                        log_likelihood: res.log_likelihood.clone(),
                        normalized_cov: res.normalized_cov.to_col_major(),
                        df_resid: res.df_resid,
                        df_model: res.df_model,
                        n_obs: res.n_obs,
                    })
                    .collect(),
            })
            .collect();

        Self {
            magic: Self::MAGIC,
            version: Self::VERSION,
            options: *model.options(),
            mask: model.mask().clone(),
            means: model.means().to_vec(),
            sessions,
        }
    }

    /// Rebuild the fitted model, checking every stored dimension.
    pub fn into_fitted(self) -> Result<FittedModel, GlmError> {
        let options = self.options;
        let sessions = self
            .sessions
            .into_iter()
            .map(|s| s.into_glm(&options))
            .collect::<Result<Vec<_>, _>>()?;
        FittedModel::new(sessions, self.means, self.mask, options)
    }

    pub fn n_sessions(&self) -> usize {
        self.sessions.len()
    }

    pub fn n_voxels(&self) -> usize {
        self.mask.nonzero_voxels().len()
    }
}

fn matrix(data: Vec<f64>, nrows: usize, ncols: usize, what: &str) -> Result<DenseMatrix, GlmError> {
    if data.len() != nrows * ncols {
        return Err(GlmError::dims(what, nrows * ncols, data.len()));
    }
    Ok(DenseMatrix::from_col_major(nrows, ncols, data))
}

impl SessionRecord {
    fn into_glm(self, options: &FitOptions) -> Result<FittedGlm, GlmError> {
        let q = self.n_regressors;
        let design = matrix(self.design, self.n_scans, q, "archived design")?;
        let mut results = BTreeMap::new();
        for b in self.batches {
            if b.dispersion.len() != b.n_units || b.log_likelihood.len() != b.n_units {
                return Err(GlmError::dims(
                    "archived batch dispersion",
                    b.n_units,
                    b.dispersion.len(),
                ));
            }
            let res = RegressionResults {
                rho: b.rho,
                theta: matrix(b.theta, q, b.n_units, "archived coefficients")?,
                dispersion: b.dispersion,
                log_likelihood: b.log_likelihood,
                normalized_cov: matrix(b.normalized_cov, q, q, "archived covariance")?,
                df_resid: b.df_resid,
                df_model: b.df_model,
                n_obs: b.n_obs,
            };
            results.insert(b.label, res);
        }
        FittedGlm::from_parts(design, options.noise_model, options.ar_bins, self.labels, results)
    }
}
