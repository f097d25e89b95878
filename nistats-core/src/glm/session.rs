//! Single-session GLM: OLS or AR(1) fits grouped into coefficient batches.

use std::collections::BTreeMap;

use rayon::prelude::*;
use tracing::{debug, info, warn};

use nistats_linalg::DenseMatrix;

use super::noise::{ar1_coefficients, BatchLabel, NoiseModel};
use super::regression::{RegressionModel, RegressionResults};
use crate::contrast::{Contrast, ContrastType};
use crate::error::GlmError;

/// Per-unit batch labels and the regression results of every batch.
pub type SessionFit = (Vec<BatchLabel>, BTreeMap<BatchLabel, RegressionResults>);

/// Fit `y` (scans x units) on design `x` (scans x regressors).
///
/// With `NoiseModel::Ols` every unit lands in the single batch
/// `BatchLabel::OLS`. With `NoiseModel::Ar1` an OLS pass estimates each
/// unit's lag-1 residual autocorrelation, which is quantized into `bins`
/// steps per unit of rho; units sharing a label are refit together on the
/// whitened system.
pub fn session_glm(
    y: &DenseMatrix,
    x: &DenseMatrix,
    noise_model: NoiseModel,
    bins: usize,
) -> Result<SessionFit, GlmError> {
    if x.nrows() != y.nrows() {
        return Err(GlmError::dims("design rows vs data rows", y.nrows(), x.nrows()));
    }
    if y.ncols() == 0 {
        return Err(GlmError::InvalidArgument(
            "session data has no units of analysis".into(),
        ));
    }
    if bins == 0 {
        return Err(GlmError::InvalidArgument("ar_bins must be positive".into()));
    }

    let ols = RegressionModel::ols(x)?;
    if ols.rank() < x.ncols() {
        warn!(
            "Design matrix is rank deficient ({} of {} columns); using the pseudo-inverse",
            ols.rank(),
            x.ncols()
        );
    }
    let (ols_results, residuals) = ols.fit_with_residuals(y)?;

    if noise_model == NoiseModel::Ols {
        debug!("OLS fit: {} units, df_resid = {}", y.ncols(), ols.df_resid());
        let labels = vec![BatchLabel::OLS; y.ncols()];
        let mut results = BTreeMap::new();
        results.insert(BatchLabel::OLS, ols_results);
        return Ok((labels, results));
    }

    let labels: Vec<BatchLabel> = ar1_coefficients(&residuals)
        .into_iter()
        .map(|rho| BatchLabel::quantize(rho, bins))
        .collect();
    let groups = group_units(&labels);
    info!(
        "AR(1) fit: {} units in {} batches ({} bins)",
        y.ncols(),
        groups.len(),
        bins
    );

    let fitted: Vec<(BatchLabel, RegressionResults)> = groups
        .into_par_iter()
        .map(|(label, units)| {
            let model = RegressionModel::ar1(x, label.rho())?;
            let res = model.fit(&y.select_cols(&units))?;
            debug!("batch rho={}: {} units", label, units.len());
            Ok::<_, GlmError>((label, res))
        })
        .collect::<Result<_, _>>()?;

    Ok((labels, fitted.into_iter().collect()))
}

/// Unit indices of each distinct label, in label order.
fn group_units(labels: &[BatchLabel]) -> Vec<(BatchLabel, Vec<usize>)> {
    let mut groups: BTreeMap<BatchLabel, Vec<usize>> = BTreeMap::new();
    for (i, &label) in labels.iter().enumerate() {
        groups.entry(label).or_default().push(i);
    }
    groups.into_iter().collect()
}

/// A design matrix waiting to be fit.
#[derive(Debug, Clone)]
pub struct GeneralLinearModel {
    design: DenseMatrix,
}

impl GeneralLinearModel {
    pub fn new(design: DenseMatrix) -> Self {
        Self { design }
    }

    pub fn design(&self) -> &DenseMatrix {
        &self.design
    }

    pub fn fit(
        self,
        y: &DenseMatrix,
        noise_model: NoiseModel,
        bins: usize,
    ) -> Result<FittedGlm, GlmError> {
        let (labels, results) = session_glm(y, &self.design, noise_model, bins)?;
        FittedGlm::from_parts(self.design, noise_model, bins, labels, results)
    }
}

/// A fitted session: design, per-unit labels and per-batch results.
#[derive(Debug, Clone)]
pub struct FittedGlm {
    design: DenseMatrix,
    noise_model: NoiseModel,
    ar_bins: usize,
    labels: Vec<BatchLabel>,
    results: BTreeMap<BatchLabel, RegressionResults>,
    members: BTreeMap<BatchLabel, Vec<usize>>,
}

impl FittedGlm {
    /// Reassemble a fit, checking that batches cover exactly the labeled units.
    pub fn from_parts(
        design: DenseMatrix,
        noise_model: NoiseModel,
        ar_bins: usize,
        labels: Vec<BatchLabel>,
        results: BTreeMap<BatchLabel, RegressionResults>,
    ) -> Result<Self, GlmError> {
        if labels.is_empty() {
            return Err(GlmError::InvalidArgument(
                "session data has no units of analysis".into(),
            ));
        }
        let members: BTreeMap<BatchLabel, Vec<usize>> = group_units(&labels).into_iter().collect();
        if members.len() != results.len() {
            return Err(GlmError::dims("regression batches", members.len(), results.len()));
        }
        for (label, units) in &members {
            let res = results.get(label).ok_or_else(|| {
                GlmError::InvalidArgument(format!("no regression results for batch {}", label))
            })?;
            if res.n_units() != units.len() {
                return Err(GlmError::dims(
                    format!("units of batch {}", label),
                    units.len(),
                    res.n_units(),
                ));
            }
            if res.n_regressors() != design.ncols() {
                return Err(GlmError::dims(
                    format!("coefficients of batch {}", label),
                    design.ncols(),
                    res.n_regressors(),
                ));
            }
        }
        Ok(Self {
            design,
            noise_model,
            ar_bins,
            labels,
            results,
            members,
        })
    }

    pub fn design(&self) -> &DenseMatrix {
        &self.design
    }

    pub fn noise_model(&self) -> NoiseModel {
        self.noise_model
    }

    pub fn ar_bins(&self) -> usize {
        self.ar_bins
    }

    pub fn labels(&self) -> &[BatchLabel] {
        &self.labels
    }

    pub fn results(&self) -> &BTreeMap<BatchLabel, RegressionResults> {
        &self.results
    }

    pub fn n_units(&self) -> usize {
        self.labels.len()
    }

    pub fn n_regressors(&self) -> usize {
        self.design.ncols()
    }

    /// Units (column indices) fit in the batch `label`.
    pub fn members(&self, label: &BatchLabel) -> Option<&[usize]> {
        self.members.get(label).map(Vec::as_slice)
    }

    /// Coefficients in unit order, restricted to `columns` when given.
    pub fn beta(&self, columns: Option<&[usize]>) -> Result<DenseMatrix, GlmError> {
        let rows: Vec<usize> = match columns {
            Some(c) => {
                if let Some(&bad) = c.iter().find(|&&j| j >= self.n_regressors()) {
                    return Err(GlmError::InvalidArgument(format!(
                        "regressor index {} out of range (design has {} columns)",
                        bad,
                        self.n_regressors()
                    )));
                }
                c.to_vec()
            }
            None => (0..self.n_regressors()).collect(),
        };
        let mut beta = DenseMatrix::zeros(rows.len(), self.n_units());
        for (label, units) in &self.members {
            let theta = self.results[label].theta.select_rows(&rows);
            beta.scatter_cols(units, &theta);
        }
        Ok(beta)
    }

    /// Residual mean square of each unit.
    pub fn mse(&self) -> Vec<f64> {
        self.scatter(|r| &r.dispersion)
    }

    pub fn log_likelihood(&self) -> Vec<f64> {
        self.scatter(|r| &r.log_likelihood)
    }

    fn scatter<F>(&self, field: F) -> Vec<f64>
    where
        F: Fn(&RegressionResults) -> &Vec<f64>,
    {
        let mut out = vec![0.0; self.n_units()];
        for (label, units) in &self.members {
            for (&u, &v) in units.iter().zip(field(&self.results[label])) {
                out[u] = v;
            }
        }
        out
    }

    /// Contrast `con` (rows x regressors) over every unit.
    ///
    /// Without an explicit type a single row is a t contrast and several rows
    /// an F contrast. A t request with several rows is run as F.
    pub fn contrast(
        &self,
        con: &DenseMatrix,
        contrast_type: Option<ContrastType>,
    ) -> Result<Contrast, GlmError> {
        if con.ncols() != self.n_regressors() {
            return Err(GlmError::dims(
                "contrast columns (regressors)",
                self.n_regressors(),
                con.ncols(),
            ));
        }
        let dim = con.nrows();
        if dim == 0 {
            return Err(GlmError::InvalidArgument("contrast has no rows".into()));
        }
        let contrast_type = match contrast_type {
            None if dim == 1 => ContrastType::T,
            None => ContrastType::F,
            Some(ContrastType::T) if dim > 1 => {
                warn!("t contrast with {} rows; running it as an F contrast", dim);
                ContrastType::F
            }
            Some(t) => t,
        };

        let n = self.n_units();
        let mut effect = DenseMatrix::zeros(dim, n);
        let mut variance = DenseMatrix::zeros(dim * dim, n);
        let mut dof = usize::MAX;
        for (label, units) in &self.members {
            let res = &self.results[label];
            let (e, v) = res.contrast_moments(con)?;
            effect.scatter_cols(units, &e);
            variance.scatter_cols(units, &v);
            dof = dof.min(res.df_resid);
        }
        Contrast::new(effect, variance, dof as f64, contrast_type)
    }
}
