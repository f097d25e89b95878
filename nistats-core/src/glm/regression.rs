#![allow(clippy::needless_range_loop)]
//! Whitened least-squares regression and per-batch results.
//!
//! A `RegressionModel` is built once per AR coefficient:
//!   WX = whiten(X, rho),  beta = pinv(WX) * whiten(Y, rho)
//!   dispersion = ||WY - WX beta||^2 / (n - rank(X))
//! and `RegressionResults` holds what the contrasts need: coefficients,
//! dispersion and the normalized covariance (WX'WX)^+.

use std::f64::consts::PI;

use nistats_linalg::decomposition::{inverse_symmetric, pseudo_inverse, PseudoInverse};
use nistats_linalg::DenseMatrix;

use super::noise::whiten;
use crate::error::GlmError;
use crate::util::math::positive_reciprocal;

/// A least-squares model on an AR(1)-whitened design.
#[derive(Debug, Clone)]
pub struct RegressionModel {
    rho: f64,
    wdesign: DenseMatrix,
    pinv: PseudoInverse,
    df_resid: usize,
}

impl RegressionModel {
    /// Ordinary least squares.
    pub fn ols(design: &DenseMatrix) -> Result<Self, GlmError> {
        Self::ar1(design, 0.0)
    }

    /// Least squares after AR(1) whitening with coefficient `rho`.
    pub fn ar1(design: &DenseMatrix, rho: f64) -> Result<Self, GlmError> {
        let wdesign = whiten(design, rho);
        let pinv = pseudo_inverse(&wdesign)?;
        let n = design.nrows();
        if n <= pinv.rank {
            return Err(GlmError::InvalidArgument(format!(
                "design with rank {} leaves no residual degrees of freedom for {} scans",
                pinv.rank, n
            )));
        }
        Ok(Self {
            rho,
            df_resid: n - pinv.rank,
            wdesign,
            pinv,
        })
    }

    pub fn rho(&self) -> f64 {
        self.rho
    }

    pub fn df_resid(&self) -> usize {
        self.df_resid
    }

    pub fn rank(&self) -> usize {
        self.pinv.rank
    }

    /// Fit the model to every column of `y` (observations x units).
    pub fn fit(&self, y: &DenseMatrix) -> Result<RegressionResults, GlmError> {
        Ok(self.fit_with_residuals(y)?.0)
    }

    /// Fit and also return the whitened residuals.
    pub fn fit_with_residuals(
        &self,
        y: &DenseMatrix,
    ) -> Result<(RegressionResults, DenseMatrix), GlmError> {
        let n_obs = self.wdesign.nrows();
        if y.nrows() != n_obs {
            return Err(GlmError::dims("data rows (scans)", n_obs, y.nrows()));
        }
        let wy = whiten(y, self.rho);
        let theta = self.pinv.pinv.mat_mul(&wy);
        let wresid = wy.sub(&self.wdesign.mat_mul(&theta));
        let sse = wresid.col_sum_squares();

        let df = self.df_resid as f64;
        let nf = n_obs as f64;
        let dispersion: Vec<f64> = sse.iter().map(|s| s / df).collect();
        // Maximum-likelihood Gaussian log-likelihood with sigma^2 = SSE / n
        let log_likelihood: Vec<f64> = sse
            .iter()
            .map(|s| {
                let sigma2 = s / nf;
                -0.5 * nf * (2.0 * PI * sigma2).ln() - 0.5 * nf
            })
            .collect();

        let results = RegressionResults {
            rho: self.rho,
            theta,
            dispersion,
            log_likelihood,
            normalized_cov: self.pinv.gram_pinv.clone(),
            df_resid: self.df_resid,
            df_model: self.pinv.rank,
            n_obs,
        };
        Ok((results, wresid))
    }
}

/// Fitted parameters for one batch of units sharing an AR coefficient.
#[derive(Debug, Clone)]
pub struct RegressionResults {
    /// AR coefficient used for whitening (0 for OLS).
    pub rho: f64,
    /// Coefficients, regressors x units.
    pub theta: DenseMatrix,
    /// Residual mean square per unit.
    pub dispersion: Vec<f64>,
    /// Gaussian log-likelihood per unit.
    pub log_likelihood: Vec<f64>,
    /// (WX'WX)^+, regressors x regressors.
    pub normalized_cov: DenseMatrix,
    pub df_resid: usize,
    pub df_model: usize,
    pub n_obs: usize,
}

/// t statistic of a single-row contrast on one batch.
#[derive(Debug, Clone)]
pub struct TContrastResults {
    pub t: Vec<f64>,
    pub effect: Vec<f64>,
    pub sd: Vec<f64>,
    pub df_den: usize,
}

/// F statistic of a (possibly multi-row) contrast on one batch.
#[derive(Debug, Clone)]
pub struct FContrastResults {
    pub f: Vec<f64>,
    /// Contrast rows x units.
    pub effect: DenseMatrix,
    /// Row-major k x k covariance per unit, (k*k) x units.
    pub covariance: DenseMatrix,
    pub df_num: usize,
    pub df_den: usize,
}

/// sum_a sum_b ci[a] cov[a, b] cj[b], always in the same order so that
/// a diagonal entry equals the single-row value bit for bit.
fn quadratic_form(ci: &[f64], cov: &DenseMatrix, cj: &[f64]) -> f64 {
    let mut s = 0.0;
    for a in 0..ci.len() {
        let mut inner = 0.0;
        for b in 0..cj.len() {
            inner += cov.get(a, b) * cj[b];
        }
        s += ci[a] * inner;
    }
    s
}

impl RegressionResults {
    pub fn n_units(&self) -> usize {
        self.theta.ncols()
    }

    pub fn n_regressors(&self) -> usize {
        self.theta.nrows()
    }

    fn check_width(&self, width: usize) -> Result<(), GlmError> {
        if width != self.n_regressors() {
            return Err(GlmError::dims(
                "contrast columns (regressors)",
                self.n_regressors(),
                width,
            ));
        }
        Ok(())
    }

    /// C Cov C' for a contrast matrix (dispersion 1).
    pub fn contrast_covariance(&self, con: &DenseMatrix) -> Result<DenseMatrix, GlmError> {
        self.check_width(con.ncols())?;
        let k = con.nrows();
        let rows: Vec<Vec<f64>> = (0..k).map(|i| con.row(i)).collect();
        Ok(DenseMatrix::from_fn(k, k, |i, j| {
            quadratic_form(&rows[i], &self.normalized_cov, &rows[j])
        }))
    }

    /// Effect (k x units) and variance ((k*k) x units, row-major blocks)
    /// of a contrast on this batch.
    pub fn contrast_moments(
        &self,
        con: &DenseMatrix,
    ) -> Result<(DenseMatrix, DenseMatrix), GlmError> {
        let cov_c = self.contrast_covariance(con)?;
        let k = con.nrows();
        let n = self.n_units();
        let rows: Vec<Vec<f64>> = (0..k).map(|i| con.row(i)).collect();
        let effect = DenseMatrix::from_fn(k, n, |i, v| {
            rows[i]
                .iter()
                .enumerate()
                .map(|(b, c)| c * self.theta.get(b, v))
                .sum()
        });
        let variance = DenseMatrix::from_fn(k * k, n, |r, v| {
            cov_c.get(r / k, r % k) * self.dispersion[v]
        });
        Ok((effect, variance))
    }

    /// t contrast for a single contrast vector.
    pub fn t_contrast(&self, con: &[f64]) -> Result<TContrastResults, GlmError> {
        let (effect, variance) = self.contrast_moments(&DenseMatrix::row_vector(con))?;
        let effect = effect.row(0);
        let sd: Vec<f64> = variance.row(0).iter().map(|v| v.max(0.0).sqrt()).collect();
        let t = effect
            .iter()
            .zip(sd.iter())
            .map(|(e, s)| e * positive_reciprocal(*s))
            .collect();
        Ok(TContrastResults {
            t,
            effect,
            sd,
            df_den: self.df_resid,
        })
    }

    /// F contrast: F = e' (C Cov C')^{-1} e / (k * dispersion).
    pub fn f_contrast(&self, con: &DenseMatrix) -> Result<FContrastResults, GlmError> {
        let cov_c = self.contrast_covariance(con)?;
        let inv = inverse_symmetric(&cov_c)?;
        let k = con.nrows();
        let (effect, covariance) = self.contrast_moments(con)?;
        let f = (0..self.n_units())
            .map(|v| {
                let e = effect.col(v);
                let q = DenseMatrix::dot(&e, &inv.mat_vec(&e));
                q * positive_reciprocal(k as f64 * self.dispersion[v])
            })
            .collect();
        Ok(FContrastResults {
            f,
            effect,
            covariance,
            df_num: k,
            df_den: self.df_resid,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// y = 2 + 3 x + small deterministic wiggle
    fn line_fit() -> (DenseMatrix, DenseMatrix) {
        let n = 20;
        let x = DenseMatrix::from_fn(n, 2, |i, j| if j == 0 { 1.0 } else { i as f64 / n as f64 });
        let y = DenseMatrix::from_fn(n, 2, |i, j| {
            let xi = i as f64 / n as f64;
            let wiggle = if i % 2 == 0 { 0.01 } else { -0.01 };
            if j == 0 {
                2.0 + 3.0 * xi + wiggle
            } else {
                -1.0 + wiggle * 3.0
            }
        });
        (x, y)
    }

    #[test]
    fn test_ols_recovers_coefficients() {
        let (x, y) = line_fit();
        let model = RegressionModel::ols(&x).unwrap();
        assert_eq!(model.rank(), 2);
        assert_eq!(model.df_resid(), 18);

        let res = model.fit(&y).unwrap();
        assert_eq!(res.n_units(), 2);
        assert!((res.theta.get(0, 0) - 2.0).abs() < 0.01);
        assert!((res.theta.get(1, 0) - 3.0).abs() < 0.01);
        assert!((res.theta.get(0, 1) + 1.0).abs() < 0.01);
        assert!(res.theta.get(1, 1).abs() < 0.01);
        assert!(res.dispersion.iter().all(|&d| d > 0.0 && d < 1e-3));
        assert!(res.log_likelihood.iter().all(|l| l.is_finite()));
    }

    #[test]
    fn test_raw_cubic_drift_keeps_full_rank() {
        // Intercept plus an unscaled cubic drift over 100 scans
        let n = 100;
        let x = DenseMatrix::from_fn(n, 2, |i, j| {
            if j == 0 {
                1.0
            } else {
                (2.0 * i as f64).powi(3)
            }
        });
        let y = DenseMatrix::from_fn(n, 1, |i, _| {
            let wiggle = if i % 2 == 0 { 0.01 } else { -0.01 };
            3.0 + 1e-6 * x.get(i, 1) + wiggle
        });

        let model = RegressionModel::ols(&x).unwrap();
        assert_eq!(model.rank(), 2);
        assert_eq!(model.df_resid(), 98);

        let res = model.fit(&y).unwrap();
        assert_eq!(res.df_model, 2);
        assert!((res.theta.get(0, 0) - 3.0).abs() < 0.01, "{}", res.theta.get(0, 0));
        assert!((res.theta.get(1, 0) / 1e-6 - 1.0).abs() < 1e-3, "{}", res.theta.get(1, 0));
        assert!(res.dispersion[0] < 2e-4);
    }

    #[test]
    fn test_row_mismatch() {
        let (x, _) = line_fit();
        let model = RegressionModel::ols(&x).unwrap();
        let y = DenseMatrix::zeros(7, 3);
        assert!(matches!(
            model.fit(&y),
            Err(GlmError::DimensionMismatch { expected: 20, got: 7, .. })
        ));
    }

    #[test]
    fn test_no_residual_dof() {
        let x = DenseMatrix::identity(3);
        assert!(matches!(
            RegressionModel::ols(&x),
            Err(GlmError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_t_contrast_matches_f_for_single_row() {
        let (x, y) = line_fit();
        let res = RegressionModel::ar1(&x, 0.3).unwrap().fit(&y).unwrap();
        let t = res.t_contrast(&[0.0, 1.0]).unwrap();
        let f = res
            .f_contrast(&DenseMatrix::row_vector(&[0.0, 1.0]))
            .unwrap();
        assert_eq!(f.df_num, 1);
        for v in 0..2 {
            assert!((t.t[v] * t.t[v] - f.f[v]).abs() < 1e-8 * f.f[v].abs().max(1.0));
            assert_eq!(t.effect[v], f.effect.get(0, v));
        }
    }

    #[test]
    fn test_contrast_moments_diagonal_is_bitwise_single_row() {
        let (x, y) = line_fit();
        let res = RegressionModel::ols(&x).unwrap().fit(&y).unwrap();
        let both = DenseMatrix::identity(2);
        let (e2, v2) = res.contrast_moments(&both).unwrap();
        for i in 0..2 {
            let row = DenseMatrix::row_vector(&both.row(i));
            let (e1, v1) = res.contrast_moments(&row).unwrap();
            for u in 0..2 {
                assert_eq!(e1.get(0, u), e2.get(i, u));
                assert_eq!(v1.get(0, u), v2.get(i * 2 + i, u));
            }
        }
    }

    #[test]
    fn test_contrast_width_checked() {
        let (x, y) = line_fit();
        let res = RegressionModel::ols(&x).unwrap().fit(&y).unwrap();
        assert!(res.t_contrast(&[1.0, 0.0, 0.0]).is_err());
    }
}
