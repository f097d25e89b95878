//! Noise models and AR(1) coefficient binning.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use nistats_linalg::DenseMatrix;

use crate::error::GlmError;

/// Default number of AR coefficient quantization steps per unit of rho.
pub const DEFAULT_AR_BINS: usize = 100;

/// Residual noise model of a session GLM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum NoiseModel {
    /// Independent residuals with a per-voxel variance.
    Ols,
    /// First-order autoregressive residuals, one coefficient per voxel.
    #[default]
    Ar1,
}

impl FromStr for NoiseModel {
    type Err = GlmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ols" => Ok(NoiseModel::Ols),
            "ar1" => Ok(NoiseModel::Ar1),
            _ => Err(GlmError::InvalidNoiseModel(s.to_string())),
        }
    }
}

impl fmt::Display for NoiseModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NoiseModel::Ols => write!(f, "ols"),
            NoiseModel::Ar1 => write!(f, "ar1"),
        }
    }
}

/// Key of one regression batch: a quantized AR(1) coefficient.
///
/// `bin` counts steps of `1 / bins`; OLS fits use the single label
/// `BatchLabel::OLS` whose value is 0.0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BatchLabel {
    pub bin: i64,
    pub bins: usize,
}

impl BatchLabel {
    pub const OLS: BatchLabel = BatchLabel { bin: 0, bins: 1 };

    /// Quantize an AR coefficient by truncating `rho * bins` toward zero.
    /// Non-finite coefficients land in bin 0.
    pub fn quantize(rho: f64, bins: usize) -> Self {
        let bin = if rho.is_finite() {
            (rho * bins as f64).trunc() as i64
        } else {
            0
        };
        BatchLabel { bin, bins }
    }

    /// The AR coefficient this label stands for.
    pub fn rho(&self) -> f64 {
        self.bin as f64 / self.bins.max(1) as f64
    }
}

impl fmt::Display for BatchLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.4}", self.rho())
    }
}

/// Lag-1 autocorrelation of each column of a residual matrix:
/// sum_t r_t r_{t-1} / sum_t r_t^2.
pub fn ar1_coefficients(residuals: &DenseMatrix) -> Vec<f64> {
    let n = residuals.nrows();
    (0..residuals.ncols())
        .map(|j| {
            let mut num = 0.0;
            let mut den = 0.0;
            for t in 0..n {
                let r = residuals.get(t, j);
                den += r * r;
                if t > 0 {
                    num += r * residuals.get(t - 1, j);
                }
            }
            num / den
        })
        .collect()
}

/// AR(1) whitening of every column: w_0 = x_0, w_t = x_t - rho * x_{t-1}.
pub fn whiten(m: &DenseMatrix, rho: f64) -> DenseMatrix {
    if rho == 0.0 {
        return m.clone();
    }
    DenseMatrix::from_fn(m.nrows(), m.ncols(), |t, j| {
        if t == 0 {
            m.get(0, j)
        } else {
            m.get(t, j) - rho * m.get(t - 1, j)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_noise_model() {
        assert_eq!("ols".parse::<NoiseModel>().unwrap(), NoiseModel::Ols);
        assert_eq!("AR1".parse::<NoiseModel>().unwrap(), NoiseModel::Ar1);
        assert!(matches!(
            "ar2".parse::<NoiseModel>(),
            Err(GlmError::InvalidNoiseModel(s)) if s == "ar2"
        ));
        assert_eq!(NoiseModel::default(), NoiseModel::Ar1);
        assert_eq!(NoiseModel::Ols.to_string(), "ols");
    }

    #[test]
    fn test_quantize_truncates_toward_zero() {
        assert_eq!(BatchLabel::quantize(0.237, 100).bin, 23);
        assert_eq!(BatchLabel::quantize(-0.237, 100).bin, -23);
        assert_eq!(BatchLabel::quantize(0.237, 10).bin, 2);
        assert_eq!(BatchLabel::quantize(f64::NAN, 100).bin, 0);
        assert!((BatchLabel::quantize(-0.237, 100).rho() + 0.23).abs() < 1e-12);
        assert_eq!(BatchLabel::OLS.rho(), 0.0);
    }

    #[test]
    fn test_ar1_coefficients() {
        // Alternating residuals are perfectly anti-correlated
        let r = DenseMatrix::from_fn(6, 1, |t, _| if t % 2 == 0 { 1.0 } else { -1.0 });
        let rho = ar1_coefficients(&r);
        // sum r_t r_{t-1} = -5, sum r^2 = 6
        assert!((rho[0] + 5.0 / 6.0).abs() < 1e-12);
    }

    #[test]
    fn test_whiten() {
        let m = DenseMatrix::from_row_major(3, 1, &[1.0, 2.0, 4.0]);
        let w = whiten(&m, 0.5);
        assert_eq!(w.col(0), vec![1.0, 1.5, 3.0]);
        assert_eq!(whiten(&m, 0.0).col(0), m.col(0));
    }
}
