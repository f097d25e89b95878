//! Contrast estimates and their statistics.
//!
//! A `Contrast` stores, for every unit, the contrast effect (dim values) and
//! its covariance (dim x dim values, row-major). Statistics are computed on
//! demand from those two arrays and the degrees of freedom:
//!
//! - t: (effect - baseline) / sqrt(variance)
//! - F: (effect - baseline)' V^{-1} (effect - baseline) / dim
//! - tmin-conjunction: the smallest per-row t
//!
//! Contrasts from independent sessions combine with `+`; scaling by a
//! constant keeps the statistic unchanged.

use std::fmt;
use std::ops::{Add, Div, Mul};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use nistats_linalg::DenseMatrix;

use crate::error::GlmError;
use crate::util::math::{f_sf, mahalanobis, t_sf, z_score};

/// Kind of test a contrast carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContrastType {
    T,
    F,
    TminConjunction,
}

impl FromStr for ContrastType {
    type Err = GlmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "t" | "T" => Ok(ContrastType::T),
            "F" | "f" => Ok(ContrastType::F),
            "tmin-conjunction" => Ok(ContrastType::TminConjunction),
            _ => Err(GlmError::InvalidContrastType(s.to_string())),
        }
    }
}

impl fmt::Display for ContrastType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContrastType::T => write!(f, "t"),
            ContrastType::F => write!(f, "F"),
            ContrastType::TminConjunction => write!(f, "tmin-conjunction"),
        }
    }
}

/// Numerical guards for contrast statistics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContrastStatConfig {
    /// Floor on variances before taking square roots.
    pub tiny: f64,
    /// Cap on the degrees of freedom passed to the t and F tails.
    pub dofmax: f64,
}

impl Default for ContrastStatConfig {
    fn default() -> Self {
        Self {
            tiny: 1e-50,
            dofmax: 1e10,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Contrast {
    effect: DenseMatrix,
    variance: DenseMatrix,
    dof: f64,
    contrast_type: ContrastType,
    config: ContrastStatConfig,
}

impl Contrast {
    /// `effect` is dim x units, `variance` is (dim * dim) x units.
    pub fn new(
        effect: DenseMatrix,
        variance: DenseMatrix,
        dof: f64,
        contrast_type: ContrastType,
    ) -> Result<Self, GlmError> {
        let dim = effect.nrows();
        if dim == 0 {
            return Err(GlmError::InvalidArgument("contrast has no rows".into()));
        }
        if variance.nrows() != dim * dim {
            return Err(GlmError::dims("contrast variance rows", dim * dim, variance.nrows()));
        }
        if variance.ncols() != effect.ncols() {
            return Err(GlmError::dims("contrast variance units", effect.ncols(), variance.ncols()));
        }
        if dof.is_nan() || dof <= 0.0 {
            return Err(GlmError::InvalidArgument(format!(
                "contrast degrees of freedom must be positive, got {}",
                dof
            )));
        }
        Ok(Self {
            effect,
            variance,
            dof,
            contrast_type,
            config: ContrastStatConfig::default(),
        })
    }

    pub fn with_config(mut self, config: ContrastStatConfig) -> Self {
        self.config = config;
        self
    }

    pub fn effect(&self) -> &DenseMatrix {
        &self.effect
    }

    pub fn variance(&self) -> &DenseMatrix {
        &self.variance
    }

    pub fn dof(&self) -> f64 {
        self.dof
    }

    pub fn contrast_type(&self) -> ContrastType {
        self.contrast_type
    }

    pub fn config(&self) -> ContrastStatConfig {
        self.config
    }

    /// Number of contrast rows.
    pub fn dim(&self) -> usize {
        self.effect.nrows()
    }

    pub fn n_units(&self) -> usize {
        self.effect.ncols()
    }

    /// Statistic of every unit against a zero baseline.
    pub fn stat(&self) -> Vec<f64> {
        self.stat_with_baseline(0.0)
    }

    pub fn stat_with_baseline(&self, baseline: f64) -> Vec<f64> {
        let dim = self.dim();
        let tiny = self.config.tiny;
        (0..self.n_units())
            .map(|u| {
                if dim == 1 {
                    let t = (self.effect.get(0, u) - baseline)
                        / self.variance.get(0, u).max(tiny).sqrt();
                    return match self.contrast_type {
                        ContrastType::F => t * t,
                        _ => t,
                    };
                }
                match self.contrast_type {
                    ContrastType::F => {
                        let e: Vec<f64> =
                            (0..dim).map(|i| self.effect.get(i, u) - baseline).collect();
                        let cov = DenseMatrix::from_fn(dim, dim, |i, j| {
                            self.variance.get(i * dim + j, u)
                        });
                        mahalanobis(&e, &cov) / dim as f64
                    }
                    _ => (0..dim)
                        .map(|i| {
                            (self.effect.get(i, u) - baseline)
                                / self.variance.get(i * dim + i, u).max(tiny).sqrt()
                        })
                        .fold(f64::INFINITY, f64::min),
                }
            })
            .collect()
    }

    pub fn p_value(&self) -> Vec<f64> {
        self.p_value_with_baseline(0.0)
    }

    /// Upper-tail probability of each unit's statistic.
    pub fn p_value_with_baseline(&self, baseline: f64) -> Vec<f64> {
        let dof = self.dof.min(self.config.dofmax);
        let dim = self.dim() as f64;
        let stat = self.stat_with_baseline(baseline);
        match self.contrast_type {
            ContrastType::F => stat.iter().map(|&s| f_sf(s, dim, dof)).collect(),
            _ => stat.iter().map(|&s| t_sf(s, dof)).collect(),
        }
    }

    pub fn z_score(&self) -> Vec<f64> {
        self.z_score_with_baseline(0.0)
    }

    /// Standard-normal equivalent of each unit's p-value.
    pub fn z_score_with_baseline(&self, baseline: f64) -> Vec<f64> {
        self.p_value_with_baseline(baseline)
            .into_iter()
            .map(z_score)
            .collect()
    }

    /// Sum contrasts from independent sessions.
    pub fn sum<'a, I>(contrasts: I) -> Result<Option<Contrast>, GlmError>
    where
        I: IntoIterator<Item = &'a Contrast>,
    {
        let mut acc: Option<Contrast> = None;
        for con in contrasts {
            acc = Some(match acc {
                None => con.clone(),
                Some(a) => (&a + con)?,
            });
        }
        Ok(acc)
    }

    fn scaled(&self, s: f64) -> Contrast {
        Contrast {
            effect: self.effect.scale(s),
            variance: self.variance.scale(s * s),
            dof: self.dof,
            contrast_type: self.contrast_type,
            config: self.config,
        }
    }
}

impl<'a> Add<&'a Contrast> for &'a Contrast {
    type Output = Result<Contrast, GlmError>;

    fn add(self, other: &'a Contrast) -> Self::Output {
        if self.contrast_type != other.contrast_type {
            return Err(GlmError::IncompatibleContrasts(format!(
                "{} contrast plus {} contrast",
                self.contrast_type, other.contrast_type
            )));
        }
        if self.dim() != other.dim() {
            return Err(GlmError::IncompatibleContrasts(format!(
                "dimension {} plus dimension {}",
                self.dim(),
                other.dim()
            )));
        }
        if self.n_units() != other.n_units() {
            return Err(GlmError::IncompatibleContrasts(format!(
                "{} units plus {} units",
                self.n_units(),
                other.n_units()
            )));
        }
        Ok(Contrast {
            effect: self.effect.add(&other.effect),
            variance: self.variance.add(&other.variance),
            dof: self.dof + other.dof,
            contrast_type: self.contrast_type,
            config: self.config,
        })
    }
}

impl Add for Contrast {
    type Output = Result<Contrast, GlmError>;

    fn add(self, other: Contrast) -> Self::Output {
        &self + &other
    }
}

impl Mul<f64> for &Contrast {
    type Output = Contrast;

    fn mul(self, s: f64) -> Contrast {
        self.scaled(s)
    }
}

impl Mul<f64> for Contrast {
    type Output = Contrast;

    fn mul(self, s: f64) -> Contrast {
        self.scaled(s)
    }
}

impl Mul<Contrast> for f64 {
    type Output = Contrast;

    fn mul(self, con: Contrast) -> Contrast {
        con.scaled(self)
    }
}

impl Mul<&Contrast> for f64 {
    type Output = Contrast;

    fn mul(self, con: &Contrast) -> Contrast {
        con.scaled(self)
    }
}

impl Div<f64> for Contrast {
    type Output = Contrast;

    fn div(self, s: f64) -> Contrast {
        self.scaled(1.0 / s)
    }
}

impl Div<f64> for &Contrast {
    type Output = Contrast;

    fn div(self, s: f64) -> Contrast {
        self.scaled(1.0 / s)
    }
}
