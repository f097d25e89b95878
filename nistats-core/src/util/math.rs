//! Mathematical utility functions.

use std::f64::consts::SQRT_2;

use statrs::distribution::{ContinuousCDF, StudentsT};
use statrs::function::beta::beta_reg;
use statrs::function::erf::erfc_inv;

use nistats_linalg::decomposition::inverse_symmetric;
use nistats_linalg::DenseMatrix;

/// Smallest p-value passed to the normal quantile.
pub const P_VALUE_FLOOR: f64 = 1e-300;
/// Largest p-value passed to the normal quantile.
pub const P_VALUE_CEIL: f64 = 1.0 - 1e-16;

/// Safe division: returns 0 if denominator is near zero.
pub fn safe_div(num: f64, den: f64) -> f64 {
    if den.abs() > 1e-30 {
        num / den
    } else {
        0.0
    }
}

/// 1/x for strictly positive x, 0 otherwise.
pub fn positive_reciprocal(x: f64) -> f64 {
    if x > 0.0 {
        1.0 / x
    } else {
        0.0
    }
}

/// Upper tail of Student's t with `dof` degrees of freedom.
///
/// Uses the lower tail at -t, which keeps precision for large t.
pub fn t_sf(t: f64, dof: f64) -> f64 {
    if t.is_nan() {
        return f64::NAN;
    }
    match StudentsT::new(0.0, 1.0, dof) {
        Ok(dist) => dist.cdf(-t),
        Err(_) => f64::NAN,
    }
}

/// Upper tail of the F(d1, d2) distribution.
///
/// P(F > x) = I_{d2 / (d2 + d1 x)}(d2 / 2, d1 / 2).
pub fn f_sf(x: f64, d1: f64, d2: f64) -> f64 {
    if x.is_nan() || d1 <= 0.0 || d2 <= 0.0 {
        return f64::NAN;
    }
    if x <= 0.0 {
        return 1.0;
    }
    let w = d2 / (d2 + d1 * x);
    match beta_reg(d2 / 2.0, d1 / 2.0, w) {
        v if v.is_finite() => v.clamp(0.0, 1.0),
        _ => f64::NAN,
    }
}

/// Standard-normal equivalent of an upper-tail p-value: Phi^{-1}(1 - p).
///
/// p is clipped to `[P_VALUE_FLOOR, P_VALUE_CEIL]` to keep z finite.
pub fn z_score(p: f64) -> f64 {
    if p.is_nan() {
        return f64::NAN;
    }
    let p = p.clamp(P_VALUE_FLOOR, P_VALUE_CEIL);
    SQRT_2 * erfc_inv(2.0 * p)
}

/// Squared Mahalanobis norm e' V^{-1} e of one effect vector.
///
/// Returns NaN when V cannot be inverted.
pub fn mahalanobis(effect: &[f64], covariance: &DenseMatrix) -> f64 {
    let inv = match inverse_symmetric(covariance) {
        Ok(m) => m,
        Err(_) => return f64::NAN,
    };
    let v = inv.mat_vec(effect);
    DenseMatrix::dot(effect, &v)
}

/// Mean of a slice (0 for empty input).
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation of a slice.
pub fn std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    (values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_div() {
        assert_eq!(safe_div(1.0, 2.0), 0.5);
        assert_eq!(safe_div(1.0, 0.0), 0.0);
    }

    #[test]
    fn test_positive_reciprocal() {
        assert_eq!(positive_reciprocal(4.0), 0.25);
        assert_eq!(positive_reciprocal(0.0), 0.0);
        assert_eq!(positive_reciprocal(-2.0), 0.0);
    }

    #[test]
    fn test_z_score_reference_values() {
        assert!(z_score(0.5).abs() < 1e-10);
        assert!((z_score(0.025) - 1.959963984540054).abs() < 1e-8);
        assert!((z_score(0.975) + 1.959963984540054).abs() < 1e-8);
        // Clipped, but finite
        assert!(z_score(0.0).is_finite() && z_score(0.0) > 30.0);
        assert!(z_score(1.0).is_finite() && z_score(1.0) < -8.0);
    }

    #[test]
    fn test_t_sf() {
        assert!((t_sf(0.0, 10.0) - 0.5).abs() < 1e-12);
        // t(10) 97.5% quantile is 2.228138851986
        assert!((t_sf(2.228138851986, 10.0) - 0.025).abs() < 1e-8);
        assert!((t_sf(-2.228138851986, 10.0) - 0.975).abs() < 1e-8);
    }

    #[test]
    fn test_f_sf() {
        assert_eq!(f_sf(0.0, 3.0, 20.0), 1.0);
        // F(3, 20) 95% quantile is 3.098391212
        assert!((f_sf(3.098391212, 3.0, 20.0) - 0.05).abs() < 1e-7);
        // F(1, d) is the square of t(d)
        let t = 1.7;
        assert!((f_sf(t * t, 1.0, 15.0) - 2.0 * t_sf(t, 15.0)).abs() < 1e-10);
    }

    #[test]
    fn test_mahalanobis() {
        let cov = DenseMatrix::from_row_major(2, 2, &[2.0, 0.0, 0.0, 4.0]);
        // 1^2 / 2 + 2^2 / 4 = 1.5
        assert!((mahalanobis(&[1.0, 2.0], &cov) - 1.5).abs() < 1e-12);
    }

    #[test]
    fn test_mean_std() {
        assert_eq!(mean(&[1.0, 2.0, 3.0]), 2.0);
        assert!((std_dev(&[1.0, 3.0]) - 1.0).abs() < 1e-12);
        assert_eq!(mean(&[]), 0.0);
    }
}
