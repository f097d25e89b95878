//! Percent-signal-change scaling of a data matrix.

use nistats_linalg::DenseMatrix;

use crate::util::math::safe_div;

/// Scale every column to percent change around its own mean.
///
/// Returns `(100 * (Y / mean - 1), mean)`. Columns with a zero mean scale
/// to zero.
pub fn data_scaling(y: &DenseMatrix) -> (DenseMatrix, Vec<f64>) {
    let mean = y.col_means();
    let scaled = DenseMatrix::from_fn(y.nrows(), y.ncols(), |i, j| {
        if mean[j] == 0.0 {
            0.0
        } else {
            100.0 * (safe_div(y.get(i, j), mean[j]) - 1.0)
        }
    });
    (scaled, mean)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::math::{mean, std_dev};

    #[test]
    fn test_scaling_centers_columns() {
        // Deterministic pseudo-noise around column offsets
        let offsets = [12.0, 47.5, 80.0, 3.0];
        let n = 400;
        let y = DenseMatrix::from_fn(n, offsets.len(), |i, j| {
            offsets[j] + ((i * 7 + j * 13) % 11) as f64 / 5.0 - 1.0
        });
        let (scaled, m) = data_scaling(&y);

        for (j, &off) in offsets.iter().enumerate() {
            assert!(mean(&scaled.col(j)).abs() < 1e-9, "column {} not centered", j);
            assert!((m[j] - off).abs() < 0.1, "mean {} vs offset {}", m[j], off);
        }
        assert!(std_dev(&scaled.to_col_major()) > 1.0);
    }

    #[test]
    fn test_scaling_is_percent_change() {
        let y = DenseMatrix::from_row_major(2, 1, &[90.0, 110.0]);
        let (scaled, m) = data_scaling(&y);
        assert_eq!(m, vec![100.0]);
        assert!((scaled.get(0, 0) + 10.0).abs() < 1e-12);
        assert!((scaled.get(1, 0) - 10.0).abs() < 1e-12);
    }

    #[test]
    fn test_zero_mean_column() {
        let y = DenseMatrix::from_row_major(2, 2, &[1.0, 5.0, -1.0, 5.0]);
        let (scaled, m) = data_scaling(&y);
        assert_eq!(m[0], 0.0);
        assert_eq!(scaled.col(0), vec![0.0, 0.0]);
        assert_eq!(scaled.col(1), vec![0.0, 0.0]);
    }
}
