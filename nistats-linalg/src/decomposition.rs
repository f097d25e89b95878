#![allow(clippy::needless_range_loop)]
//! Matrix decompositions and solvers.
//!
//! Cholesky for the small contrast covariance blocks, a symmetric
//! eigendecomposition (via faer) as its fallback on singular blocks, and a
//! thin-SVD pseudo-inverse with numerical rank for possibly rank-deficient
//! design matrices.

use crate::dense::DenseMatrix;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LinalgError {
    #[error("Matrix is not positive definite")]
    NotPositiveDefinite,

    #[error("Singular matrix encountered")]
    SingularMatrix,

    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
}

/// Result of a Cholesky decomposition.
pub struct CholeskyDecomp {
    /// Lower triangular factor L such that A = L * L'.
    pub l: DenseMatrix,
}

impl CholeskyDecomp {
    /// Compute the Cholesky decomposition of a symmetric positive definite matrix.
    pub fn new(a: &DenseMatrix) -> Result<Self, LinalgError> {
        let n = a.nrows();
        if n != a.ncols() {
            return Err(LinalgError::DimensionMismatch {
                expected: n,
                got: a.ncols(),
            });
        }
        let mut l = DenseMatrix::zeros(n, n);

        for j in 0..n {
            let mut sum = 0.0;
            for k in 0..j {
                sum += l.get(j, k) * l.get(j, k);
            }
            let diag = a.get(j, j) - sum;
            if diag <= 0.0 || !diag.is_finite() {
                return Err(LinalgError::NotPositiveDefinite);
            }
            l.set(j, j, diag.sqrt());

            for i in (j + 1)..n {
                let mut sum = 0.0;
                for k in 0..j {
                    sum += l.get(i, k) * l.get(j, k);
                }
                l.set(i, j, (a.get(i, j) - sum) / l.get(j, j));
            }
        }

        Ok(CholeskyDecomp { l })
    }

    /// Solve L * L' * x = b.
    pub fn solve(&self, b: &[f64]) -> Vec<f64> {
        let n = self.l.nrows();
        assert_eq!(b.len(), n);

        // Forward substitution: L * y = b
        let mut y = vec![0.0; n];
        for i in 0..n {
            let mut sum = 0.0;
            for j in 0..i {
                sum += self.l.get(i, j) * y[j];
            }
            y[i] = (b[i] - sum) / self.l.get(i, i);
        }

        // Backward substitution: L' * x = y
        let mut x = vec![0.0; n];
        for i in (0..n).rev() {
            let mut sum = 0.0;
            for j in (i + 1)..n {
                sum += self.l.get(j, i) * x[j];
            }
            x[i] = (y[i] - sum) / self.l.get(i, i);
        }

        x
    }

    /// Compute the inverse of the original matrix A^{-1} = (L L')^{-1}.
    pub fn inverse(&self) -> DenseMatrix {
        let n = self.l.nrows();
        let mut inv = DenseMatrix::zeros(n, n);
        for j in 0..n {
            let mut e = vec![0.0; n];
            e[j] = 1.0;
            let col = self.solve(&e);
            inv.set_col(j, &col);
        }
        inv
    }
}

/// Eigendecomposition A = U diag(s) U' of a symmetric matrix.
pub struct SymmetricEigen {
    /// Eigenvalues, in faer's (non-decreasing) order.
    pub values: Vec<f64>,
    /// Eigenvectors stored as columns.
    pub vectors: DenseMatrix,
}

impl SymmetricEigen {
    pub fn new(a: &DenseMatrix) -> Result<Self, LinalgError> {
        let n = a.nrows();
        if n != a.ncols() {
            return Err(LinalgError::DimensionMismatch {
                expected: n,
                got: a.ncols(),
            });
        }
        let evd = a.as_faer().selfadjoint_eigendecomposition(faer::Side::Lower);
        let s = evd.s();
        let u = evd.u();
        let values: Vec<f64> = (0..n).map(|i| s.column_vector().read(i)).collect();
        let vectors = DenseMatrix::from_fn(n, n, |i, j| u.read(i, j));
        Ok(Self { values, vectors })
    }

    /// Eigenvalue cutoff below which a direction is treated as null.
    ///
    /// Eigenvalues of a Gram matrix carry roughly `max * eps` absolute
    /// error, so the cutoff sits a safety factor above that.
    fn cutoff(&self, scale: usize) -> f64 {
        const SAFETY: f64 = 50.0;
        let max = self.values.iter().cloned().fold(0.0_f64, f64::max);
        max * scale.max(1) as f64 * f64::EPSILON * SAFETY
    }

    /// Moore-Penrose inverse sum_{s_i > tol} u_i u_i' / s_i.
    fn pinv_with_cutoff(&self, tol: f64) -> DenseMatrix {
        let n = self.values.len();
        let mut out = DenseMatrix::zeros(n, n);
        for k in 0..n {
            let s = self.values[k];
            if s <= tol {
                continue;
            }
            let inv = 1.0 / s;
            for j in 0..n {
                let ujk = self.vectors.get(j, k) * inv;
                for i in 0..n {
                    out.set(i, j, out.get(i, j) + self.vectors.get(i, k) * ujk);
                }
            }
        }
        out
    }
}

/// Pseudo-inverse of a (tall) design matrix together with its normalized
/// coefficient covariance.
#[derive(Debug, Clone)]
pub struct PseudoInverse {
    /// pinv(X), shape (q x n).
    pub pinv: DenseMatrix,
    /// pinv(X) * pinv(X)' = (X'X)^+, shape (q x q).
    pub gram_pinv: DenseMatrix,
    /// Numerical rank of X.
    pub rank: usize,
}

/// Compute pinv(X) from the thin SVD X = U diag(s) V'.
///
/// Singular values at or below `s_max * max(n, q) * eps` count as zero.
pub fn pseudo_inverse(x: &DenseMatrix) -> Result<PseudoInverse, LinalgError> {
    let (n, q) = (x.nrows(), x.ncols());
    let svd = x.as_faer().thin_svd();
    let s = svd.s_diagonal();
    let u = svd.u();
    let v = svd.v();

    let sigma: Vec<f64> = (0..n.min(q)).map(|i| s.read(i)).collect();
    let s_max = sigma.iter().cloned().fold(0.0_f64, f64::max);
    let tol = s_max * n.max(q) as f64 * f64::EPSILON;
    let kept: Vec<usize> = (0..sigma.len()).filter(|&k| sigma[k] > tol).collect();
    if kept.is_empty() {
        return Err(LinalgError::SingularMatrix);
    }

    let pinv = DenseMatrix::from_fn(q, n, |i, j| {
        kept.iter()
            .map(|&k| v.read(i, k) * u.read(j, k) / sigma[k])
            .sum()
    });
    let gram_pinv = DenseMatrix::from_fn(q, q, |i, j| {
        kept.iter()
            .map(|&k| v.read(i, k) * v.read(j, k) / (sigma[k] * sigma[k]))
            .sum()
    });
    Ok(PseudoInverse {
        pinv,
        gram_pinv,
        rank: kept.len(),
    })
}

/// Inverse of a symmetric matrix: Cholesky when positive definite,
/// otherwise the eigen pseudo-inverse.
pub fn inverse_symmetric(a: &DenseMatrix) -> Result<DenseMatrix, LinalgError> {
    match CholeskyDecomp::new(a) {
        Ok(chol) => Ok(chol.inverse()),
        Err(LinalgError::NotPositiveDefinite) => {
            let eig = SymmetricEigen::new(a)?;
            let tol = eig.cutoff(a.nrows());
            Ok(eig.pinv_with_cutoff(tol))
        }
        Err(e) => Err(e),
    }
}
