//! Per-block factorization of prior covariance blocks.
//!
//! Positive definiteness is judged pivot by pivot: the general path accepts a
//! block only if every squared Cholesky pivot satisfies
//! `L_ii^2 > pd_relative_epsilon * A_ii`, and the diagonal path only if every
//! entry is positive. For a diagonal matrix `L_ii^2 = A_ii`, so both paths
//! accept the same diagonal blocks regardless of their dynamic range.

use crate::composer::BlockCovariance;
use crate::error::NoiseError;
use crate::linalg::faer_ndarray::{
    FaerCholesky, FaerCholeskyFactor, FaerEigh, max_asymmetry,
};
use crate::linalg::utils::{KahanSum, max_abs, sum_ln};
use crate::noise::PriorCovariance;
use crate::types::SolverOptions;
use faer::Side;
use ndarray::{Array1, Array2, ArrayBase, ArrayView1, Data, Ix1, Ix2, s};

#[derive(Debug)]
pub enum BlockFactor {
    /// Closed-form path: the block's diagonal.
    Diagonal(Array1<f64>),
    /// General path: `A = L L^T`.
    Cholesky(FaerCholeskyFactor),
}

impl BlockFactor {
    /// Factor a prior block, routing diagonal blocks through the shortcut
    /// when `options.diagonal_shortcut` is set.
    pub fn factorize(
        name: &str,
        prior: &PriorCovariance,
        options: &SolverOptions,
    ) -> Result<Self, NoiseError> {
        match prior {
            PriorCovariance::Diagonal(d) if options.diagonal_shortcut => {
                Self::factorize_diagonal(name, d, options)
            }
            _ => Self::factorize_dense(name, &prior.to_dense(), options),
        }
    }

    pub fn factorize_diagonal(
        name: &str,
        diagonal: &Array1<f64>,
        options: &SolverOptions,
    ) -> Result<Self, NoiseError> {
        if diagonal.iter().any(|v| !v.is_finite()) {
            return Err(NoiseError::NonFinite {
                block: name.to_string(),
            });
        }
        let min_pivot = diagonal.iter().copied().fold(f64::INFINITY, f64::min);
        if !diagonal.is_empty() && min_pivot <= 0.0 {
            return Err(not_positive_definite(name, min_pivot, 0.0));
        }
        Ok(BlockFactor::Diagonal(diagonal.clone()))
    }

    pub fn factorize_dense<S: Data<Elem = f64>>(
        name: &str,
        matrix: &ArrayBase<S, Ix2>,
        options: &SolverOptions,
    ) -> Result<Self, NoiseError> {
        let (rows, cols) = matrix.dim();
        if rows != cols {
            return Err(NoiseError::ShapeMismatch {
                component: name.to_string(),
                what: "covariance block",
                expected: (rows, rows),
                actual: (rows, cols),
            });
        }
        if rows == 0 {
            return Ok(BlockFactor::Diagonal(Array1::zeros(0)));
        }
        if matrix.iter().any(|v| !v.is_finite()) {
            return Err(NoiseError::NonFinite {
                block: name.to_string(),
            });
        }
        let scale = matrix.iter().copied().map(f64::abs).fold(0.0, f64::max);
        let asymmetry = max_asymmetry(matrix);
        if asymmetry > options.symmetry_tolerance * scale {
            return Err(NoiseError::NotSymmetric {
                block: name.to_string(),
                asymmetry,
            });
        }

        let factor = match matrix.cholesky(Side::Lower) {
            Ok(factor) => factor,
            Err(_) => {
                // faer reports no pivot on failure; the smallest eigenvalue
                // plays its role in the diagnostic.
                let threshold = options.pd_relative_epsilon * max_abs(&matrix.diag());
                let min_pivot = matrix
                    .eigh(Side::Lower)
                    .map(|(values, _)| values.iter().copied().fold(f64::INFINITY, f64::min))
                    .unwrap_or(f64::NAN);
                return Err(not_positive_definite(name, min_pivot, threshold));
            }
        };
        let failed = factor
            .diag()
            .iter()
            .zip(matrix.diag().iter())
            .map(|(&l, &a)| (l * l, options.pd_relative_epsilon * a))
            .find(|&(pivot, threshold)| pivot <= threshold);
        if let Some((pivot, threshold)) = failed {
            return Err(not_positive_definite(name, pivot, threshold));
        }
        Ok(BlockFactor::Cholesky(factor))
    }

    pub fn dim(&self) -> usize {
        match self {
            BlockFactor::Diagonal(d) => d.len(),
            BlockFactor::Cholesky(f) => f.dim(),
        }
    }

    pub fn is_diagonal(&self) -> bool {
        matches!(self, BlockFactor::Diagonal(_))
    }

    /// `A^{-1} v`.
    pub fn solve<S: Data<Elem = f64>>(&self, v: &ArrayBase<S, Ix1>) -> Array1<f64> {
        match self {
            BlockFactor::Diagonal(d) => {
                let mut out = v.to_owned();
                for (o, &di) in out.iter_mut().zip(d.iter()) {
                    *o /= di;
                }
                out
            }
            BlockFactor::Cholesky(f) => f.solve_vec(v),
        }
    }

    /// `A^{-1} M`.
    pub fn solve_mat<S: Data<Elem = f64>>(&self, m: &ArrayBase<S, Ix2>) -> Array2<f64> {
        match self {
            BlockFactor::Diagonal(d) => {
                let mut out = m.to_owned();
                for (mut row, &di) in out.rows_mut().into_iter().zip(d.iter()) {
                    row.mapv_inplace(|x| x / di);
                }
                out
            }
            BlockFactor::Cholesky(f) => f.solve_mat(m),
        }
    }

    /// `log |A|`.
    pub fn log_determinant(&self) -> f64 {
        match self {
            BlockFactor::Diagonal(d) => sum_ln(d),
            BlockFactor::Cholesky(f) => 2.0 * sum_ln(&f.diag()),
        }
    }

    /// `v^T A^{-1} v`.
    pub fn quadratic_form<S: Data<Elem = f64>>(&self, v: &ArrayBase<S, Ix1>) -> f64 {
        let x = self.solve(v);
        let mut acc = KahanSum::default();
        for (a, b) in v.iter().zip(x.iter()) {
            acc.add(a * b);
        }
        acc.sum()
    }

    /// Explicit `A^{-1}`, symmetrized.
    pub fn inverse(&self) -> Array2<f64> {
        match self {
            BlockFactor::Diagonal(d) => Array2::from_diag(&d.mapv(|x| 1.0 / x)),
            BlockFactor::Cholesky(f) => {
                let inv = f.solve_mat(&Array2::<f64>::eye(f.dim()));
                (&inv + &inv.t()) * 0.5
            }
        }
    }

    /// `L z` with `A = L L^T`; maps standard normals to draws from `N(0, A)`.
    pub fn lower_times(&self, z: ArrayView1<'_, f64>) -> Array1<f64> {
        match self {
            BlockFactor::Diagonal(d) => {
                Array1::from_shape_fn(d.len(), |i| d[i].sqrt() * z[i])
            }
            BlockFactor::Cholesky(f) => f.lower_triangular().dot(&z),
        }
    }
}

fn not_positive_definite(name: &str, min_pivot: f64, threshold: f64) -> NoiseError {
    log::warn!(
        "[noise solver] block '{}' rejected: smallest pivot {:.6e}, threshold {:.6e}",
        name,
        min_pivot,
        threshold
    );
    NoiseError::NotPositiveDefinite {
        block: name.to_string(),
        min_pivot,
        threshold,
    }
}

#[derive(Debug)]
pub struct FactoredBlock {
    pub name: String,
    pub offset: usize,
    pub factor: BlockFactor,
}

/// Factorization of a block-diagonal prior `Phi`. Every operation works
/// block by block; nothing of size `rank x rank` is formed except by
/// [`Self::inverse`].
#[derive(Debug, Default)]
pub struct CovarianceFactorization {
    blocks: Vec<FactoredBlock>,
    dim: usize,
}

impl CovarianceFactorization {
    pub fn factorize(
        covariance: &BlockCovariance,
        options: &SolverOptions,
    ) -> Result<Self, NoiseError> {
        let mut blocks = Vec::with_capacity(covariance.len());
        for block in covariance.blocks() {
            let factor = BlockFactor::factorize(&block.name, &block.prior, options)?;
            blocks.push(FactoredBlock {
                name: block.name.clone(),
                offset: block.offset,
                factor,
            });
        }
        Ok(Self {
            blocks,
            dim: covariance.dim(),
        })
    }

    pub fn blocks(&self) -> &[FactoredBlock] {
        &self.blocks
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    fn check_len(&self, actual: usize) -> Result<(), NoiseError> {
        if actual != self.dim {
            return Err(NoiseError::LengthMismatch {
                what: "prior-space vector",
                expected: self.dim,
                actual,
            });
        }
        Ok(())
    }

    pub fn solve<S: Data<Elem = f64>>(
        &self,
        v: &ArrayBase<S, Ix1>,
    ) -> Result<Array1<f64>, NoiseError> {
        self.check_len(v.len())?;
        let mut out = Array1::<f64>::zeros(self.dim);
        for b in &self.blocks {
            let r = b.offset..b.offset + b.factor.dim();
            let x = b.factor.solve(&v.slice(s![r.clone()]));
            out.slice_mut(s![r]).assign(&x);
        }
        Ok(out)
    }

    pub fn quadratic_form<S: Data<Elem = f64>>(
        &self,
        v: &ArrayBase<S, Ix1>,
    ) -> Result<f64, NoiseError> {
        self.check_len(v.len())?;
        let mut acc = KahanSum::default();
        for b in &self.blocks {
            let r = b.offset..b.offset + b.factor.dim();
            acc.add(b.factor.quadratic_form(&v.slice(s![r])));
        }
        Ok(acc.sum())
    }

    pub fn log_determinant(&self) -> f64 {
        let mut acc = KahanSum::default();
        for b in &self.blocks {
            acc.add(b.factor.log_determinant());
        }
        acc.sum()
    }

    /// Block-diagonal `Phi^{-1}`.
    pub fn inverse(&self) -> Array2<f64> {
        let mut out = Array2::<f64>::zeros((self.dim, self.dim));
        for b in &self.blocks {
            let r = b.offset..b.offset + b.factor.dim();
            out.slice_mut(s![r.clone(), r]).assign(&b.factor.inverse());
        }
        out
    }

    /// `L z` block by block.
    pub fn lower_times<S: Data<Elem = f64>>(
        &self,
        z: &ArrayBase<S, Ix1>,
    ) -> Result<Array1<f64>, NoiseError> {
        self.check_len(z.len())?;
        let mut out = Array1::<f64>::zeros(self.dim);
        for b in &self.blocks {
            let r = b.offset..b.offset + b.factor.dim();
            let x = b.factor.lower_times(z.slice(s![r.clone()]));
            out.slice_mut(s![r]).assign(&x);
        }
        Ok(out)
    }
}
