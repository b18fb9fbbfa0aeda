//! Generalized least squares against `C = N + T Phi T^T` via Woodbury.
//!
//! With `Sigma = Phi^{-1} + T^T N^{-1} T` and `d = T^T N^{-1} r`:
//!
//! - `r^T C^{-1} r = r^T N^{-1} r - d^T Sigma^{-1} d`
//! - `log|C| = log|N| + log|Phi| + log|Sigma|`
//! - `C^{-1} r = N^{-1} (r - T Sigma^{-1} d)`
//!
//! Products against `T` are accumulated row by row in row order, so rows that
//! are identically zero (DM rows of a component without a DM channel) leave
//! every accumulated quantity bit-for-bit unchanged.

use super::block::{BlockFactor, CovarianceFactorization};
use crate::error::NoiseError;
use crate::linalg::utils::KahanSum;
use crate::types::SolverOptions;
use ndarray::{Array1, Array2, ArrayBase, Data, Ix1, Ix2};
use std::f64::consts::PI;

#[derive(Debug)]
pub struct GlsSystem {
    design: Array2<f64>,
    white: Array1<f64>,
    white_factor: BlockFactor,
    prior: CovarianceFactorization,
    /// `None` when there are no correlated columns.
    posterior: Option<BlockFactor>,
}

impl GlsSystem {
    pub fn new(
        design: Array2<f64>,
        white: Array1<f64>,
        prior: CovarianceFactorization,
        options: &SolverOptions,
    ) -> Result<Self, NoiseError> {
        if design.nrows() != white.len() {
            return Err(NoiseError::LengthMismatch {
                what: "white-noise diagonal",
                expected: design.nrows(),
                actual: white.len(),
            });
        }
        if design.ncols() != prior.dim() {
            return Err(NoiseError::ShapeMismatch {
                component: "global design".to_string(),
                what: "basis",
                expected: (design.nrows(), prior.dim()),
                actual: design.dim(),
            });
        }
        let white_factor = BlockFactor::factorize_diagonal("white noise", &white, options)?;
        let posterior = if design.ncols() == 0 {
            None
        } else {
            let sigma = posterior_precision(&design, &white, &prior);
            Some(BlockFactor::factorize_dense("posterior", &sigma, options)?)
        };
        Ok(Self {
            design,
            white,
            white_factor,
            prior,
            posterior,
        })
    }

    pub fn rows(&self) -> usize {
        self.design.nrows()
    }

    pub fn rank(&self) -> usize {
        self.design.ncols()
    }

    pub fn design(&self) -> &Array2<f64> {
        &self.design
    }

    pub fn white_noise(&self) -> &Array1<f64> {
        &self.white
    }

    pub fn prior(&self) -> &CovarianceFactorization {
        &self.prior
    }

    pub fn has_correlated(&self) -> bool {
        self.posterior.is_some()
    }

    fn check_rows(&self, actual: usize) -> Result<(), NoiseError> {
        if actual != self.rows() {
            return Err(NoiseError::LengthMismatch {
                what: "residual vector",
                expected: self.rows(),
                actual,
            });
        }
        Ok(())
    }

    /// `d = T^T N^{-1} r`.
    fn weighted_projection<S: Data<Elem = f64>>(&self, r: &ArrayBase<S, Ix1>) -> Array1<f64> {
        let mut d = Array1::<f64>::zeros(self.rank());
        for (i, row) in self.design.rows().into_iter().enumerate() {
            let w = r[i] / self.white[i];
            for (dj, &tij) in d.iter_mut().zip(row.iter()) {
                if tij != 0.0 {
                    *dj += tij * w;
                }
            }
        }
        d
    }

    /// `T b`, one row at a time.
    fn design_times(&self, b: &Array1<f64>) -> Array1<f64> {
        Array1::from_iter(self.design.rows().into_iter().map(|row| {
            let mut acc = 0.0;
            for (&tij, &bj) in row.iter().zip(b.iter()) {
                acc += tij * bj;
            }
            acc
        }))
    }

    /// Posterior mean of the basis coefficients, `Sigma^{-1} T^T N^{-1} r`.
    pub fn noise_coefficients<S: Data<Elem = f64>>(
        &self,
        r: &ArrayBase<S, Ix1>,
    ) -> Result<Array1<f64>, NoiseError> {
        self.check_rows(r.len())?;
        match &self.posterior {
            Some(posterior) => Ok(posterior.solve(&self.weighted_projection(r))),
            None => Ok(Array1::zeros(0)),
        }
    }

    /// `T b`, the maximum-a-posteriori correlated-noise signal in `r`.
    pub fn noise_realization<S: Data<Elem = f64>>(
        &self,
        r: &ArrayBase<S, Ix1>,
    ) -> Result<Array1<f64>, NoiseError> {
        let b = self.noise_coefficients(r)?;
        Ok(self.design_times(&b))
    }

    /// `r^T C^{-1} r`.
    pub fn quadratic_form<S: Data<Elem = f64>>(
        &self,
        r: &ArrayBase<S, Ix1>,
    ) -> Result<f64, NoiseError> {
        self.check_rows(r.len())?;
        let white_part = self.white_factor.quadratic_form(r);
        let Some(posterior) = &self.posterior else {
            return Ok(white_part);
        };
        let d = self.weighted_projection(r);
        let b = posterior.solve(&d);
        let mut acc = KahanSum::default();
        acc.add(white_part);
        for (dj, bj) in d.iter().zip(b.iter()) {
            acc.add(-dj * bj);
        }
        Ok(acc.sum())
    }

    /// `log |C|`.
    pub fn log_determinant(&self) -> f64 {
        let mut acc = KahanSum::default();
        acc.add(self.white_factor.log_determinant());
        if let Some(posterior) = &self.posterior {
            acc.add(self.prior.log_determinant());
            acc.add(posterior.log_determinant());
        }
        acc.sum()
    }

    /// Gaussian log-likelihood of `r` under `N(0, C)`.
    pub fn log_likelihood<S: Data<Elem = f64>>(
        &self,
        r: &ArrayBase<S, Ix1>,
    ) -> Result<f64, NoiseError> {
        let quad = self.quadratic_form(r)?;
        let n = self.rows() as f64;
        Ok(-0.5 * (quad + self.log_determinant() + n * (2.0 * PI).ln()))
    }

    /// `C^{-1} r`.
    pub fn solve<S: Data<Elem = f64>>(
        &self,
        r: &ArrayBase<S, Ix1>,
    ) -> Result<Array1<f64>, NoiseError> {
        self.check_rows(r.len())?;
        let mut x = r.to_owned();
        if self.posterior.is_some() {
            x -= &self.noise_realization(r)?;
        }
        Ok(self.white_factor.solve(&x))
    }

    /// `C^{-1} M`, column by column (fitter normal equations use
    /// `M^T C^{-1} M` and `M^T C^{-1} r`).
    pub fn solve_columns<S: Data<Elem = f64>>(
        &self,
        m: &ArrayBase<S, Ix2>,
    ) -> Result<Array2<f64>, NoiseError> {
        self.check_rows(m.nrows())?;
        let mut out = Array2::<f64>::zeros(m.dim());
        for (j, col) in m.columns().into_iter().enumerate() {
            out.column_mut(j).assign(&self.solve(&col)?);
        }
        Ok(out)
    }

    /// `(r - T b) / sqrt(N)`; plain `r / sqrt(N)` without correlated noise.
    pub fn whiten<S: Data<Elem = f64>>(
        &self,
        r: &ArrayBase<S, Ix1>,
    ) -> Result<Array1<f64>, NoiseError> {
        self.check_rows(r.len())?;
        let mut x = r.to_owned();
        if self.posterior.is_some() {
            x -= &self.noise_realization(r)?;
        }
        for (xi, &wi) in x.iter_mut().zip(self.white.iter()) {
            *xi /= wi.sqrt();
        }
        Ok(x)
    }
}

/// `Phi^{-1} + T^T N^{-1} T`, with the upper triangle accumulated row by row
/// and mirrored.
fn posterior_precision(
    design: &Array2<f64>,
    white: &Array1<f64>,
    prior: &CovarianceFactorization,
) -> Array2<f64> {
    let rank = design.ncols();
    let mut sigma = prior.inverse();
    for (row, &wi) in design.rows().into_iter().zip(white.iter()) {
        for j in 0..rank {
            let tij = row[j];
            if tij == 0.0 {
                continue;
            }
            let scaled = tij / wi;
            for k in j..rank {
                sigma[[j, k]] += scaled * row[k];
            }
        }
    }
    for j in 0..rank {
        for k in 0..j {
            sigma[[j, k]] = sigma[[k, j]];
        }
    }
    sigma
}
