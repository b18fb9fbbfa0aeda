//! Synthetic noise draws from a noise system, for fake-data generation.
//!
//! Correlated noise is `T b` with `b ~ N(0, Phi)` drawn block by block through
//! the prior factorization; white noise is `sqrt(N) * z`. The caller owns the
//! random source.

use crate::cache::NoiseSystem;
use crate::error::NoiseError;
use crate::solver::CovarianceFactorization;
use ndarray::{Array1, s};
use rand_distr::{Distribution, StandardNormal};

fn standard_normals<R: rand::Rng + ?Sized>(n: usize, rng: &mut R) -> Array1<f64> {
    Array1::from_shape_fn(n, |_| StandardNormal.sample(rng))
}

/// `b ~ N(0, Phi)`.
pub fn sample_prior_coefficients<R: rand::Rng + ?Sized>(
    prior: &CovarianceFactorization,
    rng: &mut R,
) -> Result<Array1<f64>, NoiseError> {
    let z = standard_normals(prior.dim(), rng);
    prior.lower_times(&z)
}

/// One correlated-noise realization per component, in registry order. The
/// components share a single coefficient draw, so the parts sum to
/// [`simulate_correlated_noise`] for the same random state.
pub fn simulate_correlated_components<R: rand::Rng + ?Sized>(
    system: &NoiseSystem,
    rng: &mut R,
) -> Result<Vec<(String, Array1<f64>)>, NoiseError> {
    let b = sample_prior_coefficients(system.prior(), rng)?;
    let design = system.design();
    Ok(system
        .columns()
        .iter()
        .map(|(name, range)| {
            let t = design.slice(s![.., range.clone()]);
            (name.to_string(), t.dot(&b.slice(s![range])))
        })
        .collect())
}

/// `T b` over every correlated component.
pub fn simulate_correlated_noise<R: rand::Rng + ?Sized>(
    system: &NoiseSystem,
    rng: &mut R,
) -> Result<Array1<f64>, NoiseError> {
    let b = sample_prior_coefficients(system.prior(), rng)?;
    Ok(system.design().dot(&b))
}

/// `sqrt(N) * z` using the scaled white-noise variance.
pub fn simulate_white_noise<R: rand::Rng + ?Sized>(system: &NoiseSystem, rng: &mut R) -> Array1<f64> {
    let white = system.white_noise();
    let z = standard_normals(white.len(), rng);
    Array1::from_shape_fn(white.len(), |i| white[i].sqrt() * z[i])
}

/// Correlated plus white noise.
pub fn simulate_noise<R: rand::Rng + ?Sized>(
    system: &NoiseSystem,
    rng: &mut R,
) -> Result<Array1<f64>, NoiseError> {
    let mut total = simulate_correlated_noise(system, rng)?;
    total += &simulate_white_noise(system, rng);
    Ok(total)
}
