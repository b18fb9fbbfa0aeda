//! Covariance solves: per-block prior factorizations and the Woodbury GLS
//! system built on top of them.

pub mod block;
pub mod gls;

pub use block::{BlockFactor, CovarianceFactorization, FactoredBlock};
pub use gls::GlsSystem;
