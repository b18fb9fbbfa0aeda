#![deny(dead_code)]
#![deny(unused_imports)]

//! Noise modelling and covariance core for pulsar timing.
//!
//! Noise components (white-noise scaling, ECORR, power-law Fourier processes
//! and time-domain kernels) are attached to a [`NoiseModel`]. An
//! [`EvaluationContext`] turns the model and a [`MeasurementSet`] into a
//! cached [`NoiseSystem`]: the global design matrix, block prior covariance,
//! white-noise diagonal and the Woodbury GLS factorization used for
//! whitening and likelihoods.

pub mod cache;
pub mod composer;
pub mod error;
pub mod generative;
pub mod linalg;
pub mod measurement;
pub mod model;
pub mod noise;
pub mod params;
pub mod registry;
pub mod residuals;
pub mod solver;
pub mod types;

pub use cache::{CacheKey, CacheStats, EvaluationContext, NoiseCache, NoiseSystem};
pub use composer::{
    BlockCovariance, ColumnIndex, CovarianceBlock, GlobalDesign, build_global_covariance,
    build_global_design, channel_variance, white_noise_diagonal,
};
pub use error::{ErrorCategory, NoiseError};
pub use generative::{
    sample_prior_coefficients, simulate_correlated_components, simulate_correlated_noise,
    simulate_noise, simulate_white_noise,
};
pub use measurement::{BackendSelector, Measurement, MeasurementSet, MeasurementSetId};
pub use model::NoiseModel;
pub use noise::{
    ChromaticScaling, CorrelatedNoise, EcorrNoise, FourierNoise, KernelNoise, MaternNu,
    NoiseComponent, PriorCovariance, ScaleDmError, ScaleToaError, SpanNormalization,
    TimeDomainKernel, UncorrelatedNoise,
};
pub use params::{NoiseParameterState, Parameter, ParameterFingerprint, ParameterSpec};
pub use registry::NoiseRegistry;
pub use residuals::{NarrowbandResiduals, WidebandResiduals};
pub use solver::{BlockFactor, CovarianceFactorization, GlsSystem};
pub use types::{Channel, DesignMode, NoiseKind, SolverOptions};
