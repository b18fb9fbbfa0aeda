use crate::linalg::faer_ndarray::FaerLinalgError;
use crate::types::{Channel, DesignMode};
use thiserror::Error;

/// Coarse classification of [`NoiseError`], used by callers to pick a policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Bad registry or component configuration; never retried.
    Configuration,
    /// Non-positive-definite or otherwise unusable covariance; the caller may
    /// reject the current parameter point and continue.
    Numerical,
    /// Basis or covariance dimensions inconsistent with the measurement set.
    Shape,
    /// Broken internal invariant. Always a bug.
    Internal,
}

/// Error type for every operation in the noise core.
#[derive(Error, Debug)]
pub enum NoiseError {
    #[error("Component '{component}' does not provide a {capability} basis.")]
    MissingCapability {
        component: String,
        capability: DesignMode,
    },

    #[error("A noise component named '{0}' is already registered.")]
    DuplicateComponent(String),

    #[error("No noise component named '{0}' is registered.")]
    UnknownComponent(String),

    #[error(
        "Components '{first}' and '{second}' both define the white-noise variance of the {channel} channel."
    )]
    ConflictingWhiteNoise {
        channel: Channel,
        first: String,
        second: String,
    },

    #[error("Parameter '{parameter}' is claimed by both '{first}' and '{second}'.")]
    ParameterOwnershipConflict {
        parameter: String,
        first: String,
        second: String,
    },

    #[error("Component '{component}' needs parameter '{parameter}', which is not set.")]
    MissingParameter { component: String, parameter: String },

    #[error("Unknown parameter '{0}'.")]
    UnknownParameter(String),

    #[error("Component '{component}' parameter '{parameter}' is invalid: {reason}")]
    InvalidParameter {
        component: String,
        parameter: String,
        reason: String,
    },

    #[error("Component '{component}' needs measurement field '{field}', which is missing at row {row}.")]
    MissingMeasurementField {
        component: String,
        field: &'static str,
        row: usize,
    },

    #[error("Invalid measurement at row {row}: {reason}")]
    InvalidMeasurement { row: usize, reason: String },

    #[error(
        "Component '{component}' produced a {what} of shape {actual:?}, expected {expected:?}."
    )]
    ShapeMismatch {
        component: String,
        what: &'static str,
        expected: (usize, usize),
        actual: (usize, usize),
    },

    #[error("Vector '{what}' has length {actual}, expected {expected}.")]
    LengthMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error(
        "Covariance block '{block}' is not positive definite (smallest pivot {min_pivot:.3e}, threshold {threshold:.3e})."
    )]
    NotPositiveDefinite {
        block: String,
        min_pivot: f64,
        threshold: f64,
    },

    #[error("Covariance block '{block}' is not symmetric (max |A_ij - A_ji| = {asymmetry:.3e}).")]
    NotSymmetric { block: String, asymmetry: f64 },

    #[error("Covariance block '{block}' contains non-finite values.")]
    NonFinite { block: String },

    #[error("Cache consistency violated: {0}")]
    CacheConsistency(String),

    #[error("Linear algebra failure: {0}")]
    Linalg(#[from] FaerLinalgError),
}

impl NoiseError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            NoiseError::MissingCapability { .. }
            | NoiseError::DuplicateComponent(_)
            | NoiseError::UnknownComponent(_)
            | NoiseError::ConflictingWhiteNoise { .. }
            | NoiseError::ParameterOwnershipConflict { .. }
            | NoiseError::MissingParameter { .. }
            | NoiseError::UnknownParameter(_)
            | NoiseError::InvalidParameter { .. }
            | NoiseError::MissingMeasurementField { .. }
            | NoiseError::InvalidMeasurement { .. } => ErrorCategory::Configuration,
            NoiseError::ShapeMismatch { .. } | NoiseError::LengthMismatch { .. } => {
                ErrorCategory::Shape
            }
            NoiseError::NotPositiveDefinite { .. }
            | NoiseError::NotSymmetric { .. }
            | NoiseError::NonFinite { .. }
            | NoiseError::Linalg(_) => ErrorCategory::Numerical,
            NoiseError::CacheConsistency(_) => ErrorCategory::Internal,
        }
    }

    /// True when a fitter may treat the failure as a rejected step.
    pub fn is_recoverable(&self) -> bool {
        self.category() == ErrorCategory::Numerical
    }
}
