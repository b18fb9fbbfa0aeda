//! Noise-process components.
//!
//! Every component implements [`NoiseComponent`] and exposes one of two
//! capability sets through `as_uncorrelated` / `as_correlated`:
//!
//! - [`UncorrelatedNoise`]: a per-measurement variance for one channel.
//! - [`CorrelatedNoise`]: a basis of shape `rows x rank` and a `rank x rank`
//!   prior block. The timing basis is always available; the DM basis only for
//!   components with a DM channel; the wideband basis stacks timing rows over
//!   DM rows (zeros where the component has no DM channel).
//!
//! Kernels and chromatic scalings are strategy values held by the concrete
//! components, so the Fourier and time-domain families share one contract.

pub mod chromatic;
pub mod ecorr;
pub mod fourier;
pub mod kernel;
pub mod spectrum;
pub mod white;

pub use chromatic::ChromaticScaling;
pub use ecorr::EcorrNoise;
pub use fourier::{FourierNoise, SpanNormalization};
pub use kernel::{KernelNoise, MaternNu, TimeDomainKernel};
pub use white::{ScaleDmError, ScaleToaError};

use crate::error::NoiseError;
use crate::measurement::MeasurementSet;
use crate::params::{NoiseParameterState, ParameterSpec};
use crate::types::{Channel, DesignMode, NoiseKind};
use ndarray::{Array1, Array2, s};
use std::fmt;

/// Prior covariance of one correlated component.
#[derive(Debug, Clone, PartialEq)]
pub enum PriorCovariance {
    Diagonal(Array1<f64>),
    Dense(Array2<f64>),
}

impl PriorCovariance {
    pub fn dim(&self) -> usize {
        match self {
            PriorCovariance::Diagonal(d) => d.len(),
            PriorCovariance::Dense(m) => m.nrows(),
        }
    }

    pub fn shape(&self) -> (usize, usize) {
        match self {
            PriorCovariance::Diagonal(d) => (d.len(), d.len()),
            PriorCovariance::Dense(m) => m.dim(),
        }
    }

    pub fn is_diagonal(&self) -> bool {
        matches!(self, PriorCovariance::Diagonal(_))
    }

    pub fn to_dense(&self) -> Array2<f64> {
        match self {
            PriorCovariance::Diagonal(d) => Array2::from_diag(d),
            PriorCovariance::Dense(m) => m.clone(),
        }
    }

    /// Diagonal entries (the basis weights for diagonal priors).
    pub fn diagonal(&self) -> Array1<f64> {
        match self {
            PriorCovariance::Diagonal(d) => d.clone(),
            PriorCovariance::Dense(m) => m.diag().to_owned(),
        }
    }
}

pub trait NoiseComponent: fmt::Debug + Send + Sync {
    /// Stable name, unique within a registry.
    fn name(&self) -> &str;

    fn kind(&self) -> NoiseKind;

    /// Every parameter this component reads, in a fixed order.
    fn parameter_specs(&self) -> Vec<ParameterSpec>;

    fn as_uncorrelated(&self) -> Option<&dyn UncorrelatedNoise> {
        None
    }

    fn as_correlated(&self) -> Option<&dyn CorrelatedNoise> {
        None
    }
}

pub trait UncorrelatedNoise: NoiseComponent {
    fn channel(&self) -> Channel;

    /// Full white-noise variance of `channel()` for every measurement.
    fn diagonal_variance(
        &self,
        measurements: &MeasurementSet,
        params: &NoiseParameterState,
    ) -> Result<Array1<f64>, NoiseError>;
}

pub trait CorrelatedNoise: NoiseComponent {
    /// Timing-channel basis, `n x rank`.
    fn basis(
        &self,
        measurements: &MeasurementSet,
        params: &NoiseParameterState,
    ) -> Result<Array2<f64>, NoiseError>;

    fn prior_covariance(
        &self,
        measurements: &MeasurementSet,
        params: &NoiseParameterState,
    ) -> Result<PriorCovariance, NoiseError>;

    fn has_dm_channel(&self) -> bool {
        false
    }

    /// DM-channel basis, `n x rank`, sharing columns with [`Self::basis`].
    fn dm_basis(
        &self,
        _measurements: &MeasurementSet,
        _params: &NoiseParameterState,
    ) -> Result<Array2<f64>, NoiseError> {
        Err(NoiseError::MissingCapability {
            component: self.name().to_string(),
            capability: DesignMode::Dm,
        })
    }

    /// Timing rows over DM rows, `2n x rank`.
    fn wideband_basis(
        &self,
        measurements: &MeasurementSet,
        params: &NoiseParameterState,
    ) -> Result<Array2<f64>, NoiseError> {
        let n = measurements.len();
        let timing = self.basis(measurements, params)?;
        check_shape(self.name(), "basis", (n, timing.ncols()), timing.dim())?;
        let rank = timing.ncols();
        let mut out = Array2::<f64>::zeros((2 * n, rank));
        out.slice_mut(s![..n, ..]).assign(&timing);
        if self.has_dm_channel() {
            let dm = self.dm_basis(measurements, params)?;
            check_shape(self.name(), "DM basis", (n, rank), dm.dim())?;
            out.slice_mut(s![n.., ..]).assign(&dm);
        }
        Ok(out)
    }

    fn supports(&self, mode: DesignMode) -> bool {
        match mode {
            DesignMode::Dm => self.has_dm_channel(),
            DesignMode::Timing | DesignMode::Wideband => true,
        }
    }

    /// Basis for `mode`, failing with a configuration error when the
    /// capability is absent.
    fn basis_for(
        &self,
        mode: DesignMode,
        measurements: &MeasurementSet,
        params: &NoiseParameterState,
    ) -> Result<Array2<f64>, NoiseError> {
        if !self.supports(mode) {
            return Err(NoiseError::MissingCapability {
                component: self.name().to_string(),
                capability: mode,
            });
        }
        match mode {
            DesignMode::Timing => self.basis(measurements, params),
            DesignMode::Dm => self.dm_basis(measurements, params),
            DesignMode::Wideband => self.wideband_basis(measurements, params),
        }
    }

    /// Time baseline used to normalize the spectrum, when the component has one.
    fn span_seconds(
        &self,
        _measurements: &MeasurementSet,
    ) -> Result<Option<f64>, NoiseError> {
        Ok(None)
    }
}

pub(crate) fn check_shape(
    component: &str,
    what: &'static str,
    expected: (usize, usize),
    actual: (usize, usize),
) -> Result<(), NoiseError> {
    if expected != actual {
        return Err(NoiseError::ShapeMismatch {
            component: component.to_string(),
            what,
            expected,
            actual,
        });
    }
    Ok(())
}

/// Multiply row `i` of `matrix` by `factors[i]`.
pub(crate) fn scale_rows(mut matrix: Array2<f64>, factors: &Array1<f64>) -> Array2<f64> {
    for (mut row, &f) in matrix.rows_mut().into_iter().zip(factors.iter()) {
        row.mapv_inplace(|v| v * f);
    }
    matrix
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measurement::Measurement;
    use ndarray::array;

    #[derive(Debug)]
    struct ConstantBasis;

    impl NoiseComponent for ConstantBasis {
        fn name(&self) -> &str {
            "ConstantBasis"
        }
        fn kind(&self) -> NoiseKind {
            NoiseKind::CorrelatedDiagonal
        }
        fn parameter_specs(&self) -> Vec<ParameterSpec> {
            Vec::new()
        }
        fn as_correlated(&self) -> Option<&dyn CorrelatedNoise> {
            Some(self)
        }
    }

    impl CorrelatedNoise for ConstantBasis {
        fn basis(
            &self,
            measurements: &MeasurementSet,
            _params: &NoiseParameterState,
        ) -> Result<Array2<f64>, NoiseError> {
            Ok(Array2::ones((measurements.len(), 1)))
        }
        fn prior_covariance(
            &self,
            _measurements: &MeasurementSet,
            _params: &NoiseParameterState,
        ) -> Result<PriorCovariance, NoiseError> {
            Ok(PriorCovariance::Diagonal(array![1.0]))
        }
    }

    fn three_points() -> MeasurementSet {
        MeasurementSet::new(vec![
            Measurement::new(55000.0, 1400.0, 1.0),
            Measurement::new(55001.0, 1400.0, 1.0),
            Measurement::new(55002.0, 1400.0, 1.0),
        ])
        .unwrap()
    }

    #[test]
    fn default_wideband_basis_pads_dm_rows_with_zeros() {
        let ms = three_points();
        let params = NoiseParameterState::new();
        let wb = ConstantBasis.wideband_basis(&ms, &params).unwrap();
        assert_eq!(wb.dim(), (6, 1));
        assert_eq!(wb.column(0).to_vec(), vec![1.0, 1.0, 1.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn dm_request_without_dm_channel_is_a_configuration_error() {
        let ms = three_points();
        let params = NoiseParameterState::new();
        assert!(!ConstantBasis.supports(DesignMode::Dm));
        let err = ConstantBasis
            .basis_for(DesignMode::Dm, &ms, &params)
            .unwrap_err();
        assert!(matches!(
            err,
            NoiseError::MissingCapability {
                capability: DesignMode::Dm,
                ..
            }
        ));
    }

    #[test]
    fn prior_covariance_dense_view_of_diagonal() {
        let p = PriorCovariance::Diagonal(array![1.0, 2.0]);
        assert_eq!(p.to_dense(), array![[1.0, 0.0], [0.0, 2.0]]);
        assert_eq!(p.shape(), (2, 2));
        assert!(p.is_diagonal());
    }
}
