//! Power-law Gaussian processes on a Fourier basis (red, DM, chromatic and
//! solar-wind noise).

use super::chromatic::ChromaticScaling;
use super::spectrum::{FourierFrequencies, LogModes, fourier_design_matrix, powerlaw_weights, rednoise_frequencies};
use super::{CorrelatedNoise, NoiseComponent, PriorCovariance, scale_rows};
use crate::error::NoiseError;
use crate::measurement::MeasurementSet;
use crate::params::{NoiseParameterState, ParameterSpec};
use crate::types::{NoiseKind, SECONDS_PER_DAY};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Time baseline `T` that sets the fundamental frequency `1/T`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SpanNormalization {
    /// `max(t) - min(t)` of the measurement set.
    FromMeasurements,
    /// A fixed baseline in days, e.g. shared across an array of pulsars.
    FixedDays(f64),
}

#[derive(Debug, Clone)]
struct LogModeParameters {
    count: String,
    factor: String,
}

#[derive(Debug, Clone)]
pub struct FourierNoise {
    name: String,
    amplitude: String,
    gamma: String,
    harmonics: String,
    log_modes: Option<LogModeParameters>,
    default_amplitude: f64,
    default_gamma: f64,
    default_harmonics: usize,
    scaling: ChromaticScaling,
    span: SpanNormalization,
}

impl FourierNoise {
    /// Generic constructor: parameters are `{prefix}AMP` (log10 amplitude),
    /// `{prefix}GAM` (spectral index) and `{prefix}C` (number of harmonics).
    pub fn new(name: impl Into<String>, prefix: &str, scaling: ChromaticScaling) -> Self {
        Self {
            name: name.into(),
            amplitude: format!("{prefix}AMP"),
            gamma: format!("{prefix}GAM"),
            harmonics: format!("{prefix}C"),
            log_modes: None,
            default_amplitude: -14.0,
            default_gamma: 4.0,
            default_harmonics: 30,
            scaling,
            span: SpanNormalization::FromMeasurements,
        }
    }

    /// Achromatic red noise (`TNREDAMP`, `TNREDGAM`, `TNREDC`, `TNREDFLOG`,
    /// `TNREDFLOG_FACTOR`).
    pub fn red_noise() -> Self {
        let mut noise = Self::new("PLRedNoise", "TNRED", ChromaticScaling::Achromatic);
        noise.log_modes = Some(LogModeParameters {
            count: "TNREDFLOG".to_string(),
            factor: "TNREDFLOG_FACTOR".to_string(),
        });
        noise
    }

    /// Dispersion-measure variations (`TNDMAMP`, `TNDMGAM`, `TNDMC`).
    pub fn dm_noise() -> Self {
        Self::new("PLDMNoise", "TNDM", ChromaticScaling::Dispersive)
    }

    /// Chromatic noise with index `TNCHROMIDX`.
    pub fn chromatic_noise() -> Self {
        Self::new(
            "PLChromNoise",
            "TNCHROM",
            ChromaticScaling::chromatic("TNCHROMIDX"),
        )
    }

    /// Solar-wind density fluctuations (`TNSWAMP`, `TNSWGAM`, `TNSWC`).
    pub fn solar_wind_noise() -> Self {
        let mut noise = Self::new("PLSWNoise", "TNSW", ChromaticScaling::SolarWind);
        noise.default_amplitude = -6.0;
        noise.default_gamma = 2.0;
        noise
    }

    pub fn with_span(mut self, span: SpanNormalization) -> Self {
        self.span = span;
        self
    }

    pub fn with_default_harmonics(mut self, harmonics: usize) -> Self {
        self.default_harmonics = harmonics;
        self
    }

    pub fn scaling(&self) -> &ChromaticScaling {
        &self.scaling
    }

    fn resolved_span(&self, measurements: &MeasurementSet) -> Result<f64, NoiseError> {
        let span = match self.span {
            SpanNormalization::FromMeasurements => measurements.span_seconds(),
            SpanNormalization::FixedDays(days) => days * SECONDS_PER_DAY,
        };
        if !(span.is_finite() && span > 0.0) {
            return Err(NoiseError::InvalidParameter {
                component: self.name.clone(),
                parameter: "span".to_string(),
                reason: format!("time span {span} s must be positive"),
            });
        }
        Ok(span)
    }

    fn frequencies(
        &self,
        measurements: &MeasurementSet,
        params: &NoiseParameterState,
    ) -> Result<FourierFrequencies, NoiseError> {
        let span = self.resolved_span(measurements)?;
        let nmodes = params.require_count(&self.name, &self.harmonics)?;
        let log_modes = match &self.log_modes {
            Some(p) => {
                let count = params.require_count(&self.name, &p.count)?;
                if count == 0 {
                    None
                } else {
                    let factor = params.require(&self.name, &p.factor)?;
                    if factor <= 1.0 {
                        return Err(NoiseError::InvalidParameter {
                            component: self.name.clone(),
                            parameter: p.factor.clone(),
                            reason: format!("log-mode factor {factor} must exceed 1"),
                        });
                    }
                    Some(LogModes { count, factor })
                }
            }
            None => None,
        };
        Ok(rednoise_frequencies(span, nmodes, log_modes))
    }

    fn raw_basis(
        &self,
        measurements: &MeasurementSet,
        params: &NoiseParameterState,
    ) -> Result<Array2<f64>, NoiseError> {
        let freqs = self.frequencies(measurements, params)?;
        Ok(fourier_design_matrix(
            &measurements.times_seconds(),
            &freqs.frequencies,
        ))
    }
}

impl NoiseComponent for FourierNoise {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> NoiseKind {
        NoiseKind::CorrelatedDiagonal
    }

    fn parameter_specs(&self) -> Vec<ParameterSpec> {
        let mut specs = vec![
            ParameterSpec::new(self.amplitude.clone(), self.default_amplitude),
            ParameterSpec::new(self.gamma.clone(), self.default_gamma),
            ParameterSpec::frozen(self.harmonics.clone(), self.default_harmonics as f64),
        ];
        if let Some(p) = &self.log_modes {
            specs.push(ParameterSpec::frozen(p.count.clone(), 0.0));
            specs.push(ParameterSpec::frozen(p.factor.clone(), 2.0));
        }
        specs.extend(self.scaling.parameter_specs());
        specs
    }

    fn as_correlated(&self) -> Option<&dyn CorrelatedNoise> {
        Some(self)
    }
}

impl CorrelatedNoise for FourierNoise {
    fn basis(
        &self,
        measurements: &MeasurementSet,
        params: &NoiseParameterState,
    ) -> Result<Array2<f64>, NoiseError> {
        let factors = self.scaling.timing_factors(&self.name, measurements, params)?;
        Ok(scale_rows(self.raw_basis(measurements, params)?, &factors))
    }

    fn has_dm_channel(&self) -> bool {
        self.scaling.has_dm_channel()
    }

    fn dm_basis(
        &self,
        measurements: &MeasurementSet,
        params: &NoiseParameterState,
    ) -> Result<Array2<f64>, NoiseError> {
        match self.scaling.dm_factors(&self.name, measurements)? {
            Some(factors) => Ok(scale_rows(self.raw_basis(measurements, params)?, &factors)),
            None => Err(NoiseError::MissingCapability {
                component: self.name.clone(),
                capability: crate::types::DesignMode::Dm,
            }),
        }
    }

    fn prior_covariance(
        &self,
        measurements: &MeasurementSet,
        params: &NoiseParameterState,
    ) -> Result<PriorCovariance, NoiseError> {
        let freqs = self.frequencies(measurements, params)?;
        let amplitude = 10f64.powf(params.require(&self.name, &self.amplitude)?);
        let gamma = params.require(&self.name, &self.gamma)?;
        Ok(PriorCovariance::Diagonal(powerlaw_weights(
            &freqs, amplitude, gamma,
        )))
    }

    fn span_seconds(&self, measurements: &MeasurementSet) -> Result<Option<f64>, NoiseError> {
        self.resolved_span(measurements).map(Some)
    }
}
