use super::{CorrelatedNoise, NoiseComponent, PriorCovariance};
use crate::error::NoiseError;
use crate::measurement::{BackendSelector, MeasurementSet};
use crate::params::{NoiseParameterState, ParameterSpec};
use crate::types::{NoiseKind, SECONDS_PER_DAY};
use ndarray::{Array1, Array2};

/// Measurements closer than this to the first member of an epoch share it.
const EPOCH_WINDOW_SECONDS: f64 = 1.0;
/// Epochs with fewer members carry no information beyond white noise.
const MIN_EPOCH_SIZE: usize = 2;

/// Epoch-correlated white noise (jitter). Each `ECORRk` term (microseconds)
/// applies to the measurements of one backend selector; the basis is the
/// epoch quantization matrix and the prior is `ECORR^2` per epoch.
#[derive(Debug, Clone)]
pub struct EcorrNoise {
    name: String,
    terms: Vec<(String, BackendSelector)>,
}

impl Default for EcorrNoise {
    fn default() -> Self {
        Self::new()
    }
}

impl EcorrNoise {
    pub fn new() -> Self {
        Self {
            name: "EcorrNoise".to_string(),
            terms: Vec::new(),
        }
    }

    pub fn with_ecorr(mut self, parameter: impl Into<String>, selector: BackendSelector) -> Self {
        self.terms.push((parameter.into(), selector));
        self
    }

    /// Epochs per term, each a list of measurement rows in time order.
    fn epochs(&self, measurements: &MeasurementSet) -> Vec<Vec<Vec<usize>>> {
        let records = measurements.records();
        self.terms
            .iter()
            .map(|(_, selector)| {
                let mut rows = measurements.select(selector);
                rows.sort_by(|&a, &b| records[a].mjd.total_cmp(&records[b].mjd).then(a.cmp(&b)));
                let mut epochs: Vec<Vec<usize>> = Vec::new();
                let mut epoch_start = f64::NEG_INFINITY;
                for row in rows {
                    let t = records[row].mjd * SECONDS_PER_DAY;
                    match epochs.last_mut() {
                        Some(current) if t - epoch_start < EPOCH_WINDOW_SECONDS => current.push(row),
                        _ => {
                            epochs.push(vec![row]);
                            epoch_start = t;
                        }
                    }
                }
                epochs.retain(|e| e.len() >= MIN_EPOCH_SIZE);
                epochs
            })
            .collect()
    }
}

impl NoiseComponent for EcorrNoise {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> NoiseKind {
        NoiseKind::CorrelatedDiagonal
    }

    fn parameter_specs(&self) -> Vec<ParameterSpec> {
        self.terms
            .iter()
            .map(|(name, _)| ParameterSpec::new(name.clone(), 0.0))
            .collect()
    }

    fn as_correlated(&self) -> Option<&dyn CorrelatedNoise> {
        Some(self)
    }
}

impl CorrelatedNoise for EcorrNoise {
    fn basis(
        &self,
        measurements: &MeasurementSet,
        _params: &NoiseParameterState,
    ) -> Result<Array2<f64>, NoiseError> {
        let epochs = self.epochs(measurements);
        let rank: usize = epochs.iter().map(Vec::len).sum();
        let mut out = Array2::<f64>::zeros((measurements.len(), rank));
        let mut col = 0;
        for term in &epochs {
            for epoch in term {
                for &row in epoch {
                    out[[row, col]] = 1.0;
                }
                col += 1;
            }
        }
        Ok(out)
    }

    fn prior_covariance(
        &self,
        measurements: &MeasurementSet,
        params: &NoiseParameterState,
    ) -> Result<PriorCovariance, NoiseError> {
        let epochs = self.epochs(measurements);
        let mut weights = Vec::new();
        for ((param, _), term) in self.terms.iter().zip(epochs.iter()) {
            let ecorr = params.require(&self.name, param)? * 1e-6;
            weights.extend(std::iter::repeat_n(ecorr * ecorr, term.len()));
        }
        Ok(PriorCovariance::Diagonal(Array1::from_vec(weights)))
    }
}
