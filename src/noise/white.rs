//! Uncorrelated white-noise scaling (EFAC/EQUAD and their DM counterparts).

use super::{NoiseComponent, UncorrelatedNoise};
use crate::error::NoiseError;
use crate::measurement::{BackendSelector, MeasurementSet};
use crate::params::{NoiseParameterState, ParameterSpec};
use crate::types::{Channel, NoiseKind};
use ndarray::Array1;

/// EFAC/EQUAD terms bound to backend selectors. For each measurement the
/// first matching EFAC and the first matching EQUAD apply; unmatched
/// measurements keep `EFAC = 1`, `EQUAD = 0`.
#[derive(Debug, Clone, Default)]
struct WhiteScaling {
    efacs: Vec<(String, BackendSelector)>,
    equads: Vec<(String, BackendSelector)>,
}

impl WhiteScaling {
    fn parameter_specs(&self) -> Vec<ParameterSpec> {
        let mut specs = Vec::with_capacity(self.efacs.len() + self.equads.len());
        for (name, _) in &self.efacs {
            specs.push(ParameterSpec::new(name.clone(), 1.0));
        }
        for (name, _) in &self.equads {
            specs.push(ParameterSpec::new(name.clone(), 0.0));
        }
        specs
    }

    /// `EFAC^2 * (sigma^2 + (EQUAD * equad_unit)^2)` per measurement.
    fn scaled_variance(
        &self,
        component: &str,
        measurements: &MeasurementSet,
        sigma: &Array1<f64>,
        equad_unit: f64,
        params: &NoiseParameterState,
    ) -> Result<Array1<f64>, NoiseError> {
        let n = measurements.len();
        let mut efac = Array1::<f64>::ones(n);
        let mut equad = Array1::<f64>::zeros(n);
        let mut efac_set = vec![false; n];
        let mut equad_set = vec![false; n];

        for (param, selector) in &self.efacs {
            let value = params.require(component, param)?;
            for row in measurements.select(selector) {
                if !efac_set[row] {
                    efac[row] = value;
                    efac_set[row] = true;
                }
            }
        }
        for (param, selector) in &self.equads {
            let value = params.require(component, param)? * equad_unit;
            for row in measurements.select(selector) {
                if !equad_set[row] {
                    equad[row] = value;
                    equad_set[row] = true;
                }
            }
        }

        let mut out = Array1::<f64>::zeros(n);
        for i in 0..n {
            out[i] = efac[i] * efac[i] * (sigma[i] * sigma[i] + equad[i] * equad[i]);
        }
        Ok(out)
    }
}

/// Arrival-time white noise: `sigma' = EFAC * sqrt(sigma^2 + EQUAD^2)`, EQUAD in us.
#[derive(Debug, Clone)]
pub struct ScaleToaError {
    name: String,
    scaling: WhiteScaling,
}

impl Default for ScaleToaError {
    fn default() -> Self {
        Self::new()
    }
}

impl ScaleToaError {
    pub fn new() -> Self {
        Self {
            name: "ScaleToaError".to_string(),
            scaling: WhiteScaling::default(),
        }
    }

    pub fn with_efac(mut self, parameter: impl Into<String>, selector: BackendSelector) -> Self {
        self.scaling.efacs.push((parameter.into(), selector));
        self
    }

    pub fn with_equad(mut self, parameter: impl Into<String>, selector: BackendSelector) -> Self {
        self.scaling.equads.push((parameter.into(), selector));
        self
    }
}

impl NoiseComponent for ScaleToaError {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> NoiseKind {
        NoiseKind::Uncorrelated
    }

    fn parameter_specs(&self) -> Vec<ParameterSpec> {
        self.scaling.parameter_specs()
    }

    fn as_uncorrelated(&self) -> Option<&dyn UncorrelatedNoise> {
        Some(self)
    }
}

impl UncorrelatedNoise for ScaleToaError {
    fn channel(&self) -> Channel {
        Channel::Timing
    }

    fn diagonal_variance(
        &self,
        measurements: &MeasurementSet,
        params: &NoiseParameterState,
    ) -> Result<Array1<f64>, NoiseError> {
        let sigma = measurements.uncertainties_seconds();
        self.scaling
            .scaled_variance(&self.name, measurements, &sigma, 1e-6, params)
    }
}

/// Wideband DM white noise: `sigma' = DMEFAC * sqrt(sigma^2 + DMEQUAD^2)`,
/// DMEQUAD in pc cm^-3.
#[derive(Debug, Clone)]
pub struct ScaleDmError {
    name: String,
    scaling: WhiteScaling,
}

impl Default for ScaleDmError {
    fn default() -> Self {
        Self::new()
    }
}

impl ScaleDmError {
    pub fn new() -> Self {
        Self {
            name: "ScaleDmError".to_string(),
            scaling: WhiteScaling::default(),
        }
    }

    pub fn with_dmefac(mut self, parameter: impl Into<String>, selector: BackendSelector) -> Self {
        self.scaling.efacs.push((parameter.into(), selector));
        self
    }

    pub fn with_dmequad(mut self, parameter: impl Into<String>, selector: BackendSelector) -> Self {
        self.scaling.equads.push((parameter.into(), selector));
        self
    }
}

impl NoiseComponent for ScaleDmError {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> NoiseKind {
        NoiseKind::Uncorrelated
    }

    fn parameter_specs(&self) -> Vec<ParameterSpec> {
        self.scaling.parameter_specs()
    }

    fn as_uncorrelated(&self) -> Option<&dyn UncorrelatedNoise> {
        Some(self)
    }
}

impl UncorrelatedNoise for ScaleDmError {
    fn channel(&self) -> Channel {
        Channel::Dm
    }

    fn diagonal_variance(
        &self,
        measurements: &MeasurementSet,
        params: &NoiseParameterState,
    ) -> Result<Array1<f64>, NoiseError> {
        let sigma = measurements.dm_uncertainties(&self.name)?;
        self.scaling
            .scaled_variance(&self.name, measurements, &sigma, 1.0, params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measurement::Measurement;
    use approx::assert_relative_eq;

    fn two_backends() -> MeasurementSet {
        MeasurementSet::new(vec![
            Measurement::new(55000.0, 1400.0, 1.0)
                .with_backend("A")
                .with_dm(10.0, 1e-3),
            Measurement::new(55001.0, 1400.0, 2.0)
                .with_backend("B")
                .with_dm(10.0, 2e-3),
            Measurement::new(55002.0, 1400.0, 3.0).with_dm(10.0, 3e-3),
        ])
        .unwrap()
    }

    #[test]
    fn efac_and_equad_apply_per_backend() {
        let ms = two_backends();
        let comp = ScaleToaError::new()
            .with_efac("EFAC1", BackendSelector::backend("A"))
            .with_equad("EQUAD1", BackendSelector::backend("B"));
        let mut params = NoiseParameterState::new();
        params.register(comp.name(), &comp.parameter_specs()).unwrap();
        params.set_value("EFAC1", 2.0).unwrap();
        params.set_value("EQUAD1", 1.5).unwrap();

        let var = comp.diagonal_variance(&ms, &params).unwrap();
        assert_relative_eq!(var[0], 4.0 * 1e-12, max_relative = 1e-12);
        assert_relative_eq!(var[1], (4.0 + 2.25) * 1e-12, max_relative = 1e-12);
        assert_relative_eq!(var[2], 9.0 * 1e-12, max_relative = 1e-12);
        assert!(var.iter().all(|&v| v >= 0.0));
    }

    #[test]
    fn first_matching_efac_wins() {
        let ms = two_backends();
        let comp = ScaleToaError::new()
            .with_efac("EFAC1", BackendSelector::backend("A"))
            .with_efac("EFAC2", BackendSelector::All);
        let mut params = NoiseParameterState::new();
        params.register(comp.name(), &comp.parameter_specs()).unwrap();
        params.set_value("EFAC1", 2.0).unwrap();
        params.set_value("EFAC2", 3.0).unwrap();
        let var = comp.diagonal_variance(&ms, &params).unwrap();
        assert_relative_eq!(var[0], 4.0e-12, max_relative = 1e-12);
        assert_relative_eq!(var[1], 36.0e-12, max_relative = 1e-12);
    }

    #[test]
    fn dm_scaling_uses_dm_uncertainties() {
        let ms = two_backends();
        let comp = ScaleDmError::new()
            .with_dmefac("DMEFAC1", BackendSelector::All)
            .with_dmequad("DMEQUAD1", BackendSelector::backend("A"));
        let mut params = NoiseParameterState::new();
        params.register(comp.name(), &comp.parameter_specs()).unwrap();
        params.set_value("DMEFAC1", 1.5).unwrap();
        params.set_value("DMEQUAD1", 1e-3).unwrap();
        let var = comp.diagonal_variance(&ms, &params).unwrap();
        assert_relative_eq!(var[0], 2.25 * 2e-6, max_relative = 1e-12);
        assert_relative_eq!(var[2], 2.25 * 9e-6, max_relative = 1e-12);
        assert_eq!(comp.channel(), Channel::Dm);
    }
}
