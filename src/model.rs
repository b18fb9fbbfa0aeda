//! Noise side of a timing model: the registry plus the parameter state.
//!
//! Every mutation goes through [`NoiseModel`] so that the parameter state and
//! the registry never disagree about which parameters exist.

use crate::composer::{
    build_global_covariance, build_global_design, channel_variance,
};
use crate::error::NoiseError;
use crate::measurement::MeasurementSet;
use crate::noise::NoiseComponent;
use crate::params::{NoiseParameterState, ParameterFingerprint};
use crate::registry::NoiseRegistry;
use crate::types::{Channel, DesignMode};
use ndarray::{Array1, Array2};

#[derive(Debug, Default)]
pub struct NoiseModel {
    registry: NoiseRegistry,
    params: NoiseParameterState,
}

impl NoiseModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from parameters loaded by the parameter-file layer. Values for
    /// components added later are taken from here instead of the defaults.
    pub fn with_parameters(params: NoiseParameterState) -> Self {
        Self {
            registry: NoiseRegistry::new(),
            params,
        }
    }

    pub fn registry(&self) -> &NoiseRegistry {
        &self.registry
    }

    pub fn parameters(&self) -> &NoiseParameterState {
        &self.params
    }

    pub fn fingerprint(&self) -> ParameterFingerprint {
        self.registry.fingerprint(&self.params)
    }

    pub fn add_component(&mut self, component: Box<dyn NoiseComponent>) -> Result<(), NoiseError> {
        self.registry.check_compatible(component.as_ref())?;
        self.params
            .register(component.name(), &component.parameter_specs())?;
        self.registry.add(component)
    }

    /// Detach a component and drop the parameters it owns.
    pub fn remove_component(&mut self, name: &str) -> Result<Box<dyn NoiseComponent>, NoiseError> {
        let component = self.registry.remove(name)?;
        self.params.unregister(name);
        Ok(component)
    }

    pub fn set_parameter(&mut self, name: &str, value: f64) -> Result<(), NoiseError> {
        self.params.set_value(name, value)
    }

    pub fn set_timing_parameter(&mut self, name: impl Into<String>, value: f64) {
        self.params.set_timing_parameter(name, value);
    }

    pub fn freeze(&mut self, name: &str) -> Result<(), NoiseError> {
        self.params.set_frozen(name, true)
    }

    pub fn thaw(&mut self, name: &str) -> Result<(), NoiseError> {
        self.params.set_frozen(name, false)
    }

    pub fn has_correlated_errors(&self) -> bool {
        self.registry.has_correlated()
    }

    /// Timing-mode global design matrix.
    pub fn noise_model_designmatrix(
        &self,
        measurements: &MeasurementSet,
    ) -> Result<Array2<f64>, NoiseError> {
        Ok(build_global_design(&self.registry, measurements, &self.params, DesignMode::Timing)?
            .matrix)
    }

    /// Prior variance of every basis column, in design order.
    pub fn noise_model_basis_weight(
        &self,
        measurements: &MeasurementSet,
    ) -> Result<Array1<f64>, NoiseError> {
        Ok(
            build_global_covariance(&self.registry, measurements, &self.params, DesignMode::Timing)?
                .diagonal(),
        )
    }

    /// `(component, (offset, size))` for every correlated component.
    pub fn noise_model_dimensions(
        &self,
        measurements: &MeasurementSet,
    ) -> Result<Vec<(String, (usize, usize))>, NoiseError> {
        Ok(
            build_global_design(&self.registry, measurements, &self.params, DesignMode::Timing)?
                .columns
                .dimensions(),
        )
    }

    /// White-noise-scaled arrival-time uncertainties, seconds.
    pub fn scaled_toa_uncertainty(
        &self,
        measurements: &MeasurementSet,
    ) -> Result<Array1<f64>, NoiseError> {
        Ok(channel_variance(&self.registry, measurements, &self.params, Channel::Timing)?
            .mapv(f64::sqrt))
    }

    /// White-noise-scaled wideband DM uncertainties, pc cm^-3.
    pub fn scaled_dm_uncertainty(
        &self,
        measurements: &MeasurementSet,
    ) -> Result<Array1<f64>, NoiseError> {
        Ok(channel_variance(&self.registry, measurements, &self.params, Channel::Dm)?
            .mapv(f64::sqrt))
    }

    /// Arrival-time uncertainties followed by DM uncertainties.
    pub fn scaled_wideband_uncertainty(
        &self,
        measurements: &MeasurementSet,
    ) -> Result<Array1<f64>, NoiseError> {
        let toa = self.scaled_toa_uncertainty(measurements)?;
        let dm = self.scaled_dm_uncertainty(measurements)?;
        Ok(toa.iter().chain(dm.iter()).copied().collect())
    }
}
