//! Ordered collection of the noise components attached to a timing model.
//!
//! Registry order is the composition order: column ranges in the global
//! design and block offsets in the global covariance follow it exactly.

use crate::error::NoiseError;
use crate::noise::{CorrelatedNoise, NoiseComponent, UncorrelatedNoise};
use crate::params::{FingerprintEntry, NoiseParameterState, ParameterFingerprint};
use crate::types::Channel;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_REGISTRY_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug)]
pub struct NoiseRegistry {
    id: u64,
    /// Bumped on every structural change (add/remove).
    generation: u64,
    components: Vec<Box<dyn NoiseComponent>>,
}

impl Default for NoiseRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl NoiseRegistry {
    pub fn new() -> Self {
        Self {
            id: NEXT_REGISTRY_ID.fetch_add(1, Ordering::Relaxed),
            generation: 0,
            components: Vec::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn NoiseComponent> {
        self.components.iter().map(|c| c.as_ref())
    }

    pub fn names(&self) -> Vec<&str> {
        self.components.iter().map(|c| c.name()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&dyn NoiseComponent> {
        self.iter().find(|c| c.name() == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Correlated components in registry order.
    pub fn correlated(&self) -> impl Iterator<Item = &dyn CorrelatedNoise> {
        self.components.iter().filter_map(|c| c.as_correlated())
    }

    pub fn has_correlated(&self) -> bool {
        self.correlated().next().is_some()
    }

    /// The uncorrelated component that owns `channel`, if any.
    pub fn white_noise_for(&self, channel: Channel) -> Option<&dyn UncorrelatedNoise> {
        self.components
            .iter()
            .filter_map(|c| c.as_uncorrelated())
            .find(|u| u.channel() == channel)
    }

    /// Checks that `component` could be added without breaking registry
    /// invariants.
    pub fn check_compatible(&self, component: &dyn NoiseComponent) -> Result<(), NoiseError> {
        if self.contains(component.name()) {
            return Err(NoiseError::DuplicateComponent(component.name().to_string()));
        }
        if let Some(white) = component.as_uncorrelated()
            && let Some(existing) = self.white_noise_for(white.channel())
        {
            return Err(NoiseError::ConflictingWhiteNoise {
                channel: white.channel(),
                first: existing.name().to_string(),
                second: component.name().to_string(),
            });
        }
        Ok(())
    }

    pub fn add(&mut self, component: Box<dyn NoiseComponent>) -> Result<(), NoiseError> {
        self.check_compatible(component.as_ref())?;
        self.components.push(component);
        self.generation += 1;
        Ok(())
    }

    pub fn remove(&mut self, name: &str) -> Result<Box<dyn NoiseComponent>, NoiseError> {
        let pos = self
            .components
            .iter()
            .position(|c| c.name() == name)
            .ok_or_else(|| NoiseError::UnknownComponent(name.to_string()))?;
        self.generation += 1;
        Ok(self.components.remove(pos))
    }

    /// Registry identity followed by every declared parameter value, in
    /// registry order then declaration order. Undeclared parameters (timing
    /// model parameters) never appear.
    pub fn fingerprint(&self, params: &NoiseParameterState) -> ParameterFingerprint {
        let mut entries = Vec::new();
        for component in &self.components {
            for spec in component.parameter_specs() {
                let bits = params.value(&spec.name).map(f64::to_bits);
                entries.push(FingerprintEntry {
                    component: component.name().to_string(),
                    parameter: spec.name,
                    bits,
                });
            }
        }
        ParameterFingerprint {
            registry_id: self.id,
            registry_generation: self.generation,
            entries,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::noise::{FourierNoise, ScaleDmError, ScaleToaError};
    use crate::measurement::BackendSelector;

    #[test]
    fn duplicate_names_are_rejected() {
        let mut reg = NoiseRegistry::new();
        reg.add(Box::new(FourierNoise::red_noise())).unwrap();
        let err = reg.add(Box::new(FourierNoise::red_noise())).unwrap_err();
        assert!(matches!(err, NoiseError::DuplicateComponent(ref n) if n == "PLRedNoise"));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn one_white_noise_component_per_channel() {
        let mut reg = NoiseRegistry::new();
        reg.add(Box::new(ScaleToaError::new())).unwrap();
        reg.add(Box::new(ScaleDmError::new())).unwrap();

        #[derive(Debug)]
        struct Renamed(ScaleToaError);
        impl NoiseComponent for Renamed {
            fn name(&self) -> &str {
                "OtherWhite"
            }
            fn kind(&self) -> crate::types::NoiseKind {
                self.0.kind()
            }
            fn parameter_specs(&self) -> Vec<crate::params::ParameterSpec> {
                Vec::new()
            }
            fn as_uncorrelated(&self) -> Option<&dyn UncorrelatedNoise> {
                self.0.as_uncorrelated()
            }
        }
        let err = reg
            .add(Box::new(Renamed(
                ScaleToaError::new().with_efac("EFAC9", BackendSelector::All),
            )))
            .unwrap_err();
        assert!(matches!(
            err,
            NoiseError::ConflictingWhiteNoise {
                channel: Channel::Timing,
                ..
            }
        ));
    }

    #[test]
    fn fingerprint_ignores_undeclared_parameters() {
        let mut reg = NoiseRegistry::new();
        let red = FourierNoise::red_noise();
        let mut params = NoiseParameterState::new();
        params.register(red.name(), &red.parameter_specs()).unwrap();
        reg.add(Box::new(red)).unwrap();

        let before = reg.fingerprint(&params);
        params.set_timing_parameter("F0", 339.3);
        assert_eq!(before, reg.fingerprint(&params));

        params.set_value("TNREDAMP", -13.0).unwrap();
        assert_ne!(before, reg.fingerprint(&params));
    }

    #[test]
    fn structural_change_moves_the_fingerprint() {
        let mut reg = NoiseRegistry::new();
        let params = NoiseParameterState::new();
        let empty = reg.fingerprint(&params);
        reg.add(Box::new(ScaleToaError::new())).unwrap();
        reg.remove("ScaleToaError").unwrap();
        // same (empty) structure, different generation
        assert_ne!(empty, reg.fingerprint(&params));
        assert!(matches!(
            reg.remove("ScaleToaError"),
            Err(NoiseError::UnknownComponent(_))
        ));
    }

    #[test]
    fn distinct_registries_never_share_fingerprints() {
        let params = NoiseParameterState::new();
        assert_ne!(
            NoiseRegistry::new().fingerprint(&params),
            NoiseRegistry::new().fingerprint(&params)
        );
    }
}
