//! Noise parameter state and cache fingerprints.

use crate::error::NoiseError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Declaration of a parameter a component reads, with its default value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    pub default_value: f64,
    #[serde(default)]
    pub frozen: bool,
}

impl ParameterSpec {
    pub fn new(name: impl Into<String>, default_value: f64) -> Self {
        Self {
            name: name.into(),
            default_value,
            frozen: false,
        }
    }

    /// Structural parameters (harmonic counts, node spacings) start frozen.
    pub fn frozen(name: impl Into<String>, default_value: f64) -> Self {
        Self {
            name: name.into(),
            default_value,
            frozen: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub value: f64,
    pub frozen: bool,
    /// Component that registered the parameter; `None` for timing parameters.
    #[serde(default)]
    pub owner: Option<String>,
}

/// Current values of every model parameter, noise and timing alike.
///
/// The version counter moves on every mutation. Cache validity never relies
/// on it; see [`ParameterFingerprint`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NoiseParameterState {
    params: BTreeMap<String, Parameter>,
    #[serde(skip)]
    version: u64,
}

impl NoiseParameterState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn get(&self, name: &str) -> Option<&Parameter> {
        self.params.get(name)
    }

    pub fn value(&self, name: &str) -> Option<f64> {
        self.params.get(name).map(|p| p.value)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.params.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Parameter)> {
        self.params.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Free parameters in name order.
    pub fn free_parameters(&self) -> Vec<&str> {
        self.params
            .iter()
            .filter(|(_, p)| !p.frozen)
            .map(|(k, _)| k.as_str())
            .collect()
    }

    /// Insert or overwrite a timing (non-noise) parameter.
    pub fn set_timing_parameter(&mut self, name: impl Into<String>, value: f64) {
        let name = name.into();
        match self.params.get_mut(&name) {
            Some(p) => p.value = value,
            None => {
                self.params.insert(
                    name,
                    Parameter {
                        value,
                        frozen: false,
                        owner: None,
                    },
                );
            }
        }
        self.version += 1;
    }

    pub fn set_value(&mut self, name: &str, value: f64) -> Result<(), NoiseError> {
        let param = self
            .params
            .get_mut(name)
            .ok_or_else(|| NoiseError::UnknownParameter(name.to_string()))?;
        param.value = value;
        self.version += 1;
        Ok(())
    }

    pub fn set_frozen(&mut self, name: &str, frozen: bool) -> Result<(), NoiseError> {
        let param = self
            .params
            .get_mut(name)
            .ok_or_else(|| NoiseError::UnknownParameter(name.to_string()))?;
        param.frozen = frozen;
        self.version += 1;
        Ok(())
    }

    /// Register `specs` as owned by `owner`. Existing values survive so a
    /// parameter file loaded before the component is attached is honoured.
    pub(crate) fn register(&mut self, owner: &str, specs: &[ParameterSpec]) -> Result<(), NoiseError> {
        for spec in specs {
            if let Some(existing) = self.params.get(&spec.name)
                && let Some(first) = &existing.owner
                && first != owner
            {
                return Err(NoiseError::ParameterOwnershipConflict {
                    parameter: spec.name.clone(),
                    first: first.clone(),
                    second: owner.to_string(),
                });
            }
        }
        for spec in specs {
            let entry = self.params.entry(spec.name.clone()).or_insert(Parameter {
                value: spec.default_value,
                frozen: spec.frozen,
                owner: None,
            });
            entry.owner = Some(owner.to_string());
        }
        self.version += 1;
        Ok(())
    }

    pub(crate) fn unregister(&mut self, owner: &str) {
        self.params
            .retain(|_, p| p.owner.as_deref() != Some(owner));
        self.version += 1;
    }

    /// Value of `parameter` as read by `component`.
    pub fn require(&self, component: &str, parameter: &str) -> Result<f64, NoiseError> {
        let value = self
            .value(parameter)
            .ok_or_else(|| NoiseError::MissingParameter {
                component: component.to_string(),
                parameter: parameter.to_string(),
            })?;
        if !value.is_finite() {
            return Err(NoiseError::InvalidParameter {
                component: component.to_string(),
                parameter: parameter.to_string(),
                reason: format!("value {value} is not finite"),
            });
        }
        Ok(value)
    }

    /// A parameter used as a count (harmonics, log modes).
    pub fn require_count(&self, component: &str, parameter: &str) -> Result<usize, NoiseError> {
        let value = self.require(component, parameter)?;
        if value < 0.0 || value.fract() != 0.0 || value > u32::MAX as f64 {
            return Err(NoiseError::InvalidParameter {
                component: component.to_string(),
                parameter: parameter.to_string(),
                reason: format!("{value} is not a non-negative integer"),
            });
        }
        Ok(value as usize)
    }

    pub fn require_positive(&self, component: &str, parameter: &str) -> Result<f64, NoiseError> {
        let value = self.require(component, parameter)?;
        if value <= 0.0 {
            return Err(NoiseError::InvalidParameter {
                component: component.to_string(),
                parameter: parameter.to_string(),
                reason: format!("{value} must be positive"),
            });
        }
        Ok(value)
    }
}

/// One `(component, parameter, value)` entry of a fingerprint. Values are kept
/// as raw bits so distinct floats never compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FingerprintEntry {
    pub component: String,
    pub parameter: String,
    pub bits: Option<u64>,
}

/// Pure function of the registry structure and the noise-relevant parameter
/// values; timing parameters never enter it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ParameterFingerprint {
    pub(crate) registry_id: u64,
    pub(crate) registry_generation: u64,
    pub(crate) entries: Vec<FingerprintEntry>,
}

impl ParameterFingerprint {
    pub fn entries(&self) -> &[FingerprintEntry] {
        &self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_keeps_preloaded_values_and_claims_ownership() {
        let mut state = NoiseParameterState::new();
        state.set_timing_parameter("TNREDAMP", -13.5);
        state
            .register(
                "PLRedNoise",
                &[
                    ParameterSpec::new("TNREDAMP", -14.0),
                    ParameterSpec::new("TNREDGAM", 4.33),
                ],
            )
            .unwrap();
        assert_eq!(state.value("TNREDAMP"), Some(-13.5));
        assert_eq!(state.value("TNREDGAM"), Some(4.33));
        assert_eq!(
            state.get("TNREDGAM").unwrap().owner.as_deref(),
            Some("PLRedNoise")
        );

        let err = state
            .register("Other", &[ParameterSpec::new("TNREDGAM", 1.0)])
            .unwrap_err();
        assert!(matches!(err, NoiseError::ParameterOwnershipConflict { .. }));

        state.unregister("PLRedNoise");
        assert!(!state.contains("TNREDGAM"));
    }

    #[test]
    fn every_mutation_bumps_version() {
        let mut state = NoiseParameterState::new();
        let v0 = state.version();
        state.set_timing_parameter("F0", 218.8);
        state.set_value("F0", 218.9).unwrap();
        state.set_frozen("F0", true).unwrap();
        assert_eq!(state.version(), v0 + 3);
        assert!(state.free_parameters().is_empty());
        assert!(matches!(
            state.set_value("nope", 1.0),
            Err(NoiseError::UnknownParameter(_))
        ));
    }

    #[test]
    fn counts_must_be_whole() {
        let mut state = NoiseParameterState::new();
        state.set_timing_parameter("TNREDC", 2.5);
        assert!(state.require_count("PLRedNoise", "TNREDC").is_err());
        state.set_value("TNREDC", 30.0).unwrap();
        assert_eq!(state.require_count("PLRedNoise", "TNREDC").unwrap(), 30);
    }
}
