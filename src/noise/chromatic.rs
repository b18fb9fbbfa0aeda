use crate::error::NoiseError;
use crate::measurement::MeasurementSet;
use crate::params::{NoiseParameterState, ParameterSpec};
use crate::types::{DM_CONST, REFERENCE_FREQUENCY_MHZ};
use ndarray::Array1;

/// How a unit coefficient of a correlated process maps onto each measurement.
#[derive(Debug, Clone, PartialEq)]
pub enum ChromaticScaling {
    /// Same delay at every frequency.
    Achromatic,
    /// Delay scales as `(1400 MHz / nu)^2`; the DM channel sees `1400^2 / K`.
    Dispersive,
    /// Delay scales as `(1400 MHz / nu)^alpha` with `alpha` read from a parameter.
    Chromatic {
        index_parameter: String,
        default_index: f64,
    },
    /// Delay `G * K / nu^2` for a unit electron density at 1 AU, where `G` is
    /// the per-measurement solar-wind geometry; the DM channel sees `G`.
    SolarWind,
}

impl ChromaticScaling {
    pub fn chromatic(index_parameter: impl Into<String>) -> Self {
        ChromaticScaling::Chromatic {
            index_parameter: index_parameter.into(),
            default_index: 4.0,
        }
    }

    pub fn has_dm_channel(&self) -> bool {
        matches!(self, ChromaticScaling::Dispersive | ChromaticScaling::SolarWind)
    }

    pub fn parameter_specs(&self) -> Vec<ParameterSpec> {
        match self {
            ChromaticScaling::Chromatic {
                index_parameter,
                default_index,
            } => vec![ParameterSpec::frozen(index_parameter.clone(), *default_index)],
            _ => Vec::new(),
        }
    }

    /// Per-row multiplier applied to the timing basis.
    pub fn timing_factors(
        &self,
        component: &str,
        measurements: &MeasurementSet,
        params: &NoiseParameterState,
    ) -> Result<Array1<f64>, NoiseError> {
        let freqs = measurements.frequencies_mhz();
        match self {
            ChromaticScaling::Achromatic => Ok(Array1::ones(freqs.len())),
            ChromaticScaling::Dispersive => {
                Ok(freqs.mapv(|nu| (REFERENCE_FREQUENCY_MHZ / nu).powi(2)))
            }
            ChromaticScaling::Chromatic {
                index_parameter, ..
            } => {
                let alpha = params.require(component, index_parameter)?;
                Ok(freqs.mapv(|nu| (REFERENCE_FREQUENCY_MHZ / nu).powf(alpha)))
            }
            ChromaticScaling::SolarWind => {
                let geometry = measurements.solar_wind_geometry(component)?;
                Ok(&geometry * &freqs.mapv(|nu| DM_CONST / (nu * nu)))
            }
        }
    }

    /// Per-row multiplier applied to the DM-channel basis, if there is one.
    pub fn dm_factors(
        &self,
        component: &str,
        measurements: &MeasurementSet,
    ) -> Result<Option<Array1<f64>>, NoiseError> {
        match self {
            ChromaticScaling::Dispersive => Ok(Some(Array1::from_elem(
                measurements.len(),
                REFERENCE_FREQUENCY_MHZ * REFERENCE_FREQUENCY_MHZ / DM_CONST,
            ))),
            ChromaticScaling::SolarWind => {
                Ok(Some(measurements.solar_wind_geometry(component)?))
            }
            ChromaticScaling::Achromatic | ChromaticScaling::Chromatic { .. } => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measurement::Measurement;
    use approx::assert_relative_eq;

    fn two_band() -> MeasurementSet {
        MeasurementSet::new(vec![
            Measurement::new(55000.0, 1400.0, 1.0).with_solar_wind_geometry(2e-5),
            Measurement::new(55000.0, 700.0, 1.0).with_solar_wind_geometry(2e-5),
        ])
        .unwrap()
    }

    #[test]
    fn dispersive_delay_quadruples_at_half_frequency() {
        let ms = two_band();
        let params = NoiseParameterState::new();
        let f = ChromaticScaling::Dispersive
            .timing_factors("PLDMNoise", &ms, &params)
            .unwrap();
        assert_relative_eq!(f[0], 1.0);
        assert_relative_eq!(f[1], 4.0);
    }

    #[test]
    fn dispersive_dm_channel_is_consistent_with_delay() {
        let ms = two_band();
        let params = NoiseParameterState::new();
        let timing = ChromaticScaling::Dispersive
            .timing_factors("PLDMNoise", &ms, &params)
            .unwrap();
        let dm = ChromaticScaling::Dispersive
            .dm_factors("PLDMNoise", &ms)
            .unwrap()
            .unwrap();
        // delay = K * DM / nu^2 for each row
        for (i, nu) in [1400.0f64, 700.0].iter().enumerate() {
            assert_relative_eq!(timing[i], DM_CONST * dm[i] / (nu * nu), max_relative = 1e-14);
        }
    }

    #[test]
    fn chromatic_index_comes_from_parameters() {
        let ms = two_band();
        let mut params = NoiseParameterState::new();
        params.set_timing_parameter("TNCHROMIDX", 4.0);
        let f = ChromaticScaling::chromatic("TNCHROMIDX")
            .timing_factors("PLChromNoise", &ms, &params)
            .unwrap();
        assert_relative_eq!(f[1], 16.0, max_relative = 1e-14);
    }

    #[test]
    fn solar_wind_requires_geometry() {
        let ms = MeasurementSet::new(vec![Measurement::new(55000.0, 1400.0, 1.0)]).unwrap();
        let params = NoiseParameterState::new();
        assert!(matches!(
            ChromaticScaling::SolarWind.timing_factors("PLSWNoise", &ms, &params),
            Err(NoiseError::MissingMeasurementField { field: "solar_wind_geometry", .. })
        ));
    }
}
