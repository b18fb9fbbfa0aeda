//! Immutable, identity-tracked measurement sets.
//!
//! A [`MeasurementSet`] is the only view of arrival-time data the noise core
//! reads. Its identity is assigned once, at construction, from a process-wide
//! counter: two sets built from identical records are still distinct, while a
//! clone shares both the records and the identity.

use crate::error::NoiseError;
use crate::types::SECONDS_PER_DAY;
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_MEASUREMENT_SET_ID: AtomicU64 = AtomicU64::new(1);

/// Stable identity of a constructed measurement set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MeasurementSetId(u64);

impl MeasurementSetId {
    fn fresh() -> Self {
        Self(NEXT_MEASUREMENT_SET_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for MeasurementSetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ms#{}", self.0)
    }
}

/// One time-tagged measurement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    /// Arrival time, MJD (TDB).
    pub mjd: f64,
    /// Observing frequency in MHz.
    pub frequency_mhz: f64,
    /// Arrival-time uncertainty in microseconds.
    pub uncertainty_us: f64,
    /// Wideband DM value, pc cm^-3.
    #[serde(default)]
    pub dm: Option<f64>,
    /// Wideband DM uncertainty, pc cm^-3.
    #[serde(default)]
    pub dm_uncertainty: Option<f64>,
    /// Backend / receiver flag used by white-noise and ECORR selectors.
    #[serde(default)]
    pub backend: Option<String>,
    /// Solar-wind DM per unit electron density at 1 AU (pc cm^-3 per cm^-3),
    /// precomputed by the astrometry layer from the line-of-sight geometry.
    #[serde(default)]
    pub solar_wind_geometry: Option<f64>,
}

impl Measurement {
    pub fn new(mjd: f64, frequency_mhz: f64, uncertainty_us: f64) -> Self {
        Self {
            mjd,
            frequency_mhz,
            uncertainty_us,
            dm: None,
            dm_uncertainty: None,
            backend: None,
            solar_wind_geometry: None,
        }
    }

    pub fn with_dm(mut self, dm: f64, dm_uncertainty: f64) -> Self {
        self.dm = Some(dm);
        self.dm_uncertainty = Some(dm_uncertainty);
        self
    }

    pub fn with_backend(mut self, backend: impl Into<String>) -> Self {
        self.backend = Some(backend.into());
        self
    }

    pub fn with_solar_wind_geometry(mut self, geometry: f64) -> Self {
        self.solar_wind_geometry = Some(geometry);
        self
    }

    fn validate(&self, row: usize) -> Result<(), NoiseError> {
        let invalid = |reason: String| NoiseError::InvalidMeasurement { row, reason };
        if !self.mjd.is_finite() {
            return Err(invalid(format!("time {} is not finite", self.mjd)));
        }
        if !(self.frequency_mhz.is_finite() && self.frequency_mhz > 0.0) {
            return Err(invalid(format!(
                "frequency {} MHz must be finite and positive",
                self.frequency_mhz
            )));
        }
        if !(self.uncertainty_us.is_finite() && self.uncertainty_us >= 0.0) {
            return Err(invalid(format!(
                "uncertainty {} us must be finite and non-negative",
                self.uncertainty_us
            )));
        }
        if let Some(dm) = self.dm
            && !dm.is_finite()
        {
            return Err(invalid(format!("DM {dm} is not finite")));
        }
        if let Some(err) = self.dm_uncertainty
            && !(err.is_finite() && err >= 0.0)
        {
            return Err(invalid(format!(
                "DM uncertainty {err} must be finite and non-negative"
            )));
        }
        if self.dm.is_some() != self.dm_uncertainty.is_some() {
            return Err(invalid(
                "DM value and DM uncertainty must be given together".to_string(),
            ));
        }
        Ok(())
    }
}

/// Which measurements a white-noise or ECORR term applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackendSelector {
    All,
    Backend(String),
}

impl BackendSelector {
    pub fn backend(name: impl Into<String>) -> Self {
        BackendSelector::Backend(name.into())
    }

    pub fn matches(&self, measurement: &Measurement) -> bool {
        match self {
            BackendSelector::All => true,
            BackendSelector::Backend(name) => measurement.backend.as_deref() == Some(name),
        }
    }
}

/// Read-only handle to an ordered collection of measurements.
#[derive(Debug, Clone)]
pub struct MeasurementSet {
    id: MeasurementSetId,
    records: Arc<[Measurement]>,
}

impl MeasurementSet {
    pub fn new(records: Vec<Measurement>) -> Result<Self, NoiseError> {
        for (row, record) in records.iter().enumerate() {
            record.validate(row)?;
        }
        Ok(Self {
            id: MeasurementSetId::fresh(),
            records: records.into(),
        })
    }

    pub fn id(&self) -> MeasurementSetId {
        self.id
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[Measurement] {
        &self.records
    }

    /// Weak handle on the shared records; dead once every clone is dropped.
    pub(crate) fn downgrade(&self) -> Weak<[Measurement]> {
        Arc::downgrade(&self.records)
    }

    /// Whether every record carries a wideband DM measurement.
    pub fn is_wideband(&self) -> bool {
        !self.records.is_empty() && self.records.iter().all(|m| m.dm.is_some())
    }

    pub fn mjds(&self) -> Array1<f64> {
        self.records.iter().map(|m| m.mjd).collect()
    }

    /// Arrival times in seconds.
    pub fn times_seconds(&self) -> Array1<f64> {
        self.records.iter().map(|m| m.mjd * SECONDS_PER_DAY).collect()
    }

    pub fn frequencies_mhz(&self) -> Array1<f64> {
        self.records.iter().map(|m| m.frequency_mhz).collect()
    }

    /// Raw arrival-time uncertainties in seconds.
    pub fn uncertainties_seconds(&self) -> Array1<f64> {
        self.records
            .iter()
            .map(|m| m.uncertainty_us * 1e-6)
            .collect()
    }

    /// Wideband DM values; `requester` names the component or consumer in
    /// the error when a record has none.
    pub fn dm_values(&self, requester: &str) -> Result<Array1<f64>, NoiseError> {
        self.required_field(requester, "dm", |m| m.dm)
    }

    pub fn dm_uncertainties(&self, requester: &str) -> Result<Array1<f64>, NoiseError> {
        self.required_field(requester, "dm_uncertainty", |m| m.dm_uncertainty)
    }

    pub fn solar_wind_geometry(&self, requester: &str) -> Result<Array1<f64>, NoiseError> {
        self.required_field(requester, "solar_wind_geometry", |m| {
            m.solar_wind_geometry
        })
    }

    fn required_field(
        &self,
        requester: &str,
        field: &'static str,
        get: impl Fn(&Measurement) -> Option<f64>,
    ) -> Result<Array1<f64>, NoiseError> {
        let mut out = Array1::<f64>::zeros(self.records.len());
        for (row, record) in self.records.iter().enumerate() {
            out[row] = get(record).ok_or_else(|| NoiseError::MissingMeasurementField {
                component: requester.to_string(),
                field,
                row,
            })?;
        }
        Ok(out)
    }

    /// Row indices matched by `selector`, in measurement order.
    pub fn select(&self, selector: &BackendSelector) -> Vec<usize> {
        self.records
            .iter()
            .enumerate()
            .filter(|(_, m)| selector.matches(m))
            .map(|(i, _)| i)
            .collect()
    }

    /// `(min, max)` MJD, or `None` for an empty set.
    pub fn mjd_range(&self) -> Option<(f64, f64)> {
        let mut iter = self.records.iter().map(|m| m.mjd);
        let first = iter.next()?;
        Some(iter.fold((first, first), |(lo, hi), t| (lo.min(t), hi.max(t))))
    }

    /// Time baseline in seconds (0 for fewer than two distinct epochs).
    pub fn span_seconds(&self) -> f64 {
        self.mjd_range()
            .map(|(lo, hi)| (hi - lo) * SECONDS_PER_DAY)
            .unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<Measurement> {
        vec![
            Measurement::new(55000.0, 1400.0, 1.0).with_backend("L-wide"),
            Measurement::new(55010.0, 820.0, 2.0).with_backend("Rcvr_800"),
            Measurement::new(55030.0, 1400.0, 1.5).with_backend("L-wide"),
        ]
    }

    #[test]
    fn identical_content_gets_distinct_identity() {
        let a = MeasurementSet::new(sample()).unwrap();
        let b = MeasurementSet::new(sample()).unwrap();
        assert_ne!(a.id(), b.id());
        let c = a.clone();
        assert_eq!(a.id(), c.id());
    }

    #[test]
    fn span_and_selection() {
        let ms = MeasurementSet::new(sample()).unwrap();
        assert_eq!(ms.span_seconds(), 30.0 * SECONDS_PER_DAY);
        assert_eq!(ms.select(&BackendSelector::backend("L-wide")), vec![0, 2]);
        assert_eq!(ms.select(&BackendSelector::All), vec![0, 1, 2]);
        assert_eq!(ms.uncertainties_seconds()[1], 2.0e-6);
    }

    #[test]
    fn missing_dm_is_reported_with_row() {
        let ms = MeasurementSet::new(sample()).unwrap();
        assert!(!ms.is_wideband());
        match ms.dm_values("PLDMNoise") {
            Err(NoiseError::MissingMeasurementField { component, field, row }) => {
                assert_eq!(component, "PLDMNoise");
                assert_eq!(field, "dm");
                assert_eq!(row, 0);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn rejects_non_positive_frequency() {
        let bad = vec![Measurement::new(55000.0, 0.0, 1.0)];
        assert!(matches!(
            MeasurementSet::new(bad),
            Err(NoiseError::InvalidMeasurement { row: 0, .. })
        ));
    }

    #[test]
    fn rejects_half_specified_dm() {
        let mut m = Measurement::new(55000.0, 1400.0, 1.0);
        m.dm = Some(10.0);
        assert!(MeasurementSet::new(vec![m]).is_err());
    }
}
