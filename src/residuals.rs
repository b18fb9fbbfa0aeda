//! Residual consumers: whitening, chi-squared and likelihood for narrowband
//! and wideband measurement sets.

use crate::cache::{EvaluationContext, NoiseSystem};
use crate::error::NoiseError;
use crate::measurement::MeasurementSet;
use crate::model::NoiseModel;
use crate::types::DesignMode;
use ndarray::{Array1, s};
use std::sync::Arc;

fn check_len(what: &'static str, expected: usize, actual: usize) -> Result<(), NoiseError> {
    if expected != actual {
        return Err(NoiseError::LengthMismatch {
            what,
            expected,
            actual,
        });
    }
    Ok(())
}

/// `(component, T_c b_c)` for each correlated component, in registry order.
fn split_realizations(
    system: &NoiseSystem,
    residuals: &Array1<f64>,
) -> Result<Vec<(String, Array1<f64>)>, NoiseError> {
    let coefficients = system.gls().noise_coefficients(residuals)?;
    let design = system.design();
    Ok(system
        .columns()
        .iter()
        .map(|(name, range)| {
            let t = design.slice(s![.., range.clone()]);
            let b = coefficients.slice(s![range]);
            (name.to_string(), t.dot(&b))
        })
        .collect())
}

/// Arrival-time residuals under the timing-mode noise system.
#[derive(Debug, Clone)]
pub struct NarrowbandResiduals {
    system: Arc<NoiseSystem>,
    residuals: Array1<f64>,
}

impl NarrowbandResiduals {
    /// `residuals` are timing residuals in seconds, one per measurement.
    pub fn new(
        context: &mut EvaluationContext,
        model: &NoiseModel,
        measurements: &MeasurementSet,
        residuals: Array1<f64>,
    ) -> Result<Self, NoiseError> {
        check_len("timing residuals", measurements.len(), residuals.len())?;
        let system = context.noise_system(model, measurements, DesignMode::Timing)?;
        Ok(Self { system, residuals })
    }

    pub fn residuals(&self) -> &Array1<f64> {
        &self.residuals
    }

    pub fn system(&self) -> &NoiseSystem {
        &self.system
    }

    /// White-noise-scaled uncertainty per measurement, seconds.
    pub fn scaled_uncertainty(&self) -> Array1<f64> {
        self.system.white_noise().mapv(f64::sqrt)
    }

    /// `(r - T b) / sigma'`. Without correlated components this is exactly
    /// `r / sigma'`.
    pub fn whitened(&self) -> Result<Array1<f64>, NoiseError> {
        self.system.gls().whiten(&self.residuals)
    }

    /// `r^T C^{-1} r`.
    pub fn chi2(&self) -> Result<f64, NoiseError> {
        self.system.gls().quadratic_form(&self.residuals)
    }

    pub fn log_likelihood(&self) -> Result<f64, NoiseError> {
        self.system.gls().log_likelihood(&self.residuals)
    }

    /// Total correlated-noise signal `T b`.
    pub fn noise_realization(&self) -> Result<Array1<f64>, NoiseError> {
        self.system.gls().noise_realization(&self.residuals)
    }

    pub fn noise_realizations(&self) -> Result<Vec<(String, Array1<f64>)>, NoiseError> {
        split_realizations(&self.system, &self.residuals)
    }
}

/// Arrival-time and DM residuals fitted jointly under the wideband system.
/// The combined vector stacks the `n` timing rows over the `n` DM rows.
#[derive(Debug, Clone)]
pub struct WidebandResiduals {
    system: Arc<NoiseSystem>,
    combined: Array1<f64>,
    n: usize,
}

impl WidebandResiduals {
    /// `toa` in seconds, `dm` in pc cm^-3.
    pub fn new(
        context: &mut EvaluationContext,
        model: &NoiseModel,
        measurements: &MeasurementSet,
        toa: &Array1<f64>,
        dm: &Array1<f64>,
    ) -> Result<Self, NoiseError> {
        let n = measurements.len();
        check_len("timing residuals", n, toa.len())?;
        check_len("DM residuals", n, dm.len())?;
        let system = context.noise_system(model, measurements, DesignMode::Wideband)?;
        let combined = toa.iter().chain(dm.iter()).copied().collect();
        Ok(Self {
            system,
            combined,
            n,
        })
    }

    pub fn combined(&self) -> &Array1<f64> {
        &self.combined
    }

    pub fn toa_residuals(&self) -> Array1<f64> {
        self.combined.slice(s![..self.n]).to_owned()
    }

    pub fn dm_residuals(&self) -> Array1<f64> {
        self.combined.slice(s![self.n..]).to_owned()
    }

    pub fn system(&self) -> &NoiseSystem {
        &self.system
    }

    /// Effective uncertainty per row (timing then DM), read off the white
    /// diagonal without touching the residuals.
    pub fn scaled_wideband_uncertainty(&self) -> Array1<f64> {
        self.system.white_noise().mapv(f64::sqrt)
    }

    pub fn whitened(&self) -> Result<Array1<f64>, NoiseError> {
        self.system.gls().whiten(&self.combined)
    }

    pub fn toa_whitened(&self) -> Result<Array1<f64>, NoiseError> {
        Ok(self.whitened()?.slice(s![..self.n]).to_owned())
    }

    pub fn dm_whitened(&self) -> Result<Array1<f64>, NoiseError> {
        Ok(self.whitened()?.slice(s![self.n..]).to_owned())
    }

    pub fn chi2(&self) -> Result<f64, NoiseError> {
        self.system.gls().quadratic_form(&self.combined)
    }

    pub fn log_likelihood(&self) -> Result<f64, NoiseError> {
        self.system.gls().log_likelihood(&self.combined)
    }

    pub fn noise_realizations(&self) -> Result<Vec<(String, Array1<f64>)>, NoiseError> {
        split_realizations(&self.system, &self.combined)
    }
}
