//! Time-domain Gaussian-process kernels on a linear-interpolation basis.
//!
//! The process is represented by its values at nodes spaced `dt` days across
//! the measurement span; each measurement interpolates linearly between its
//! two neighbouring nodes. The prior over node values comes from a kernel in
//! the node lag `tau` (days). Only the ridge kernel is diagonal.

use super::chromatic::ChromaticScaling;
use super::{CorrelatedNoise, NoiseComponent, PriorCovariance, scale_rows};
use crate::error::NoiseError;
use crate::measurement::MeasurementSet;
use crate::params::{NoiseParameterState, ParameterSpec};
use crate::types::{DesignMode, NoiseKind, SECONDS_PER_DAY};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::f64::consts::PI;

/// Matérn smoothness `nu` (half-integer variants with closed forms).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MaternNu {
    Half,
    ThreeHalves,
    FiveHalves,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum TimeDomainKernel {
    Ridge,
    SquaredExponential,
    Matern(MaternNu),
    QuasiPeriodic,
}

/// Kernel hyperparameters in the units the kernels take them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KernelHyperparameters {
    /// Process standard deviation (s, before chromatic scaling).
    pub sigma: f64,
    /// Correlation length in days.
    pub length_scale: f64,
    /// Periodic sharpness `Gamma`.
    pub gamma_p: f64,
    /// Period in days.
    pub period: f64,
}

impl TimeDomainKernel {
    pub fn kind(self) -> NoiseKind {
        match self {
            TimeDomainKernel::Ridge => NoiseKind::CorrelatedDiagonal,
            _ => NoiseKind::CorrelatedNonDiagonal,
        }
    }

    /// Normalized correlation at lag `tau` (days); 1 at zero lag.
    fn correlation(self, tau: f64, hp: &KernelHyperparameters) -> f64 {
        let x = tau.abs() / hp.length_scale;
        match self {
            TimeDomainKernel::Ridge => {
                if tau == 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            TimeDomainKernel::SquaredExponential => (-0.5 * x * x).exp(),
            TimeDomainKernel::Matern(nu) => match nu {
                MaternNu::Half => (-x).exp(),
                MaternNu::ThreeHalves => {
                    let a = 3.0_f64.sqrt() * x;
                    (1.0 + a) * (-a).exp()
                }
                MaternNu::FiveHalves => {
                    let a = 5.0_f64.sqrt() * x;
                    (1.0 + a + (a * a) / 3.0) * (-a).exp()
                }
            },
            TimeDomainKernel::QuasiPeriodic => {
                let s = (PI * tau / hp.period).sin();
                (-0.5 * x * x - hp.gamma_p * s * s).exp()
            }
        }
    }

    /// Prior covariance over `nodes` (days).
    ///
    /// Non-ridge kernels carry a diagonal jitter of `(sigma / 10^1.5)^2` so
    /// nearby nodes do not make the block numerically singular.
    pub fn covariance(self, nodes: &Array1<f64>, hp: &KernelHyperparameters) -> PriorCovariance {
        let var = hp.sigma * hp.sigma;
        let m = nodes.len();
        if let TimeDomainKernel::Ridge = self {
            return PriorCovariance::Diagonal(Array1::from_elem(m, var));
        }
        let jitter = var * 10f64.powf(-3.0);
        let mut out = Array2::<f64>::zeros((m, m));
        for i in 0..m {
            out[[i, i]] = var + jitter;
            for j in 0..i {
                let v = var * self.correlation(nodes[i] - nodes[j], hp);
                out[[i, j]] = v;
                out[[j, i]] = v;
            }
        }
        PriorCovariance::Dense(out)
    }
}

/// Node indices above this are no longer exact as `f64`.
const MAX_NODE_INDEX: f64 = 4_503_599_627_370_496.0;

/// Linear interpolation basis on nodes spaced `dt` days from the earliest
/// measurement. Only nodes that carry weight are built, so the basis has at
/// most two columns per measurement whatever the grid size; the retained node
/// times are returned alongside it. `None` when `dt` is too small (or not
/// positive) for the span to be indexed.
pub fn linear_interpolation_basis(
    mjds: &Array1<f64>,
    dt: f64,
) -> Option<(Array2<f64>, Array1<f64>)> {
    let n = mjds.len();
    if n == 0 {
        return Some((Array2::zeros((0, 0)), Array1::zeros(0)));
    }
    let t_min = mjds.iter().copied().fold(f64::INFINITY, f64::min);
    let t_max = mjds.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let span = ((t_max - t_min) / dt).ceil();
    if !(dt > 0.0 && span.is_finite() && span < MAX_NODE_INDEX) {
        return None;
    }
    let intervals = (span as usize).max(1);

    // (row, node, weight) for every nonzero interpolation weight
    let mut weights = Vec::with_capacity(2 * n);
    for (i, &t) in mjds.iter().enumerate() {
        let offset = (t - t_min) / dt;
        let j = (offset.floor() as usize).min(intervals - 1);
        let frac = (offset - j as f64).clamp(0.0, 1.0);
        for (node, w) in [(j, 1.0 - frac), (j + 1, frac)] {
            if w != 0.0 {
                weights.push((i, node, w));
            }
        }
    }

    let mut columns: BTreeMap<usize, usize> =
        weights.iter().map(|&(_, node, _)| (node, 0)).collect();
    for (c, col) in columns.values_mut().enumerate() {
        *col = c;
    }
    let mut basis = Array2::<f64>::zeros((n, columns.len()));
    for &(i, node, w) in &weights {
        basis[[i, columns[&node]]] = w;
    }
    let nodes = Array1::from_iter(columns.keys().map(|&j| t_min + j as f64 * dt));
    Some((basis, nodes))
}

/// Gaussian process with a time-domain kernel. Parameters for prefix `X`:
/// `XLOGSIG` (log10 sigma), `XLOGELL` (log10 days), `XLOGGAMP`, `XLOGP`
/// (log10 days) and the node spacing `XDT` (days).
#[derive(Debug, Clone)]
pub struct KernelNoise {
    name: String,
    prefix: String,
    kernel: TimeDomainKernel,
    scaling: ChromaticScaling,
}

impl KernelNoise {
    pub fn new(
        name: impl Into<String>,
        prefix: impl Into<String>,
        kernel: TimeDomainKernel,
        scaling: ChromaticScaling,
    ) -> Self {
        Self {
            name: name.into(),
            prefix: prefix.into(),
            kernel,
            scaling,
        }
    }

    /// Solar-wind density GP with a yearly quasi-periodic kernel.
    pub fn solar_wind(kernel: TimeDomainKernel) -> Self {
        Self::new("SWGPNoise", "SWGP", kernel, ChromaticScaling::SolarWind)
    }

    pub fn kernel(&self) -> TimeDomainKernel {
        self.kernel
    }

    fn param(&self, suffix: &str) -> String {
        format!("{}{}", self.prefix, suffix)
    }

    fn node_spacing(&self, params: &NoiseParameterState) -> Result<f64, NoiseError> {
        params.require_positive(&self.name, &self.param("DT"))
    }

    fn hyperparameters(&self, params: &NoiseParameterState) -> Result<KernelHyperparameters, NoiseError> {
        Ok(KernelHyperparameters {
            sigma: 10f64.powf(params.require(&self.name, &self.param("LOGSIG"))?),
            length_scale: 10f64.powf(params.require(&self.name, &self.param("LOGELL"))?),
            gamma_p: 10f64.powf(params.require(&self.name, &self.param("LOGGAMP"))?),
            period: 10f64.powf(params.require(&self.name, &self.param("LOGP"))?),
        })
    }

    fn raw_basis(
        &self,
        measurements: &MeasurementSet,
        params: &NoiseParameterState,
    ) -> Result<(Array2<f64>, Array1<f64>), NoiseError> {
        let dt = self.node_spacing(params)?;
        linear_interpolation_basis(&measurements.mjds(), dt).ok_or_else(|| {
            NoiseError::InvalidParameter {
                component: self.name.clone(),
                parameter: self.param("DT"),
                reason: format!(
                    "node spacing {dt:e} days is too small for a {:.1} day span",
                    measurements.span_seconds() / SECONDS_PER_DAY
                ),
            }
        })
    }
}

impl NoiseComponent for KernelNoise {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> NoiseKind {
        self.kernel.kind()
    }

    fn parameter_specs(&self) -> Vec<ParameterSpec> {
        let mut specs = vec![
            ParameterSpec::new(self.param("LOGSIG"), -7.0),
            ParameterSpec::new(self.param("LOGELL"), 2.0),
            ParameterSpec::frozen(self.param("LOGGAMP"), 0.0),
            ParameterSpec::frozen(self.param("LOGP"), 365.25f64.log10()),
            ParameterSpec::frozen(self.param("DT"), 30.0),
        ];
        specs.extend(self.scaling.parameter_specs());
        specs
    }

    fn as_correlated(&self) -> Option<&dyn CorrelatedNoise> {
        Some(self)
    }
}

impl CorrelatedNoise for KernelNoise {
    fn basis(
        &self,
        measurements: &MeasurementSet,
        params: &NoiseParameterState,
    ) -> Result<Array2<f64>, NoiseError> {
        let (basis, _) = self.raw_basis(measurements, params)?;
        let factors = self.scaling.timing_factors(&self.name, measurements, params)?;
        Ok(scale_rows(basis, &factors))
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
            Some(factors) => {
                let (basis, _) = self.raw_basis(measurements, params)?;
                Ok(scale_rows(basis, &factors))
            }
            None => Err(NoiseError::MissingCapability {
                component: self.name.clone(),
                capability: DesignMode::Dm,
            }),
        }
    }

    fn prior_covariance(
        &self,
        measurements: &MeasurementSet,
        params: &NoiseParameterState,
    ) -> Result<PriorCovariance, NoiseError> {
        let (_, nodes) = self.raw_basis(measurements, params)?;
        let hp = self.hyperparameters(params)?;
        Ok(self.kernel.covariance(&nodes, &hp))
    }
}
