//! Global design matrix and block-structured prior covariance.
//!
//! Both are assembled from the registry in registry order. A component that
//! lacks the basis variant for the requested mode contributes a zero-width
//! block, so its column range is simply absent.

use crate::error::NoiseError;
use crate::measurement::MeasurementSet;
use crate::noise::{PriorCovariance, check_shape};
use crate::params::NoiseParameterState;
use crate::registry::NoiseRegistry;
use crate::types::{Channel, DesignMode};
use ndarray::{Array1, Array2, s};
use std::ops::Range;

/// Named, contiguous, non-overlapping column ranges in registry order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnIndex {
    ranges: Vec<(String, Range<usize>)>,
}

impl ColumnIndex {
    fn push(&mut self, name: &str, width: usize) {
        let start = self.total_columns();
        self.ranges.push((name.to_string(), start..start + width));
    }

    pub fn total_columns(&self) -> usize {
        self.ranges.last().map_or(0, |(_, r)| r.end)
    }

    pub fn range_of(&self, name: &str) -> Option<Range<usize>> {
        self.ranges
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, r)| r.clone())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Range<usize>)> {
        self.ranges.iter().map(|(n, r)| (n.as_str(), r.clone()))
    }

    /// `(component, (offset, size))` per block.
    pub fn dimensions(&self) -> Vec<(String, (usize, usize))> {
        self.ranges
            .iter()
            .map(|(n, r)| (n.clone(), (r.start, r.len())))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct GlobalDesign {
    pub mode: DesignMode,
    pub matrix: Array2<f64>,
    pub columns: ColumnIndex,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CovarianceBlock {
    pub name: String,
    pub offset: usize,
    pub prior: PriorCovariance,
}

impl CovarianceBlock {
    pub fn dim(&self) -> usize {
        self.prior.dim()
    }

    pub fn range(&self) -> Range<usize> {
        self.offset..self.offset + self.dim()
    }
}

/// Block-diagonal prior covariance. Cross-component entries are zero and are
/// never stored.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BlockCovariance {
    blocks: Vec<CovarianceBlock>,
}

impl BlockCovariance {
    /// Lay out named priors back to back, in the given order.
    pub fn new(priors: Vec<(String, PriorCovariance)>) -> Self {
        let mut offset = 0;
        let blocks = priors
            .into_iter()
            .map(|(name, prior)| {
                let block = CovarianceBlock {
                    name,
                    offset,
                    prior,
                };
                offset += block.dim();
                block
            })
            .collect();
        Self { blocks }
    }

    pub fn blocks(&self) -> &[CovarianceBlock] {
        &self.blocks
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn dim(&self) -> usize {
        self.blocks.last().map_or(0, |b| b.offset + b.dim())
    }

    pub fn block(&self, name: &str) -> Option<&CovarianceBlock> {
        self.blocks.iter().find(|b| b.name == name)
    }

    /// Dense `rank x rank` view, for diagnostics and small problems.
    pub fn to_dense(&self) -> Array2<f64> {
        let dim = self.dim();
        let mut out = Array2::<f64>::zeros((dim, dim));
        for block in &self.blocks {
            let r = block.range();
            out.slice_mut(s![r.clone(), r]).assign(&block.prior.to_dense());
        }
        out
    }

    /// Prior variance per column (block diagonals, concatenated).
    pub fn diagonal(&self) -> Array1<f64> {
        let mut out = Array1::<f64>::zeros(self.dim());
        for block in &self.blocks {
            out.slice_mut(s![block.range()]).assign(&block.prior.diagonal());
        }
        out
    }
}

pub fn build_global_design(
    registry: &NoiseRegistry,
    measurements: &MeasurementSet,
    params: &NoiseParameterState,
    mode: DesignMode,
) -> Result<GlobalDesign, NoiseError> {
    let rows = mode.rows_for(measurements.len());
    let mut columns = ColumnIndex::default();
    let mut parts = Vec::new();
    for component in registry.correlated() {
        if !component.supports(mode) {
            continue;
        }
        let basis = component.basis_for(mode, measurements, params)?;
        check_shape(component.name(), "basis", (rows, basis.ncols()), basis.dim())?;
        columns.push(component.name(), basis.ncols());
        parts.push(basis);
    }

    let mut matrix = Array2::<f64>::zeros((rows, columns.total_columns()));
    for ((_, range), part) in columns.iter().zip(parts.iter()) {
        matrix.slice_mut(s![.., range]).assign(part);
    }
    log::debug!(
        "[noise composer] {mode} design for {}: {} x {} over {} blocks",
        measurements.id(),
        matrix.nrows(),
        matrix.ncols(),
        columns.len()
    );
    Ok(GlobalDesign {
        mode,
        matrix,
        columns,
    })
}

/// Prior blocks for the same components, in the same order, that
/// [`build_global_design`] places for `mode`.
pub fn build_global_covariance(
    registry: &NoiseRegistry,
    measurements: &MeasurementSet,
    params: &NoiseParameterState,
    mode: DesignMode,
) -> Result<BlockCovariance, NoiseError> {
    let mut priors = Vec::new();
    for component in registry.correlated() {
        if !component.supports(mode) {
            continue;
        }
        let prior = component.prior_covariance(measurements, params)?;
        let (r, c) = prior.shape();
        check_shape(component.name(), "prior covariance", (r, r), (r, c))?;
        priors.push((component.name().to_string(), prior));
    }
    Ok(BlockCovariance::new(priors))
}

/// Full white-noise variance of one channel, falling back to the raw
/// measurement variance when no uncorrelated component owns the channel.
pub fn channel_variance(
    registry: &NoiseRegistry,
    measurements: &MeasurementSet,
    params: &NoiseParameterState,
    channel: Channel,
) -> Result<Array1<f64>, NoiseError> {
    let n = measurements.len();
    let (variance, source) = match registry.white_noise_for(channel) {
        Some(white) => (white.diagonal_variance(measurements, params)?, white.name()),
        None => {
            let sigma = match channel {
                Channel::Timing => measurements.uncertainties_seconds(),
                Channel::Dm => measurements.dm_uncertainties("white noise")?,
            };
            (sigma.mapv(|s| s * s), "white noise")
        }
    };
    if variance.len() != n {
        return Err(NoiseError::ShapeMismatch {
            component: source.to_string(),
            what: "white-noise variance",
            expected: (n, 1),
            actual: (variance.len(), 1),
        });
    }
    if variance.iter().any(|v| !v.is_finite() || *v < 0.0) {
        return Err(NoiseError::NonFinite {
            block: format!("{channel} white noise from '{source}'"),
        });
    }
    Ok(variance)
}

/// White-noise diagonal with the row layout of `mode`.
pub fn white_noise_diagonal(
    registry: &NoiseRegistry,
    measurements: &MeasurementSet,
    params: &NoiseParameterState,
    mode: DesignMode,
) -> Result<Array1<f64>, NoiseError> {
    match mode {
        DesignMode::Timing => channel_variance(registry, measurements, params, Channel::Timing),
        DesignMode::Dm => channel_variance(registry, measurements, params, Channel::Dm),
        DesignMode::Wideband => {
            let timing = channel_variance(registry, measurements, params, Channel::Timing)?;
            let dm = channel_variance(registry, measurements, params, Channel::Dm)?;
            Ok(timing.iter().chain(dm.iter()).copied().collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measurement::{BackendSelector, Measurement};
    use crate::noise::{FourierNoise, NoiseComponent, ScaleToaError};

    fn setup() -> (NoiseRegistry, NoiseParameterState, MeasurementSet) {
        let mut reg = NoiseRegistry::new();
        let mut params = NoiseParameterState::new();
        for comp in [
            Box::new(FourierNoise::red_noise().with_default_harmonics(3)) as Box<dyn NoiseComponent>,
            Box::new(FourierNoise::dm_noise().with_default_harmonics(2)),
            Box::new(ScaleToaError::new().with_efac("EFAC1", BackendSelector::All)),
        ] {
            params.register(comp.name(), &comp.parameter_specs()).unwrap();
            reg.add(comp).unwrap();
        }
        let ms = MeasurementSet::new(
            (0..20)
                .map(|i| {
                    Measurement::new(55000.0 + 15.0 * i as f64, 800.0 + 40.0 * i as f64, 1.0)
                        .with_dm(15.9, 1e-4)
                })
                .collect(),
        )
        .unwrap();
        (reg, params, ms)
    }

    #[test]
    fn columns_follow_registry_order() {
        let (reg, params, ms) = setup();
        let design = build_global_design(&reg, &ms, &params, DesignMode::Timing).unwrap();
        assert_eq!(design.matrix.dim(), (20, 10));
        assert_eq!(design.columns.range_of("PLRedNoise"), Some(0..6));
        assert_eq!(design.columns.range_of("PLDMNoise"), Some(6..10));
        assert_eq!(design.columns.range_of("ScaleToaError"), None);

        let cov = build_global_covariance(&reg, &ms, &params, DesignMode::Timing).unwrap();
        let offsets: Vec<_> = cov.blocks().iter().map(|b| (b.offset, b.dim())).collect();
        assert_eq!(offsets, vec![(0, 6), (6, 4)]);
        assert_eq!(cov.dim(), design.matrix.ncols());
    }

    #[test]
    fn dm_mode_skips_components_without_dm_channel() {
        let (reg, params, ms) = setup();
        let design = build_global_design(&reg, &ms, &params, DesignMode::Dm).unwrap();
        assert_eq!(design.columns.dimensions(), vec![("PLDMNoise".to_string(), (0, 4))]);
        let cov = build_global_covariance(&reg, &ms, &params, DesignMode::Dm).unwrap();
        assert_eq!(cov.len(), 1);
    }

    #[test]
    fn wideband_white_noise_stacks_channels() {
        let (reg, mut params, ms) = setup();
        params.set_value("EFAC1", 2.0).unwrap();
        let white = white_noise_diagonal(&reg, &ms, &params, DesignMode::Wideband).unwrap();
        assert_eq!(white.len(), 40);
        assert!((white[0] - 4e-12).abs() < 1e-24);
        // no ScaleDmError: raw DM variance
        assert!((white[20] - 1e-8).abs() < 1e-20);
    }

    #[test]
    fn empty_registry_gives_empty_structures() {
        let reg = NoiseRegistry::new();
        let params = NoiseParameterState::new();
        let (_, _, ms) = setup();
        let design = build_global_design(&reg, &ms, &params, DesignMode::Wideband).unwrap();
        assert_eq!(design.matrix.dim(), (40, 0));
        assert!(build_global_covariance(&reg, &ms, &params, DesignMode::Timing)
            .unwrap()
            .is_empty());
    }
}
