//! Memoized noise systems, scoped to an evaluation context.
//!
//! A slot is keyed by `(measurement-set identity, design mode)` and holds at
//! most one entry. Each entry is stamped with its full key, including the
//! parameter fingerprint; a lookup whose fingerprint differs evicts the entry
//! and rebuilds. A failed build leaves the slot empty. Slots whose
//! measurement set has been dropped are purged on the next lookup.

use crate::composer::{
    BlockCovariance, ColumnIndex, build_global_covariance, build_global_design,
    white_noise_diagonal,
};
use crate::error::NoiseError;
use crate::measurement::{Measurement, MeasurementSet, MeasurementSetId};
use crate::model::NoiseModel;
use crate::params::{NoiseParameterState, ParameterFingerprint};
use crate::registry::NoiseRegistry;
use crate::solver::{CovarianceFactorization, GlsSystem};
use crate::types::{DesignMode, SolverOptions};
use ndarray::{Array1, Array2};
use std::collections::HashMap;
use std::sync::{Arc, Weak};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub measurements: MeasurementSetId,
    pub mode: DesignMode,
    pub fingerprint: ParameterFingerprint,
}

/// Everything a fitter or likelihood needs for one `(measurements, mode,
/// parameters)` point. Read-only once built.
#[derive(Debug)]
pub struct NoiseSystem {
    key: CacheKey,
    columns: ColumnIndex,
    covariance: BlockCovariance,
    gls: GlsSystem,
}

impl NoiseSystem {
    pub fn build(
        registry: &NoiseRegistry,
        measurements: &MeasurementSet,
        params: &NoiseParameterState,
        mode: DesignMode,
        options: &SolverOptions,
    ) -> Result<Self, NoiseError> {
        let key = CacheKey {
            measurements: measurements.id(),
            mode,
            fingerprint: registry.fingerprint(params),
        };
        let design = build_global_design(registry, measurements, params, mode)?;
        let covariance = build_global_covariance(registry, measurements, params, mode)?;
        check_block_layout(&design.columns, &covariance)?;
        let white = white_noise_diagonal(registry, measurements, params, mode)?;
        let prior = CovarianceFactorization::factorize(&covariance, options)?;
        let gls = GlsSystem::new(design.matrix, white, prior, options)?;
        Ok(Self {
            key,
            columns: design.columns,
            covariance,
            gls,
        })
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    pub fn mode(&self) -> DesignMode {
        self.key.mode
    }

    pub fn columns(&self) -> &ColumnIndex {
        &self.columns
    }

    pub fn covariance(&self) -> &BlockCovariance {
        &self.covariance
    }

    pub fn design(&self) -> &Array2<f64> {
        self.gls.design()
    }

    pub fn white_noise(&self) -> &Array1<f64> {
        self.gls.white_noise()
    }

    pub fn prior(&self) -> &CovarianceFactorization {
        self.gls.prior()
    }

    pub fn gls(&self) -> &GlsSystem {
        &self.gls
    }

    pub fn rows(&self) -> usize {
        self.gls.rows()
    }

    pub fn rank(&self) -> usize {
        self.gls.rank()
    }
}

/// Every prior block must sit exactly on its component's column range.
fn check_block_layout(
    columns: &ColumnIndex,
    covariance: &BlockCovariance,
) -> Result<(), NoiseError> {
    for ((name, range), block) in columns.iter().zip(covariance.blocks()) {
        if name != block.name || range != block.range() {
            return Err(NoiseError::ShapeMismatch {
                component: name.to_string(),
                what: "prior covariance",
                expected: (range.len(), range.len()),
                actual: block.prior.shape(),
            });
        }
    }
    if columns.len() != covariance.len() {
        return Err(NoiseError::CacheConsistency(format!(
            "{} column blocks but {} covariance blocks",
            columns.len(),
            covariance.len()
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

/// A cached system plus a weak handle on the records it was built from.
#[derive(Debug)]
struct CacheSlot {
    owner: Weak<[Measurement]>,
    system: Arc<NoiseSystem>,
}

#[derive(Debug, Default)]
pub struct NoiseCache {
    slots: HashMap<(MeasurementSetId, DesignMode), CacheSlot>,
    stats: CacheStats,
}

impl NoiseCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn clear(&mut self) {
        self.stats.evictions += self.slots.len() as u64;
        self.slots.clear();
    }

    /// Drop every slot of one measurement set; returns how many were dropped.
    pub fn invalidate(&mut self, measurements: MeasurementSetId) -> usize {
        let before = self.slots.len();
        self.slots.retain(|(id, _), _| *id != measurements);
        let dropped = before - self.slots.len();
        self.stats.evictions += dropped as u64;
        dropped
    }

    /// Drop slots whose measurement set no longer exists; returns how many.
    pub fn purge_dropped(&mut self) -> usize {
        let before = self.slots.len();
        self.slots.retain(|_, slot| slot.owner.strong_count() > 0);
        let dropped = before - self.slots.len();
        if dropped > 0 {
            self.stats.evictions += dropped as u64;
            log::debug!("[noise cache] purged {dropped} slot(s) of dropped measurement sets");
        }
        dropped
    }

    /// Return the entry for `key` or build, store and return a new one.
    /// `measurements` is the set the entry belongs to; the slot lives only as
    /// long as that set (or a clone of it) does.
    pub fn get_or_build<F>(
        &mut self,
        measurements: &MeasurementSet,
        key: CacheKey,
        builder: F,
    ) -> Result<Arc<NoiseSystem>, NoiseError>
    where
        F: FnOnce() -> Result<NoiseSystem, NoiseError>,
    {
        self.purge_dropped();
        let rows = key.mode.rows_for(measurements.len());
        let slot = (key.measurements, key.mode);
        if let Some(entry) = self.slots.get(&slot)
            && entry.system.key.fingerprint == key.fingerprint
        {
            let entry = Arc::clone(&entry.system);
            if let Err(err) = verify_entry(&entry, &key, rows) {
                self.slots.remove(&slot);
                return Err(err);
            }
            self.stats.hits += 1;
            log::debug!("[noise cache] hit for {} ({})", key.measurements, key.mode);
            return Ok(entry);
        }

        if self.slots.remove(&slot).is_some() {
            self.stats.evictions += 1;
            log::debug!(
                "[noise cache] evicted stale entry for {} ({})",
                key.measurements,
                key.mode
            );
        }
        self.stats.misses += 1;
        log::debug!("[noise cache] miss for {} ({})", key.measurements, key.mode);

        let system = builder()?;
        verify_entry(&system, &key, rows)?;
        let system = Arc::new(system);
        self.slots.insert(
            slot,
            CacheSlot {
                owner: measurements.downgrade(),
                system: Arc::clone(&system),
            },
        );
        Ok(system)
    }
}

fn verify_entry(system: &NoiseSystem, key: &CacheKey, rows: usize) -> Result<(), NoiseError> {
    if system.key != *key {
        return Err(NoiseError::CacheConsistency(format!(
            "entry built for {} ({}) served for {} ({}) or under another fingerprint",
            system.key.measurements, system.key.mode, key.measurements, key.mode
        )));
    }
    if system.rows() != rows {
        return Err(NoiseError::CacheConsistency(format!(
            "entry for {} has {} rows, expected {}",
            key.measurements,
            system.rows(),
            rows
        )));
    }
    Ok(())
}

/// Owns a cache and the solver policy for one fit or sampling chain. Contexts
/// are never shared; parallel evaluations each hold their own.
#[derive(Debug, Default)]
pub struct EvaluationContext {
    cache: NoiseCache,
    options: SolverOptions,
}

impl EvaluationContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: SolverOptions) -> Self {
        Self {
            cache: NoiseCache::new(),
            options,
        }
    }

    pub fn options(&self) -> &SolverOptions {
        &self.options
    }

    pub fn cache(&self) -> &NoiseCache {
        &self.cache
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }

    /// The noise system for `model` at its current parameter values.
    pub fn noise_system(
        &mut self,
        model: &NoiseModel,
        measurements: &MeasurementSet,
        mode: DesignMode,
    ) -> Result<Arc<NoiseSystem>, NoiseError> {
        let key = CacheKey {
            measurements: measurements.id(),
            mode,
            fingerprint: model.fingerprint(),
        };
        let options = self.options;
        self.cache
            .get_or_build(measurements, key, || {
                NoiseSystem::build(
                    model.registry(),
                    measurements,
                    model.parameters(),
                    mode,
                    &options,
                )
            })
    }
}
