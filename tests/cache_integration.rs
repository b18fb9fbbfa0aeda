use ndarray::{Array1, Array2};
use ptanoise::{
    CacheStats, CorrelatedNoise, DesignMode, EvaluationContext, FourierNoise, Measurement,
    MeasurementSet, NarrowbandResiduals, NoiseComponent, NoiseError, NoiseKind, NoiseModel,
    NoiseParameterState, ParameterSpec, PriorCovariance,
};
use rand::rngs::StdRng;
use rand::{RngExt, SeedableRng};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

fn synthetic_measurements(n: usize, seed: u64) -> MeasurementSet {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut mjd = 53000.0;
    let records = (0..n)
        .map(|_| {
            mjd += rng.random_range(5.0..25.0);
            let freq = if rng.random_range(0.0..1.0) < 0.5 { 1400.0 } else { 820.0 };
            Measurement::new(mjd, freq, rng.random_range(0.5..2.0)).with_dm(21.3, 2e-4)
        })
        .collect();
    MeasurementSet::new(records).expect("synthetic records are valid")
}

/// Diagonal-prior component that counts how often its basis is built.
#[derive(Debug)]
struct CountingNoise {
    builds: Arc<AtomicUsize>,
}

impl NoiseComponent for CountingNoise {
    fn name(&self) -> &str {
        "CountingNoise"
    }

    fn kind(&self) -> NoiseKind {
        NoiseKind::CorrelatedDiagonal
    }

    fn parameter_specs(&self) -> Vec<ParameterSpec> {
        vec![ParameterSpec::new("CNTVAR", 1e-12)]
    }

    fn as_correlated(&self) -> Option<&dyn CorrelatedNoise> {
        Some(self)
    }
}

impl CorrelatedNoise for CountingNoise {
    fn basis(
        &self,
        measurements: &MeasurementSet,
        _params: &NoiseParameterState,
    ) -> Result<Array2<f64>, NoiseError> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        Ok(Array2::ones((measurements.len(), 1)))
    }

    fn prior_covariance(
        &self,
        _measurements: &MeasurementSet,
        params: &NoiseParameterState,
    ) -> Result<PriorCovariance, NoiseError> {
        let var = params.require("CountingNoise", "CNTVAR")?;
        Ok(PriorCovariance::Diagonal(Array1::from_elem(1, var)))
    }
}

fn counting_model() -> (NoiseModel, Arc<AtomicUsize>) {
    let builds = Arc::new(AtomicUsize::new(0));
    let mut model = NoiseModel::new();
    model
        .add_component(Box::new(CountingNoise {
            builds: Arc::clone(&builds),
        }))
        .unwrap();
    model
        .add_component(Box::new(FourierNoise::red_noise().with_default_harmonics(2)))
        .unwrap();
    (model, builds)
}

#[test]
fn timing_parameter_changes_hit_the_cache() {
    let ms = synthetic_measurements(50, 1);
    let (mut model, builds) = counting_model();
    let mut ctx = EvaluationContext::new();

    let first = ctx.noise_system(&model, &ms, DesignMode::Timing).unwrap();
    model.set_timing_parameter("F0", 173.687946);
    model.set_timing_parameter("RAJ", 4.87);
    let second = ctx.noise_system(&model, &ms, DesignMode::Timing).unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(builds.load(Ordering::SeqCst), 1);
    assert_eq!(
        ctx.cache_stats(),
        CacheStats {
            hits: 1,
            misses: 1,
            evictions: 0
        }
    );
}

#[test]
fn noise_parameter_change_forces_a_rebuild() {
    let ms = synthetic_measurements(50, 2);
    let (mut model, builds) = counting_model();
    let mut ctx = EvaluationContext::new();

    let before = ctx.noise_system(&model, &ms, DesignMode::Timing).unwrap();
    assert_eq!(before.design().ncols(), 5);
    model.set_parameter("TNREDC", 3.0).unwrap();
    let after = ctx.noise_system(&model, &ms, DesignMode::Timing).unwrap();

    assert_eq!(builds.load(Ordering::SeqCst), 2);
    assert_eq!(after.design().ncols(), 7);
    assert_eq!(after.columns().range_of("PLRedNoise"), Some(1..7));
    assert_eq!(ctx.cache_stats().evictions, 1);
    assert_eq!(ctx.cache().len(), 1);

    // setting a value back to what it was is still a distinct state from the
    // cached one, and must rebuild again
    model.set_parameter("TNREDC", 2.0).unwrap();
    let back = ctx.noise_system(&model, &ms, DesignMode::Timing).unwrap();
    assert_eq!(back.design(), before.design());
    assert_eq!(builds.load(Ordering::SeqCst), 3);
}

#[test]
fn amplitude_change_is_seen_even_at_the_last_bit() {
    let ms = synthetic_measurements(30, 3);
    let (mut model, _) = counting_model();
    let mut ctx = EvaluationContext::new();
    let amp = model.parameters().value("TNREDAMP").unwrap();
    let a = ctx.noise_system(&model, &ms, DesignMode::Timing).unwrap();
    model
        .set_parameter("TNREDAMP", f64::from_bits(amp.to_bits() + 1))
        .unwrap();
    let b = ctx.noise_system(&model, &ms, DesignMode::Timing).unwrap();
    assert!(!Arc::ptr_eq(&a, &b));
    assert_eq!(ctx.cache_stats().misses, 2);
}

#[test]
fn identical_content_is_a_different_measurement_set() {
    let ms = synthetic_measurements(20, 4);
    let copy = MeasurementSet::new(ms.records().to_vec()).unwrap();
    let shared = ms.clone();
    let (model, builds) = counting_model();
    let mut ctx = EvaluationContext::new();

    ctx.noise_system(&model, &ms, DesignMode::Timing).unwrap();
    ctx.noise_system(&model, &shared, DesignMode::Timing).unwrap();
    assert_eq!(builds.load(Ordering::SeqCst), 1);
    ctx.noise_system(&model, &copy, DesignMode::Timing).unwrap();
    assert_eq!(builds.load(Ordering::SeqCst), 2);
    assert_eq!(ctx.cache().len(), 2);
}

#[test]
fn modes_occupy_separate_slots() {
    let ms = synthetic_measurements(20, 5);
    let (model, builds) = counting_model();
    let mut ctx = EvaluationContext::new();
    let timing = ctx.noise_system(&model, &ms, DesignMode::Timing).unwrap();
    let wideband = ctx.noise_system(&model, &ms, DesignMode::Wideband).unwrap();
    assert_eq!(timing.rows(), 20);
    assert_eq!(wideband.rows(), 40);
    ctx.noise_system(&model, &ms, DesignMode::Timing).unwrap();
    assert_eq!(builds.load(Ordering::SeqCst), 2);
    assert_eq!(ctx.cache_stats().hits, 1);
}

#[test]
fn failed_build_caches_nothing() {
    let ms = synthetic_measurements(40, 6);
    let (mut model, builds) = counting_model();
    let mut ctx = EvaluationContext::new();
    ctx.noise_system(&model, &ms, DesignMode::Timing).unwrap();

    model.set_parameter("CNTVAR", -1e-12).unwrap();
    let err = ctx.noise_system(&model, &ms, DesignMode::Timing).unwrap_err();
    assert!(matches!(err, NoiseError::NotPositiveDefinite { ref block, .. } if block == "CountingNoise"));
    assert!(err.is_recoverable());
    assert!(ctx.cache().is_empty());

    // asking again at the same bad point retries the build
    assert!(ctx.noise_system(&model, &ms, DesignMode::Timing).is_err());
    assert_eq!(builds.load(Ordering::SeqCst), 3);

    model.set_parameter("CNTVAR", 1e-12).unwrap();
    ctx.noise_system(&model, &ms, DesignMode::Timing).unwrap();
    assert_eq!(ctx.cache().len(), 1);
}

#[test]
fn contexts_do_not_share_state() {
    let ms = synthetic_measurements(20, 7);
    let (model, builds) = counting_model();
    let mut a = EvaluationContext::new();
    let mut b = EvaluationContext::new();
    a.noise_system(&model, &ms, DesignMode::Timing).unwrap();
    b.noise_system(&model, &ms, DesignMode::Timing).unwrap();
    assert_eq!(builds.load(Ordering::SeqCst), 2);
    assert_eq!(a.cache_stats().misses, 1);
    assert_eq!(b.cache_stats().misses, 1);
}

#[test]
fn residual_consumers_reuse_the_cached_system() {
    let ms = synthetic_measurements(30, 8);
    let (model, builds) = counting_model();
    let mut ctx = EvaluationContext::new();
    let r = Array1::from_shape_fn(30, |i| 1e-6 * (i as f64 * 0.4).cos());
    let a = NarrowbandResiduals::new(&mut ctx, &model, &ms, r.clone()).unwrap();
    let b = NarrowbandResiduals::new(&mut ctx, &model, &ms, r).unwrap();
    assert_eq!(a.chi2().unwrap(), b.chi2().unwrap());
    assert_eq!(builds.load(Ordering::SeqCst), 1);
}

#[test]
fn per_iteration_measurement_sets_do_not_accumulate() {
    let (model, builds) = counting_model();
    let mut ctx = EvaluationContext::new();
    for seed in 0..50 {
        let ms = synthetic_measurements(15, 100 + seed);
        ctx.noise_system(&model, &ms, DesignMode::Timing).unwrap();
    }
    assert_eq!(builds.load(Ordering::SeqCst), 50);
    assert!(ctx.cache().len() <= 1);

    let kept = synthetic_measurements(15, 1);
    ctx.noise_system(&model, &kept, DesignMode::Timing).unwrap();
    ctx.noise_system(&model, &kept, DesignMode::Wideband).unwrap();
    assert_eq!(ctx.cache().len(), 2);
}
