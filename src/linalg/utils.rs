use ndarray::{ArrayBase, Data, Ix1};

/// Compensated summation for long runs of log terms.
#[derive(Default, Clone, Copy)]
pub(crate) struct KahanSum {
    sum: f64,
    c: f64,
}

impl KahanSum {
    pub(crate) fn add(&mut self, value: f64) {
        let y = value - self.c;
        let t = self.sum + y;
        self.c = (t - self.sum) - y;
        self.sum = t;
    }

    pub(crate) fn sum(self) -> f64 {
        self.sum
    }
}

/// `sum_i ln(values_i)` with compensated accumulation.
pub(crate) fn sum_ln<S: Data<Elem = f64>>(values: &ArrayBase<S, Ix1>) -> f64 {
    let mut acc = KahanSum::default();
    for &v in values.iter() {
        acc.add(v.ln());
    }
    acc.sum()
}

pub(crate) fn max_abs<S: Data<Elem = f64>>(values: &ArrayBase<S, Ix1>) -> f64 {
    values.iter().copied().map(f64::abs).fold(0.0, f64::max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn kahan_sum_keeps_small_terms() {
        let mut acc = KahanSum::default();
        acc.add(1.0);
        for _ in 0..10_000 {
            acc.add(1e-16);
        }
        assert!((acc.sum() - (1.0 + 1e-12)).abs() < 1e-15);
    }

    #[test]
    fn sum_ln_matches_log_of_product() {
        let v = array![2.0, 3.0, 0.5];
        assert!((sum_ln(&v) - 3.0f64.ln()).abs() < 1e-15);
    }
}
