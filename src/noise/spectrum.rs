//! Fourier bases and power-law spectra.

use crate::types::FYR;
use ndarray::{Array1, Array2};
use std::f64::consts::PI;

/// Sampling frequencies of a Fourier GP and the bandwidth each one represents.
#[derive(Debug, Clone, PartialEq)]
pub struct FourierFrequencies {
    /// Frequencies in Hz, ascending.
    pub frequencies: Array1<f64>,
    /// Bandwidth `df` of each frequency bin in Hz.
    pub bin_widths: Array1<f64>,
}

impl FourierFrequencies {
    pub fn len(&self) -> usize {
        self.frequencies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frequencies.is_empty()
    }
}

/// Log-spaced low-frequency modes below `1 / T`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LogModes {
    pub count: usize,
    pub factor: f64,
}

/// `f_j = j / T` for `j = 1..=nmodes`, optionally preceded by log-spaced modes
/// `(1/T) * factor^-(count - k)` for `k = 0..count`.
///
/// Linear bins all have width `1/T`. Log bins take the gap to the previous
/// frequency (to zero for the lowest one).
pub fn rednoise_frequencies(
    span_seconds: f64,
    nmodes: usize,
    log_modes: Option<LogModes>,
) -> FourierFrequencies {
    let f0 = 1.0 / span_seconds;
    let nlog = log_modes.map(|l| l.count).unwrap_or(0);
    let mut frequencies = Vec::with_capacity(nlog + nmodes);
    let mut bin_widths = Vec::with_capacity(nlog + nmodes);

    if let Some(LogModes { count, factor }) = log_modes {
        let mut previous = 0.0;
        for k in 0..count {
            let f = f0 * factor.powi(-((count - k) as i32));
            frequencies.push(f);
            bin_widths.push(f - previous);
            previous = f;
        }
    }
    for j in 1..=nmodes {
        frequencies.push(j as f64 * f0);
        bin_widths.push(f0);
    }

    FourierFrequencies {
        frequencies: Array1::from_vec(frequencies),
        bin_widths: Array1::from_vec(bin_widths),
    }
}

/// Fourier design matrix with interleaved columns `sin(2 pi f t)`, `cos(2 pi f t)`.
pub fn fourier_design_matrix(times_seconds: &Array1<f64>, frequencies: &Array1<f64>) -> Array2<f64> {
    let n = times_seconds.len();
    let k = frequencies.len();
    let mut out = Array2::<f64>::zeros((n, 2 * k));
    for (i, &t) in times_seconds.iter().enumerate() {
        for (j, &f) in frequencies.iter().enumerate() {
            let (sin, cos) = (2.0 * PI * f * t).sin_cos();
            out[[i, 2 * j]] = sin;
            out[[i, 2 * j + 1]] = cos;
        }
    }
    out
}

/// One-sided power-law PSD `A^2 / (12 pi^2) * f_yr^(gamma - 3) * f^-gamma`, in s^3.
#[inline]
pub fn powerlaw(frequency: f64, amplitude: f64, gamma: f64) -> f64 {
    amplitude * amplitude / (12.0 * PI * PI) * FYR.powf(gamma - 3.0) * frequency.powf(-gamma)
}

/// Prior variances for the interleaved sin/cos columns, `psd(f) * df` repeated twice.
pub fn powerlaw_weights(freqs: &FourierFrequencies, amplitude: f64, gamma: f64) -> Array1<f64> {
    let mut out = Array1::<f64>::zeros(2 * freqs.len());
    for (j, (&f, &df)) in freqs
        .frequencies
        .iter()
        .zip(freqs.bin_widths.iter())
        .enumerate()
    {
        let w = powerlaw(f, amplitude, gamma) * df;
        out[2 * j] = w;
        out[2 * j + 1] = w;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn linear_frequencies_are_harmonics_of_span() {
        let freqs = rednoise_frequencies(100.0, 4, None);
        let expected = array![0.01, 0.02, 0.03, 0.04];
        for (got, want) in freqs.frequencies.iter().zip(expected.iter()) {
            assert_relative_eq!(*got, *want, max_relative = 1e-15);
        }
        assert!(freqs.bin_widths.iter().all(|&df| df == 1.0 / 100.0));
    }

    #[test]
    fn log_modes_sit_below_the_fundamental() {
        let freqs = rednoise_frequencies(100.0, 2, Some(LogModes { count: 2, factor: 2.0 }));
        assert_eq!(freqs.len(), 4);
        assert_relative_eq!(freqs.frequencies[0], 0.0025, max_relative = 1e-15);
        assert_relative_eq!(freqs.frequencies[1], 0.005, max_relative = 1e-15);
        assert_relative_eq!(freqs.bin_widths[0], 0.0025, max_relative = 1e-15);
        assert_relative_eq!(freqs.bin_widths[1], 0.0025, max_relative = 1e-15);
        assert_eq!(freqs.frequencies[2], 0.01);
    }

    #[test]
    fn fourier_columns_interleave_sin_and_cos() {
        let t = array![0.0, 0.25];
        let f = array![1.0];
        let m = fourier_design_matrix(&t, &f);
        assert_eq!(m.dim(), (2, 2));
        assert_relative_eq!(m[[0, 1]], 1.0);
        assert_relative_eq!(m[[1, 0]], 1.0, max_relative = 1e-15);
        assert!(m[[1, 1]].abs() < 1e-15);
    }

    #[test]
    fn powerlaw_falls_with_frequency_for_positive_gamma() {
        let a = 10f64.powf(-14.0);
        assert!(powerlaw(1e-8, a, 4.33) > powerlaw(1e-7, a, 4.33));
        assert_relative_eq!(
            powerlaw(FYR, 1.0, 13.0 / 3.0),
            1.0 / (12.0 * PI * PI) / (FYR * FYR * FYR),
            max_relative = 1e-12
        );
    }
}
