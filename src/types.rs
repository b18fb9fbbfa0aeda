use serde::{Deserialize, Serialize};
use std::fmt;

/// Seconds per day, used to convert MJD epochs to Fourier phases.
pub const SECONDS_PER_DAY: f64 = 86_400.0;

/// Reference radio frequency for dispersive and chromatic scalings, in MHz.
pub const REFERENCE_FREQUENCY_MHZ: f64 = 1400.0;

/// Dispersion constant `K` in s MHz^2 cm^3 / pc: delay = K * DM / f^2.
pub const DM_CONST: f64 = 1.0 / 2.41e-4;

/// One year in seconds as used by the power-law spectrum normalization.
pub const FYR: f64 = 1.0 / 3.16e7;

/// Measurement channel a white-noise term or basis row belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Channel {
    /// Arrival-time channel (seconds).
    Timing,
    /// Wideband dispersion-measure channel (pc cm^-3).
    Dm,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Timing => write!(f, "timing"),
            Channel::Dm => write!(f, "dm"),
        }
    }
}

/// Which per-component basis variant the composer requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DesignMode {
    /// Plain timing basis, one row per measurement.
    Timing,
    /// DM-channel basis, one row per measurement.
    Dm,
    /// Timing rows followed by DM rows.
    Wideband,
}

impl DesignMode {
    /// Number of design rows for `n` measurements.
    pub fn rows_for(self, n: usize) -> usize {
        match self {
            DesignMode::Timing | DesignMode::Dm => n,
            DesignMode::Wideband => 2 * n,
        }
    }

    pub fn requires_dm_values(self) -> bool {
        !matches!(self, DesignMode::Timing)
    }
}

impl fmt::Display for DesignMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DesignMode::Timing => write!(f, "timing"),
            DesignMode::Dm => write!(f, "dm"),
            DesignMode::Wideband => write!(f, "wideband"),
        }
    }
}

/// Structure a component declares for its prior-covariance block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NoiseKind {
    /// Contributes only to the white-noise diagonal.
    Uncorrelated,
    /// Basis plus a diagonal prior block.
    CorrelatedDiagonal,
    /// Basis plus a dense prior block (time-correlated kernel).
    CorrelatedNonDiagonal,
}

impl NoiseKind {
    pub fn is_correlated(self) -> bool {
        !matches!(self, NoiseKind::Uncorrelated)
    }
}

pub fn default_pd_relative_epsilon() -> f64 {
    1e-12
}

pub fn default_symmetry_tolerance() -> f64 {
    1e-10
}

pub fn default_diagonal_shortcut() -> bool {
    true
}

/// Numerical policy for the covariance solver.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SolverOptions {
    /// A dense block is positive definite only if every squared Cholesky
    /// pivot exceeds `pd_relative_epsilon * A_ii` of its own row. Diagonal
    /// blocks only need positive entries.
    #[serde(default = "default_pd_relative_epsilon")]
    pub pd_relative_epsilon: f64,
    /// Allowed `|A_ij - A_ji|` relative to the block's largest entry.
    #[serde(default = "default_symmetry_tolerance")]
    pub symmetry_tolerance: f64,
    /// Use element-wise reciprocals for blocks declared diagonal.
    #[serde(default = "default_diagonal_shortcut")]
    pub diagonal_shortcut: bool,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            pd_relative_epsilon: default_pd_relative_epsilon(),
            symmetry_tolerance: default_symmetry_tolerance(),
            diagonal_shortcut: default_diagonal_shortcut(),
        }
    }
}

impl SolverOptions {
    /// Same policy with every block routed through the general Cholesky path.
    pub fn dense_only() -> Self {
        Self {
            diagonal_shortcut: false,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wideband_doubles_rows() {
        assert_eq!(DesignMode::Timing.rows_for(7), 7);
        assert_eq!(DesignMode::Dm.rows_for(7), 7);
        assert_eq!(DesignMode::Wideband.rows_for(7), 14);
    }

    #[test]
    fn solver_options_defaults_match_serde_defaults() {
        let opts = SolverOptions::default();
        assert_eq!(opts.pd_relative_epsilon, default_pd_relative_epsilon());
        assert_eq!(opts.symmetry_tolerance, default_symmetry_tolerance());
        assert!(opts.diagonal_shortcut);
        assert!(!SolverOptions::dense_only().diagonal_shortcut);
    }
}
