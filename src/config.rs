//! Protocol configuration.
//!
//! Every parameter that affects the verdict is an explicit field. Only the
//! significance thresholds and the strict sanity flag have defaults; the rest
//! must be supplied so that a run can be pre-registered and audited.

use crate::error::{FingerprintError, Result};
use crate::helpers::{DEFAULT_CANDIDATE_ALPHA, DEFAULT_STRONG_ALPHA};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// How residuals are decorrelated before fitting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WhiteningMode {
    /// Raw `observed - model` residuals.
    None,
    /// Residuals divided by the per-multipole uncertainty.
    Diagonal,
    /// Residuals whitened through the Cholesky factor of the covariance.
    Covariance,
}

impl WhiteningMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            WhiteningMode::None => "none",
            WhiteningMode::Diagonal => "diagonal",
            WhiteningMode::Covariance => "covariance",
        }
    }
}

impl std::fmt::Display for WhiteningMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// p-value boundaries of the three-level verdict.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Thresholds {
    /// p below this is at least CANDIDATE.
    pub candidate: f64,
    /// p below this is STRONG.
    pub strong: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            candidate: DEFAULT_CANDIDATE_ALPHA,
            strong: DEFAULT_STRONG_ALPHA,
        }
    }
}

impl Thresholds {
    pub fn validate(&self) -> Result<()> {
        let in_unit = |a: f64| a > 0.0 && a < 1.0;
        if !in_unit(self.candidate) || !in_unit(self.strong) {
            return Err(FingerprintError::InvalidConfig(format!(
                "thresholds must lie in (0, 1): candidate={}, strong={}",
                self.candidate, self.strong
            )));
        }
        if self.strong >= self.candidate {
            return Err(FingerprintError::InvalidConfig(format!(
                "strong threshold {} must be below candidate threshold {}",
                self.strong, self.candidate
            )));
        }
        Ok(())
    }
}

/// The pre-registered candidate periods.
///
/// Sorted, duplicate-free and fixed once built: there is no API to add or
/// remove a period after construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Vec<u32>", into = "Vec<u32>")]
pub struct PeriodSet(Vec<u32>);

impl PeriodSet {
    /// Smallest admissible period; at P <= 2 the sine column vanishes on an
    /// integer grid.
    pub const MIN_PERIOD: u32 = 3;

    pub fn new(periods: impl IntoIterator<Item = u32>) -> Result<Self> {
        let mut periods: Vec<u32> = periods.into_iter().collect();
        if periods.is_empty() {
            return Err(FingerprintError::InvalidConfig(
                "candidate period set is empty".into(),
            ));
        }
        periods.sort_unstable();
        if let Some(w) = periods.windows(2).find(|w| w[0] == w[1]) {
            return Err(FingerprintError::InvalidConfig(format!(
                "duplicate candidate period {}",
                w[0]
            )));
        }
        if periods[0] < Self::MIN_PERIOD {
            return Err(FingerprintError::InvalidConfig(format!(
                "candidate period {} is below the minimum of {}",
                periods[0],
                Self::MIN_PERIOD
            )));
        }
        Ok(Self(periods))
    }

    pub fn as_slice(&self) -> &[u32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, period: u32) -> bool {
        self.0.binary_search(&period).is_ok()
    }
}

impl TryFrom<Vec<u32>> for PeriodSet {
    type Error = FingerprintError;

    fn try_from(value: Vec<u32>) -> Result<Self> {
        PeriodSet::new(value)
    }
}

impl From<PeriodSet> for Vec<u32> {
    fn from(value: PeriodSet) -> Self {
        value.0
    }
}

/// Complete parameterization of one comb-test run.
///
/// "Exploratory", "confirmatory" or "audit" campaigns are expressed through
/// these values (trial count, thresholds, strictness), not through separate
/// code paths.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProtocolConfig {
    /// Identifier of the pre-registered protocol, e.g. `"comb-v1"`.
    pub protocol_version: String,
    pub periods: PeriodSet,
    /// Inclusive multipole range analysed.
    pub ell_min: u32,
    pub ell_max: u32,
    /// Monte Carlo trials for the null distribution.
    pub n_trials: usize,
    pub seed: u64,
    pub whitening: WhiteningMode,
    pub thresholds: Thresholds,
    /// Abort on the units-mismatch guard. When disabled, the run continues
    /// but the result is marked as not court-grade.
    pub strict: bool,
}

impl ProtocolConfig {
    /// Check parameter ranges.
    pub fn validate(&self) -> Result<()> {
        if self.protocol_version.trim().is_empty() {
            return Err(FingerprintError::InvalidConfig(
                "protocol_version must not be empty".into(),
            ));
        }
        if self.ell_min >= self.ell_max {
            return Err(FingerprintError::InvalidConfig(format!(
                "ell_min ({}) must be below ell_max ({})",
                self.ell_min, self.ell_max
            )));
        }
        if self.n_trials == 0 {
            return Err(FingerprintError::InvalidConfig(
                "n_trials must be at least 1".into(),
            ));
        }
        self.thresholds.validate()
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: ProtocolConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }
}
