//! Monte Carlo calibration of the look-elsewhere-corrected null.
//!
//! Each trial draws a noise realization from the run's noise model, whitens
//! it exactly like the observed residual, fits every candidate period and
//! records the per-period Δχ². The maximum over periods forms the global
//! null; the per-period columns give the single-period (local) nulls.
//!
//! Trial `t` seeds its own generator with `seed + t`, so trials share no
//! state and the distribution is identical whether they run sequentially or
//! on the worker pool.

use crate::helpers::{sorted_quantile, PARALLEL_TRIAL_THRESHOLD};
use crate::iter_maybe_parallel;
use crate::periodic::PeriodDesign;
use crate::whitening::Whitener;
use rand::rngs::StdRng;
use rand::SeedableRng;
#[cfg(feature = "parallel")]
use rayon::iter::ParallelIterator;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Empirical null distributions from one calibration run.
#[derive(Debug, Clone)]
pub struct NullDistribution {
    seed: u64,
    periods: Vec<u32>,
    /// Sorted max-over-periods statistic, one per trial.
    maxima: Vec<f64>,
    /// Sorted single-period statistics, indexed like `periods`.
    per_period: Vec<Vec<f64>>,
}

/// Monte Carlo p-value with its resolution.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PValue {
    pub value: f64,
    /// Trials whose statistic reached the observed value.
    pub exceedances: usize,
    pub n_trials: usize,
    /// No trial reached the observed value: `value = 1/N` is only an upper bound.
    pub upper_bound: bool,
}

impl PValue {
    fn from_counts(exceedances: usize, n_trials: usize) -> Self {
        let n = n_trials.max(1);
        if exceedances == 0 {
            Self {
                value: 1.0 / n as f64,
                exceedances,
                n_trials,
                upper_bound: true,
            }
        } else {
            Self {
                value: exceedances as f64 / n as f64,
                exceedances,
                n_trials,
                upper_bound: false,
            }
        }
    }

    /// Advice attached to a floor hit.
    pub fn recommendation(&self) -> Option<String> {
        self.upper_bound.then(|| {
            format!(
                "p-value hit the Monte Carlo floor 1/{}; report p <= {:.3e} and rerun with more trials before claiming a precise significance",
                self.n_trials, self.value
            )
        })
    }
}

/// Serializable digest of a [`NullDistribution`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NullSummary {
    pub n_trials: usize,
    pub seed: u64,
    pub mean_max: f64,
    pub median_max: f64,
    /// Global (max-statistic) threshold at the candidate level.
    pub global_threshold: f64,
    /// Single-period thresholds at the same level, as `(period, threshold)`.
    pub local_thresholds: Vec<(u32, f64)>,
}

fn sort_ascending(v: &mut [f64]) {
    v.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
}

/// Count of sorted entries `>= x`.
fn count_at_least(sorted: &[f64], x: f64) -> usize {
    sorted.len() - sorted.partition_point(|&v| v < x)
}

fn run_trial(designs: &[PeriodDesign], whitener: &Whitener, trial_seed: u64) -> Vec<f64> {
    let mut rng = StdRng::seed_from_u64(trial_seed);
    let noise = whitener.sample_noise(&mut rng);
    let white = whitener.whiten(&noise);
    designs.iter().map(|d| d.delta_chi2(&white)).collect()
}

/// Build the null distribution from `n_trials` seeded trials.
///
/// Runs on the worker pool once `n_trials` reaches
/// [`PARALLEL_TRIAL_THRESHOLD`] (with the `parallel` feature).
pub fn calibrate_null(
    designs: &[PeriodDesign],
    whitener: &Whitener,
    n_trials: usize,
    seed: u64,
) -> NullDistribution {
    let run = |t: usize| run_trial(designs, whitener, seed.wrapping_add(t as u64));
    let trials: Vec<Vec<f64>> = if n_trials >= PARALLEL_TRIAL_THRESHOLD {
        iter_maybe_parallel!(0..n_trials).map(run).collect()
    } else {
        (0..n_trials).map(run).collect()
    };

    let mut maxima: Vec<f64> = trials
        .iter()
        .map(|stats| stats.iter().copied().fold(0.0, f64::max))
        .collect();
    sort_ascending(&mut maxima);

    let per_period: Vec<Vec<f64>> = (0..designs.len())
        .map(|k| {
            let mut col: Vec<f64> = trials.iter().map(|stats| stats[k]).collect();
            sort_ascending(&mut col);
            col
        })
        .collect();

    debug!(
        n_trials,
        seed,
        n_periods = designs.len(),
        "null distribution calibrated"
    );

    NullDistribution {
        seed,
        periods: designs.iter().map(|d| d.period()).collect(),
        maxima,
        per_period,
    }
}

impl NullDistribution {
    pub fn n_trials(&self) -> usize {
        self.maxima.len()
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Sorted max-statistic samples.
    pub fn maxima(&self) -> &[f64] {
        &self.maxima
    }

    /// Global p-value: fraction of trials whose max Δχ² reaches `observed_max`.
    pub fn p_value(&self, observed_max: f64) -> PValue {
        PValue::from_counts(count_at_least(&self.maxima, observed_max), self.n_trials())
    }

    /// Local p-value at one period, ignoring the other candidates.
    pub fn local_p_value(&self, period: u32, observed: f64) -> Option<PValue> {
        let k = self.periods.iter().position(|&p| p == period)?;
        Some(PValue::from_counts(
            count_at_least(&self.per_period[k], observed),
            self.n_trials(),
        ))
    }

    /// Empirical quantile of the max statistic.
    pub fn quantile(&self, q: f64) -> f64 {
        sorted_quantile(&self.maxima, q)
    }

    /// Max-statistic value exceeded with probability `alpha` under the null.
    pub fn threshold(&self, alpha: f64) -> f64 {
        self.quantile(1.0 - alpha)
    }

    /// Single-period threshold at level `alpha`.
    pub fn period_threshold(&self, period: u32, alpha: f64) -> Option<f64> {
        let k = self.periods.iter().position(|&p| p == period)?;
        Some(sorted_quantile(&self.per_period[k], 1.0 - alpha))
    }

    pub fn summary(&self, alpha: f64) -> NullSummary {
        let n = self.n_trials().max(1) as f64;
        NullSummary {
            n_trials: self.n_trials(),
            seed: self.seed,
            mean_max: self.maxima.iter().sum::<f64>() / n,
            median_max: self.quantile(0.5),
            global_threshold: self.threshold(alpha),
            local_thresholds: self
                .periods
                .iter()
                .zip(&self.per_period)
                .map(|(&p, col)| (p, sorted_quantile(col, 1.0 - alpha)))
                .collect(),
        }
    }
}
