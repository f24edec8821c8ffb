//! Numerical constants and small statistics used across the pipeline.

/// Small epsilon for numerical comparisons (e.g., avoiding division by zero).
pub const NUMERICAL_EPS: f64 = 1e-10;

/// Absolute symmetry tolerance for covariance matrices, scaled by
/// `max(1, max |C_ij|)`.
pub const SYMMETRY_TOL: f64 = 1e-10;

/// Condition number above which the covariance is ridge-regularized.
pub const MAX_CONDITION_NUMBER: f64 = 1e8;

/// Units-mismatch guard: maximum tolerated chi-squared per degree of freedom.
pub const MAX_CHI2_PER_DOF: f64 = 1e6;

/// Units-mismatch guard: maximum tolerated median absolute residual.
pub const MAX_MEDIAN_ABS_RESIDUAL: f64 = 1e4;

/// Trial count from which the Monte Carlo loop is spread over the worker pool.
pub const PARALLEL_TRIAL_THRESHOLD: usize = 10_000;

/// Default significance threshold separating NULL from CANDIDATE.
pub const DEFAULT_CANDIDATE_ALPHA: f64 = 0.01;

/// Default significance threshold separating CANDIDATE from STRONG (~5σ).
pub const DEFAULT_STRONG_ALPHA: f64 = 2.9e-7;

/// Median of a slice (NaN-free input assumed). Returns NaN for empty input.
pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let n = sorted.len();
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        0.5 * (sorted[n / 2 - 1] + sorted[n / 2])
    }
}

/// Empirical quantile of an already sorted slice using linear interpolation
/// between order statistics.
pub fn sorted_quantile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    let q = q.clamp(0.0, 1.0);
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

/// Sum of squares.
#[inline]
pub fn sum_sq(values: &[f64]) -> f64 {
    values.iter().map(|v| v * v).sum()
}

#[inline]
pub fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_median_odd_even() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), 2.0);
        assert_eq!(median(&[4.0, 1.0, 3.0, 2.0]), 2.5);
        assert!(median(&[]).is_nan());
    }

    #[test]
    fn test_sorted_quantile_interpolates() {
        let sorted = vec![0.0, 1.0, 2.0, 3.0, 4.0];
        assert!((sorted_quantile(&sorted, 0.5) - 2.0).abs() < NUMERICAL_EPS);
        assert!((sorted_quantile(&sorted, 0.125) - 0.5).abs() < NUMERICAL_EPS);
        assert_eq!(sorted_quantile(&sorted, 1.0), 4.0);
        assert_eq!(sorted_quantile(&sorted, -1.0), 0.0);
    }

    #[test]
    fn test_dot_and_sum_sq() {
        let a = [1.0, 2.0, 3.0];
        assert_eq!(dot(&a, &a), sum_sq(&a));
        assert_eq!(sum_sq(&a), 14.0);
    }
}
