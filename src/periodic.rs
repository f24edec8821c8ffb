//! Sinusoidal fit at a fixed candidate period.
//!
//! For period `P` the residual is modelled as
//! ```text
//! r_ℓ ≈ a·cos(2πℓ/P) + b·sin(2πℓ/P) = A·sin(2πℓ/P + φ)
//! ```
//! with `A = √(a² + b²)` and `φ = atan2(a, b)`. The coefficients come from
//! ordinary least squares on the (whitened) two-column design, in closed
//! form through the inverse 2×2 Gram matrix. The improvement over the
//! no-signal model is
//! ```text
//! Δχ² = χ²(A = 0) − χ²(fit) = βᵀ Xᵀ r
//! ```
//!
//! A [`PeriodDesign`] is built once per period and reused for the observed
//! residual and every Monte Carlo trial.

use crate::config::PeriodSet;
use crate::error::{FingerprintError, Result};
use crate::helpers::dot;
use crate::slice_maybe_parallel;
use crate::whitening::Whitener;
use nalgebra::{Matrix2, Vector2};
#[cfg(feature = "parallel")]
use rayon::iter::ParallelIterator;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Relative determinant below which the Gram matrix counts as singular.
const GRAM_SINGULAR_TOL: f64 = 1e-12;

/// Fitted sinusoid at one period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodFit {
    pub period: u32,
    /// Amplitude `A` in the units of the (unwhitened) residual.
    pub amplitude: f64,
    /// Phase `φ` in radians, in `(-π, π]`.
    pub phase: f64,
    /// `χ²(A = 0) − χ²(fit)` in the whitened basis.
    pub delta_chi2: f64,
    /// Cosine coefficient `a`.
    pub cos_coef: f64,
    /// Sine coefficient `b`.
    pub sin_coef: f64,
}

/// Reject periods with too few cycles over the analysed multipoles.
///
/// A period longer than half the ℓ-span cannot be told apart from a
/// smooth trend.
pub fn check_period(period: u32, ell: &[u32]) -> Result<()> {
    let (Some(&first), Some(&last)) = (ell.first(), ell.last()) else {
        return Err(FingerprintError::IllPosedPeriod {
            period,
            reason: "no multipoles to fit".into(),
        });
    };
    let half_span = (last - first) as f64 / 2.0;
    if period as f64 > half_span {
        return Err(FingerprintError::IllPosedPeriod {
            period,
            reason: format!(
                "exceeds half the multipole range [{}, {}] (fewer than two cycles)",
                first, last
            ),
        });
    }
    Ok(())
}

/// Precomputed (whitened) design for one period.
#[derive(Debug, Clone)]
pub struct PeriodDesign {
    period: u32,
    cos_col: Vec<f64>,
    sin_col: Vec<f64>,
    gram_inv: Matrix2<f64>,
}

impl PeriodDesign {
    /// Build the design on `ell`, transformed by `whitener`.
    pub fn new(period: u32, ell: &[u32], whitener: &Whitener) -> Result<Self> {
        check_period(period, ell)?;
        let omega = 2.0 * PI / period as f64;
        let cos_raw: Vec<f64> = ell.iter().map(|&l| (omega * l as f64).cos()).collect();
        let sin_raw: Vec<f64> = ell.iter().map(|&l| (omega * l as f64).sin()).collect();
        let cos_col = whitener.whiten(&cos_raw);
        let sin_col = whitener.whiten(&sin_raw);

        let cc = dot(&cos_col, &cos_col);
        let ss = dot(&sin_col, &sin_col);
        let cs = dot(&cos_col, &sin_col);
        let gram = Matrix2::new(cc, cs, cs, ss);
        let det = gram.determinant();
        if !(det > GRAM_SINGULAR_TOL * cc * ss) {
            return Err(FingerprintError::IllPosedPeriod {
                period,
                reason: "cosine and sine columns are degenerate on this grid".into(),
            });
        }
        let gram_inv = gram
            .try_inverse()
            .ok_or_else(|| FingerprintError::IllPosedPeriod {
                period,
                reason: "singular normal equations".into(),
            })?;

        Ok(Self {
            period,
            cos_col,
            sin_col,
            gram_inv,
        })
    }

    pub fn period(&self) -> u32 {
        self.period
    }

    fn coefficients(&self, residual: &[f64]) -> (Vector2<f64>, Vector2<f64>) {
        let xtr = Vector2::new(dot(&self.cos_col, residual), dot(&self.sin_col, residual));
        (self.gram_inv * xtr, xtr)
    }

    /// Δχ² only; the hot path of the Monte Carlo loop.
    pub fn delta_chi2(&self, whitened_residual: &[f64]) -> f64 {
        let (beta, xtr) = self.coefficients(whitened_residual);
        beta.dot(&xtr).max(0.0)
    }

    /// Full fit on an already whitened residual.
    pub fn fit(&self, whitened_residual: &[f64]) -> PeriodFit {
        let (beta, xtr) = self.coefficients(whitened_residual);
        let (a, b) = (beta[0], beta[1]);
        PeriodFit {
            period: self.period,
            amplitude: a.hypot(b),
            phase: a.atan2(b),
            delta_chi2: beta.dot(&xtr).max(0.0),
            cos_coef: a,
            sin_coef: b,
        }
    }
}

/// Build designs for every period in the set.
pub fn build_designs(
    periods: &PeriodSet,
    ell: &[u32],
    whitener: &Whitener,
) -> Result<Vec<PeriodDesign>> {
    periods
        .as_slice()
        .iter()
        .map(|&p| PeriodDesign::new(p, ell, whitener))
        .collect()
}

/// Fit every design against the same whitened residual.
pub fn fit_all(designs: &[PeriodDesign], whitened_residual: &[f64]) -> Vec<PeriodFit> {
    slice_maybe_parallel!(designs)
        .map(|d| d.fit(whitened_residual))
        .collect()
}

/// Max Δχ² over designs.
pub fn max_delta_chi2(designs: &[PeriodDesign], whitened_residual: &[f64]) -> f64 {
    designs
        .iter()
        .map(|d| d.delta_chi2(whitened_residual))
        .fold(0.0, f64::max)
}

/// Fit with the largest Δχ²; ties go to the shorter period.
pub fn best_fit(fits: &[PeriodFit]) -> Option<&PeriodFit> {
    fits.iter().reduce(|best, f| {
        if f.delta_chi2 > best.delta_chi2 {
            f
        } else {
            best
        }
    })
}

/// Unweighted single-period fit on a raw residual.
pub fn fit_period(ell: &[u32], residual: &[f64], period: u32) -> Result<PeriodFit> {
    if ell.len() != residual.len() {
        return Err(FingerprintError::MisalignedGrid {
            reason: format!(
                "{} multipoles for {} residuals",
                ell.len(),
                residual.len()
            ),
        });
    }
    let identity = Whitener::Identity {
        sigma: vec![1.0; ell.len()],
    };
    Ok(PeriodDesign::new(period, ell, &identity)?.fit(residual))
}
