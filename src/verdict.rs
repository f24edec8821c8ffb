//! Significance classification and the result record.

use crate::calibration::{NullSummary, PValue};
use crate::config::Thresholds;
use crate::periodic::PeriodFit;
use crate::provenance::Provenance;
use crate::whitening::{SanityStats, WhiteningInfo};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

/// Three-level outcome of the comb test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Significance {
    /// `p >= candidate`
    Null,
    /// `strong <= p < candidate`
    Candidate,
    /// `p < strong`
    Strong,
}

impl Significance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Significance::Null => "NULL",
            Significance::Candidate => "CANDIDATE",
            Significance::Strong => "STRONG",
        }
    }
}

impl std::fmt::Display for Significance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Map a p-value onto the verdict scale.
pub fn classify(p_value: f64, thresholds: &Thresholds) -> Significance {
    if p_value < thresholds.strong {
        Significance::Strong
    } else if p_value < thresholds.candidate {
        Significance::Candidate
    } else {
        Significance::Null
    }
}

/// One period's fit together with its local (single-period) p-value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodReport {
    #[serde(flatten)]
    pub fit: PeriodFit,
    pub local_p_value: f64,
}

/// Machine-readable outcome of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FingerprintResult {
    pub verdict: Significance,
    pub best: PeriodFit,
    pub observed_max_delta_chi2: f64,
    pub p_value: PValue,
    pub recommendation: Option<String>,
    pub periods: Vec<PeriodReport>,
    pub thresholds: Thresholds,
    pub n_bins: usize,
    pub whitening: WhiteningInfo,
    pub sanity: SanityStats,
    /// False when the units-mismatch guard was overridden.
    pub court_grade: bool,
    pub null: NullSummary,
    pub provenance: Provenance,
}

impl FingerprintResult {
    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Human-readable verdict report.
pub fn render_report(result: &FingerprintResult) -> String {
    let mut out = String::new();
    let p = &result.p_value;
    let p_text = if p.upper_bound {
        format!("<= {:.3e} (Monte Carlo floor)", p.value)
    } else {
        format!("{:.3e}", p.value)
    };

    let _ = writeln!(out, "Comb test verdict: {}", result.verdict);
    let _ = writeln!(out, "=====================");
    let _ = writeln!(
        out,
        "protocol {} | commitment {}",
        result.provenance.protocol_version, result.provenance.preregistration_commitment
    );
    if !result.court_grade {
        let _ = writeln!(
            out,
            "WARNING: units-mismatch guard overridden; this result is NOT court-grade"
        );
    }
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "best period {} | amplitude {:.6e} | phase {:+.4} rad | dchi2 {:.4}",
        result.best.period, result.best.amplitude, result.best.phase, result.best.delta_chi2
    );
    let _ = writeln!(
        out,
        "global p-value {} ({} of {} trials)",
        p_text, p.exceedances, p.n_trials
    );
    let _ = writeln!(
        out,
        "thresholds: candidate < {:.3e}, strong < {:.3e}",
        result.thresholds.candidate, result.thresholds.strong
    );
    if let Some(rec) = &result.recommendation {
        let _ = writeln!(out, "note: {}", rec);
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "{:>8} {:>14} {:>10} {:>12} {:>12}", "period", "amplitude", "phase", "dchi2", "local p");
    for row in &result.periods {
        let _ = writeln!(
            out,
            "{:>8} {:>14.6e} {:>+10.4} {:>12.4} {:>12.3e}",
            row.fit.period, row.fit.amplitude, row.fit.phase, row.fit.delta_chi2, row.local_p_value
        );
    }

    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "null: {} trials, seed {}, median max dchi2 {:.4}, global threshold {:.4}",
        result.null.n_trials, result.null.seed, result.null.median_max, result.null.global_threshold
    );
    let w = &result.whitening;
    let _ = write!(out, "whitening: {} over {} bins", w.mode, result.n_bins);
    if let Some(cond) = w.condition_number {
        let _ = write!(out, ", condition number {:.3e}", cond);
    }
    if w.ridge_attempts > 0 {
        let _ = write!(
            out,
            ", ridge lambda {:.3e} after {} attempts",
            w.ridge_lambda, w.ridge_attempts
        );
    }
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "sanity: chi2/dof {:.4}, median |r| {:.4}",
        result.sanity.chi2_per_dof, result.sanity.median_abs
    );
    let inputs = &result.provenance.inputs;
    let _ = writeln!(out, "observed sha256 {}", inputs.observed);
    let _ = writeln!(out, "model    sha256 {}", inputs.model);
    if let Some(c) = &inputs.covariance {
        let _ = writeln!(out, "cov      sha256 {}", c);
    }
    out
}
