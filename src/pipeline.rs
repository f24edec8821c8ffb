//! The comb-test protocol as one parameterized pipeline.
//!
//! ```text
//! inputs ──► prepare_residuals ──► build_designs ──► fit_all ─┐
//!                 │                                            ├─► classify ──► FingerprintResult
//!                 └────────────► calibrate_null ──► p_value ───┘
//! ```
//!
//! Each stage is a public function and can be driven on its own; the
//! campaign flavour (exploratory, confirmatory, audit) lives entirely in
//! [`ProtocolConfig`].

use crate::calibration::calibrate_null;
use crate::config::ProtocolConfig;
use crate::error::{FingerprintError, Result};
use crate::io::{read_covariance_binary, read_covariance_text, read_spectrum};
use crate::matrix::CovMatrix;
use crate::periodic::{best_fit, build_designs, fit_all};
use crate::provenance::{
    sha256_hex, verify_preregistration, verify_registered_inputs, InputHashes, Provenance,
};
use crate::spectrum::{check_aligned, Spectrum};
use crate::verdict::{classify, FingerprintResult, PeriodReport};
use crate::whitening::{
    enforce_sanity, raw_residual, sanity_check, select_uncertainty, validate_covariance,
    SanityStats, Whitener, WhiteningInfo,
};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Where a covariance matrix is read from.
#[derive(Debug, Clone)]
pub enum CovarianceSource {
    /// Whitespace/comma separated rows.
    Text(PathBuf),
    /// NumPy `.npy`, or raw little-endian `f64` row-major sized to the
    /// observed grid.
    Binary(PathBuf),
}

/// Data entering a run, with their content hashes.
#[derive(Debug, Clone)]
pub struct ProtocolInputs {
    pub observed: Spectrum,
    pub model: Spectrum,
    /// Indexed by the observed spectrum's full multipole grid.
    pub covariance: Option<CovMatrix>,
    pub hashes: InputHashes,
}

impl ProtocolInputs {
    /// Wrap in-memory data, hashing their canonical encodings.
    pub fn new(observed: Spectrum, model: Spectrum, covariance: Option<CovMatrix>) -> Self {
        let hashes = InputHashes {
            observed: sha256_hex(&observed.canonical_bytes()),
            model: sha256_hex(&model.canonical_bytes()),
            covariance: covariance.as_ref().map(|c| sha256_hex(&c.canonical_bytes())),
            method: "canonical".into(),
        };
        Self {
            observed,
            model,
            covariance,
            hashes,
        }
    }

    /// Load from files, hashing the file bytes.
    pub fn from_files(
        observed: impl AsRef<Path>,
        model: impl AsRef<Path>,
        covariance: Option<CovarianceSource>,
    ) -> Result<Self> {
        let obs = read_spectrum(observed)?;
        let mdl = read_spectrum(model)?;
        let cov = match covariance {
            None => None,
            Some(CovarianceSource::Text(p)) => Some(read_covariance_text(p)?),
            Some(CovarianceSource::Binary(p)) => Some(read_covariance_binary(p, obs.value.len())?),
        };
        let hashes = InputHashes {
            observed: obs.sha256,
            model: mdl.sha256,
            covariance: cov.as_ref().map(|c| c.sha256.clone()),
            method: "file".into(),
        };
        Ok(Self {
            observed: obs.value,
            model: mdl.value,
            covariance: cov.map(|c| c.value),
            hashes,
        })
    }
}

/// Output of the residual and whitening stage.
#[derive(Debug, Clone)]
pub struct PreparedResiduals {
    /// Multipoles analysed (after cropping).
    pub ell: Vec<u32>,
    pub whitened: Vec<f64>,
    pub whitener: Whitener,
    pub info: WhiteningInfo,
    pub sanity: SanityStats,
    pub court_grade: bool,
}

/// Crop, align, validate, whiten and sanity-check the residual.
pub fn prepare_residuals(inputs: &ProtocolInputs, config: &ProtocolConfig) -> Result<PreparedResiduals> {
    let observed = inputs.observed.crop(config.ell_min, config.ell_max)?;
    let model = inputs.model.crop(config.ell_min, config.ell_max)?;
    check_aligned(&observed, &model)?;

    let covariance = match &inputs.covariance {
        Some(cov) => {
            validate_covariance(cov, inputs.observed.len())?;
            let keep = inputs
                .observed
                .indices_in_range(config.ell_min, config.ell_max);
            Some(cov.principal_submatrix(&keep))
        }
        None => None,
    };

    let sigma = select_uncertainty(&observed, &model);
    let (whitener, info) = Whitener::prepare(config.whitening, sigma, covariance.as_ref())?;

    let residual = raw_residual(&observed, &model)?;
    let whitened = whitener.whiten(&residual);
    let sanity = sanity_check(&whitener.normalize(&residual));
    let court_grade = enforce_sanity(&sanity, config.strict)?;

    debug!(
        bins = residual.len(),
        mode = %config.whitening,
        chi2_per_dof = sanity.chi2_per_dof,
        "residuals prepared"
    );

    Ok(PreparedResiduals {
        ell: observed.ell().to_vec(),
        whitened,
        whitener,
        info,
        sanity,
        court_grade,
    })
}

/// Run the full protocol.
pub fn run_protocol(inputs: &ProtocolInputs, config: &ProtocolConfig) -> Result<FingerprintResult> {
    config.validate()?;
    let provenance = Provenance::new(config, inputs.hashes.clone())?;

    let prepared = prepare_residuals(inputs, config)?;
    let designs = build_designs(&config.periods, &prepared.ell, &prepared.whitener)?;
    let fits = fit_all(&designs, &prepared.whitened);
    let best = best_fit(&fits)
        .cloned()
        .ok_or_else(|| FingerprintError::InvalidConfig("no candidate periods".into()))?;
    let observed_max = best.delta_chi2;

    let null = calibrate_null(&designs, &prepared.whitener, config.n_trials, config.seed);
    let p_value = null.p_value(observed_max);
    let recommendation = p_value.recommendation();
    if let Some(rec) = &recommendation {
        warn!(n_trials = config.n_trials, "{}", rec);
    }

    let periods = fits
        .into_iter()
        .map(|fit| {
            let local = null
                .local_p_value(fit.period, fit.delta_chi2)
                .map_or(f64::NAN, |p| p.value);
            PeriodReport {
                fit,
                local_p_value: local,
            }
        })
        .collect();

    let verdict = classify(p_value.value, &config.thresholds);
    info!(
        verdict = %verdict,
        best_period = best.period,
        delta_chi2 = observed_max,
        p_value = p_value.value,
        upper_bound = p_value.upper_bound,
        "comb test finished"
    );

    Ok(FingerprintResult {
        verdict,
        best,
        observed_max_delta_chi2: observed_max,
        p_value,
        recommendation,
        periods,
        thresholds: config.thresholds,
        n_bins: prepared.ell.len(),
        whitening: prepared.info,
        sanity: prepared.sanity,
        court_grade: prepared.court_grade,
        null: null.summary(config.thresholds.candidate),
        provenance,
    })
}

/// Run only if `config` matches the registered commitment.
pub fn run_preregistered(
    inputs: &ProtocolInputs,
    config: &ProtocolConfig,
    commitment: &str,
) -> Result<FingerprintResult> {
    verify_preregistration(config, commitment)?;
    run_protocol(inputs, config)
}

/// Like [`run_preregistered`], but the dataset is registered too: every
/// input digest must match `registered_inputs`.
pub fn run_preregistered_with_inputs(
    inputs: &ProtocolInputs,
    config: &ProtocolConfig,
    commitment: &str,
    registered_inputs: &InputHashes,
) -> Result<FingerprintResult> {
    verify_preregistration(config, commitment)?;
    verify_registered_inputs(registered_inputs, &inputs.hashes)?;
    run_protocol(inputs, config)
}
