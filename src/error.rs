//! Error type shared by every stage of the protocol.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, FingerprintError>;

/// Failures surfaced by the comb-testing protocol.
///
/// Input and numerical failures are never coerced away; the only retried
/// operation is the bounded ridge search in [`crate::whitening`].
#[derive(Debug, Error)]
pub enum FingerprintError {
    #[error("invalid spectrum '{name}': {reason}")]
    InvalidSpectrum { name: String, reason: String },

    #[error("misaligned multipole grids: {reason}")]
    MisalignedGrid { reason: String },

    #[error("whitening mode '{mode}' needs per-multipole uncertainties but neither spectrum has them")]
    MissingUncertainty { mode: String },

    #[error("covariance matrix is not square: {nrows}x{ncols}")]
    NonSquareCovariance { nrows: usize, ncols: usize },

    #[error("covariance dimension {actual} does not match {expected} multipole bins")]
    CovarianceDimension { expected: usize, actual: usize },

    #[error("covariance is not symmetric: |C[{row},{col}] - C[{col},{row}]| = {deviation:.3e}")]
    AsymmetricCovariance {
        row: usize,
        col: usize,
        deviation: f64,
    },

    #[error("invalid covariance: {reason}")]
    InvalidCovariance { reason: String },

    #[error(
        "covariance is not positive definite after {attempts} ridge attempts (last lambda = {last_ridge:.3e})"
    )]
    CovarianceNotPositiveDefinite { attempts: usize, last_ridge: f64 },

    #[error("whitening mode 'covariance' requires a covariance matrix")]
    MissingCovariance,

    #[error(
        "residuals look like a units mismatch: chi2/dof = {chi2_per_dof:.3e}, median |r| = {median_abs:.3e}"
    )]
    UnitsMismatch { chi2_per_dof: f64, median_abs: f64 },

    #[error("period {period} is ill-posed: {reason}")]
    IllPosedPeriod { period: u32, reason: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("pre-registration mismatch: expected commitment {expected}, got {actual}")]
    PreregistrationMismatch { expected: String, actual: String },

    #[error("registered {input} input does not match: expected {expected}, got {actual}")]
    InputHashMismatch {
        input: String,
        expected: String,
        actual: String,
    },

    #[error("parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl FingerprintError {
    pub(crate) fn invalid_spectrum(name: &str, reason: impl Into<String>) -> Self {
        Self::InvalidSpectrum {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}
