//! # fingerprint-core
//!
//! Pre-registered Monte Carlo testing for periodic "comb" signals in
//! power-spectrum residuals.
//!
//! The crate implements one statistical protocol as composable stages:
//! - Residuals and whitening (none, diagonal, Cholesky with ridge regularization)
//! - Closed-form sinusoid fits at fixed candidate periods
//! - Max-statistic Monte Carlo null calibration (look-elsewhere correction)
//! - Three-level verdicts (NULL, CANDIDATE, STRONG)
//! - Provenance: input hashes, seeds and pre-registration commitments
//!
//! ## Reproducibility
//!
//! There is no global random state. Every randomized stage takes an explicit
//! seed, and Monte Carlo trial `t` derives its generator from `seed + t`, so
//! results are identical with or without the `parallel` feature.
//!
//! ## Example
//!
//! ```
//! use fingerprint_core::{run_protocol, PeriodSet, ProtocolConfig, ProtocolInputs, Spectrum,
//!     Significance, Thresholds, WhiteningMode};
//!
//! let ell: Vec<u32> = (2..=401).collect();
//! let n = ell.len();
//! let observed = Spectrum::new("obs", ell.clone(), vec![1.0; n], Some(vec![0.1; n])).unwrap();
//! let model = Spectrum::new("model", ell, vec![1.0; n], None).unwrap();
//!
//! let config = ProtocolConfig {
//!     protocol_version: "comb-v1".into(),
//!     periods: PeriodSet::new([8, 16, 32, 64]).unwrap(),
//!     ell_min: 2,
//!     ell_max: 401,
//!     n_trials: 200,
//!     seed: 1,
//!     whitening: WhiteningMode::Diagonal,
//!     thresholds: Thresholds::default(),
//!     strict: true,
//! };
//! let result = run_protocol(&ProtocolInputs::new(observed, model, None), &config).unwrap();
//! assert_eq!(result.verdict, Significance::Null);
//! ```

#![allow(clippy::needless_range_loop)]

pub mod parallel;

pub mod calibration;
pub mod config;
pub mod error;
pub mod helpers;
pub mod io;
pub mod matrix;
pub mod periodic;
pub mod pipeline;
pub mod provenance;
pub mod spectrum;
pub mod verdict;
pub mod whitening;

pub use calibration::{calibrate_null, NullDistribution, NullSummary, PValue};
pub use config::{PeriodSet, ProtocolConfig, Thresholds, WhiteningMode};
pub use error::{FingerprintError, Result};
pub use matrix::CovMatrix;
pub use periodic::{fit_period, PeriodDesign, PeriodFit};
pub use pipeline::{
    prepare_residuals, run_preregistered, run_preregistered_with_inputs, run_protocol,
    CovarianceSource, PreparedResiduals, ProtocolInputs,
};
pub use provenance::{
    preregistration_commitment, verify_preregistration, verify_registered_inputs, InputHashes,
    Provenance,
};
pub use spectrum::Spectrum;
pub use verdict::{classify, render_report, FingerprintResult, Significance};
pub use whitening::{Whitener, WhiteningInfo};
